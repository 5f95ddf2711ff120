pub mod network;

pub use network::{ClientNetwork, UNKNOWN, client_ip, peer_addr, user_agent};
