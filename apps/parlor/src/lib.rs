pub mod cache;
pub mod client;
pub mod outbound;
pub mod session;
pub mod transport;
