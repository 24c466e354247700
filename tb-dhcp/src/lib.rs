pub mod config;
pub mod lease;
pub mod options;
pub mod packet;
pub mod server;

pub use config::DhcpConfig;
pub use server::{DhcpServer, DhcpServerError};
