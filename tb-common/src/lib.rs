pub mod config;
pub mod error;
pub mod mac;

pub use config::ServerConfig;
pub use error::AppError;
