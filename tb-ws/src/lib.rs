pub mod hub;
pub mod tls;

pub use hub::Hub;
