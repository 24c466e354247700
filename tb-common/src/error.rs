use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tap device error: {0}")]
    Tap(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
