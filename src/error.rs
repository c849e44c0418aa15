use thiserror::Error;

#[derive(Error, Debug)]
pub enum SkiffError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Remote shell error: {0}")]
    Shell(String),

    #[error("Job error: {0}")]
    Job(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Dialog error: {0}")]
    Dialog(#[from] dialoguer::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SkiffError>;
