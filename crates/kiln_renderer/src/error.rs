use kiln_core::SchedError;
use thiserror::Error;

/// Errors that can occur while setting up or rendering frames.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Scheduling error: {0}")]
    Sched(#[from] SchedError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type RenderResult<T> = Result<T, RenderError>;
