use calocore::error::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecoError {
    #[error("Invalid configuration for '{parameter}': {message}")]
    Config { parameter: String, message: String },

    #[error("Geometry error: {0}")]
    Geometry(CoreError),

    #[error("Cell id error: {0}")]
    Core(#[from] CoreError),

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("{factory} failed on event {event}: {source}")]
    Event {
        factory: String,
        event: u64,
        #[source]
        source: Box<RecoError>,
    },
}

impl RecoError {
    pub fn config(parameter: &str, message: impl Into<String>) -> Self {
        RecoError::Config { parameter: parameter.to_string(), message: message.into() }
    }

    /// Fatal errors abort the run; everything else only loses the current event
    pub fn is_fatal(&self) -> bool {
        match self {
            RecoError::Config { .. }
            | RecoError::Geometry(_)
            | RecoError::Json(_)
            | RecoError::Io(_)
            | RecoError::ThreadPool(_) => true,
            RecoError::Core(_) | RecoError::Input(_) => false,
            RecoError::Event { source, .. } => source.is_fatal(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RecoError>;
