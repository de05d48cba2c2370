use thiserror::Error;

/// Errors produced while building or stepping the classification pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// A stage was wired or called in a way its contract forbids
    /// (wrong number of inputs, mismatched shapes, unknown phase...).
    #[error("contract violation: {0}")]
    Contract(String),

    /// Something a component depends on has not been set up yet.
    #[error("missing prerequisite: {0}")]
    MissingPrerequisite(String),

    /// A queue was closed while a step was blocked on it.
    #[error("queue `{0}` is closed")]
    QueueClosed(String),

    /// A background queue runner stopped with an error; the graph is shut down.
    #[error("queue runner failed: {0}")]
    RunnerFailed(String),

    #[error("no value was produced for fetch `{0}`")]
    MissingFetch(String),

    #[error("value for `{key}` is not a {expected}")]
    ValueType { key: String, expected: &'static str },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    ReadNpz(#[from] ndarray_npy::ReadNpzError),

    #[error(transparent)]
    WriteNpz(#[from] ndarray_npy::WriteNpzError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub fn contract(message: impl Into<String>) -> Self {
        Error::Contract(message.into())
    }

    pub fn missing(message: impl Into<String>) -> Self {
        Error::MissingPrerequisite(message.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
