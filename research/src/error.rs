use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Too many research jobs are waiting, try again later")]
    QueueFull,

    #[error("Research runner is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Pipeline(#[from] agent::Error),

    #[error("Subscriber fell behind and was disconnected")]
    SubscriberOverrun,

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
