use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("monitoring is already running")]
    AlreadyRunning,

    #[error("path source error: {0}")]
    PathSource(String),

    #[error("model inference error: {0}")]
    Model(String),

    #[error("plugin load error: {0}")]
    PluginLoad(String),

    #[error("plugin '{name}' failed: {reason}")]
    Plugin { name: String, reason: String },

    #[error("federated update error: {0}")]
    Federated(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
