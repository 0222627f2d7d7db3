use thiserror::Error;

#[derive(Debug, Error)]
pub enum DevboxError {
    #[error("not initialized: run 'doit init'")]
    NotInitialized,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid image reference '{0}': expected <org>/<box>")]
    InvalidImage(String),

    #[error("invalid box version '{0}'")]
    InvalidVersion(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("tool not found on PATH: {0}")]
    ToolNotFound(String),

    #[error("'{command}' exited with status {code}")]
    ToolFailed { command: String, code: i32 },

    #[error("invalid sequence: {0}")]
    InvalidSequence(String),

    #[error("undefined variable '{{{{ {0} }}}}'")]
    UndefinedVariable(String),

    #[error("precondition failed: expected OS '{expected}', found '{found}'")]
    Precondition { expected: String, found: String },

    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("package operation failed: {0}")]
    Package(String),

    #[error("command '{command}' exited with status {code}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("sudo rule for '{0}' rejected by visudo")]
    InvalidSudoRule(String),

    #[error("host transport failed: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DevboxError>;
