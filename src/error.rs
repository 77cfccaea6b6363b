use thiserror::Error;

pub type Result<T> = std::result::Result<T, OpsError>;

#[derive(Debug, Error)]
pub enum OpsError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("{0} is required")]
    MissingArgument(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("project_id '{0}' is not in the allowed list")]
    ProjectNotAllowed(String),

    #[error("invalid end time '{input}': {reason}")]
    InvalidEndTime { input: String, reason: String },

    #[error("invalid start time '{input}': {reason}")]
    InvalidStartTime { input: String, reason: String },

    #[error("invalid relative start time '{input}': {reason}")]
    InvalidRelativeStart { input: String, reason: String },

    #[error("invalid time range: start time is after end time")]
    InvertedRange,

    #[error("time range {requested_hours:.1} hours exceeds maximum {max_hours} hours")]
    RangeTooLarge { requested_hours: f64, max_hours: i64 },

    #[error("upstream returned {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
