//! Error types for teamcity-client

use bbox_core::ServiceError;
use thiserror::Error;

/// Errors that can occur talking to a TeamCity server
#[derive(Error, Debug)]
pub enum TeamCityError {
    /// No server URL was provided
    #[error("teamcity url is required, pass --teamcity-url or set TEAMCITY_URL")]
    MissingUrl,

    /// The server URL could not be parsed
    #[error("invalid teamcity url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),

    /// The server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// The request never got a response
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A response body did not match the expected shape
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server sent something bbox cannot follow
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The artifact download returned an empty body
    #[error("artifacts not found for build {0}")]
    ArtifactsNotFound(u64),

    /// The artifact archive could not be unpacked
    #[error("invalid artifact archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TeamCityError> for ServiceError {
    fn from(err: TeamCityError) -> Self {
        match err {
            TeamCityError::Status { status, url } => ServiceError::Http { status, url },
            TeamCityError::Http(e) if e.is_decode() => ServiceError::Decode(e.to_string()),
            TeamCityError::Http(e) => ServiceError::Transport(e.to_string()),
            TeamCityError::Json(e) => ServiceError::Decode(e.to_string()),
            TeamCityError::UnexpectedResponse(reason) => ServiceError::Decode(reason),
            TeamCityError::ArtifactsNotFound(build_id) => {
                ServiceError::ArtifactsNotFound { build_id }
            }
            TeamCityError::Archive(e) => ServiceError::Io(e.to_string()),
            TeamCityError::Io(e) => ServiceError::Io(e.to_string()),
            e @ (TeamCityError::MissingUrl
            | TeamCityError::InvalidUrl { .. }
            | TeamCityError::ClientBuild(_)) => ServiceError::InvalidConfig(e.to_string()),
        }
    }
}
