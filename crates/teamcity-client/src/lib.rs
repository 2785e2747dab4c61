//! teamcity-client: the TeamCity REST API behind bbox's [`CiService`].
//!
//! [`TeamCityClient`] speaks JSON over basic auth and maps every call onto
//! the trait bbox-core orchestrates, so the pipelines never see HTTP.
//!
//! [`CiService`]: bbox_core::CiService

pub mod artifacts;
pub mod client;
pub mod config;
pub mod error;
pub mod models;

pub use client::TeamCityClient;
pub use config::{TeamCityConfig, DEFAULT_REQUEST_TIMEOUT};
pub use error::TeamCityError;

/// Result type for TeamCity operations
pub type Result<T> = std::result::Result<T, TeamCityError>;
