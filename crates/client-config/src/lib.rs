//! Configuration, file system paths and logging for the dashboard data client.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, RenewalSettings, DEFAULT_API_URL, DEFAULT_LOGIN_PATH, DEFAULT_LOG_LEVEL,
    DEFAULT_REFRESH_PATH, DEFAULT_REQUEST_TIMEOUT_SECS,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level, LogFormat, LogOptions};
pub use paths::Paths;
