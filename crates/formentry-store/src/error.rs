use std::path::PathBuf;

use thiserror::Error;

/// Failure loading `formentry.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration {}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
