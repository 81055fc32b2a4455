//! Location specifiers for input data.
//!
//! An input location is written either as a plain filesystem path or as
//! `host:path`. A specifier without any `:` is local; otherwise everything
//! before the first `:` names a host from the `hosts` table and the rest is
//! the path on that host.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Why a specifier string could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("location is empty")]
    Empty,

    #[error("location '{0}' has no host name before ':'")]
    MissingHost(String),

    #[error("location '{0}' has no remote path after ':'")]
    MissingRemotePath(String),
}

/// A parsed input location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocationSpecifier {
    /// Path on the local filesystem.
    Local { path: PathBuf },
    /// Path on a configured host.
    Remote { host: String, path: String },
}

impl LocationSpecifier {
    /// Parse a specifier string.
    pub fn parse(raw: &str) -> Result<Self, LocationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(LocationError::Empty);
        }

        let Some((host, path)) = raw.split_once(':') else {
            return Ok(Self::Local {
                path: PathBuf::from(raw),
            });
        };

        if host.is_empty() {
            return Err(LocationError::MissingHost(raw.to_string()));
        }
        if path.is_empty() {
            return Err(LocationError::MissingRemotePath(raw.to_string()));
        }

        Ok(Self::Remote {
            host: host.to_string(),
            path: path.to_string(),
        })
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }

    /// Host name for remote locations.
    pub fn host(&self) -> Option<&str> {
        match self {
            Self::Local { .. } => None,
            Self::Remote { host, .. } => Some(host),
        }
    }

    /// Local path, if this is a local location.
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Self::Local { path } => Some(path),
            Self::Remote { .. } => None,
        }
    }
}

impl fmt::Display for LocationSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { path } => write!(f, "{}", path.display()),
            Self::Remote { host, path } => write!(f, "{host}:{path}"),
        }
    }
}
