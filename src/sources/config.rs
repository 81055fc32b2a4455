//! Configuration model and validation for project sync.
//!
//! The configuration file is YAML:
//!
//! ```yaml
//! dir:
//!   input_dir: [/srv/raw, cluster:/scratch/exports]
//!   output_dir: out
//!   work_dir: work
//! data_refresh_mode: auto        # auto | always | manual
//! data_refresh_days: 30
//! hosts:
//!   cluster:
//!     location: cluster.internal
//!     username: analyst
//!     use_gateway: bastion
//!   bastion:
//!     location: bastion.example.org
//! ```
//!
//! [`SyncConfiguration`] is the validated, immutable form. Host entries are
//! kept as written; credentials are materialized later by the resolver.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::location::{LocationError, LocationSpecifier};

/// Default config file looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.yml";

/// Name of the cache directory under `work_dir`.
pub const LOCAL_CACHE_DIR: &str = "data";

/// Default SSH port when a host does not set one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Errors raised while loading, validating or resolving configuration.
///
/// All of these are fatal and happen before any transfer starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("'{0}' must be set in the config file")]
    MissingField(&'static str),

    #[error("'{field}' must be one of [{allowed}], got '{value}'")]
    InvalidEnum {
        field: &'static str,
        value: String,
        allowed: &'static str,
    },

    #[error("'{field}' is invalid: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("invalid input location: {0}")]
    InvalidLocation(#[from] LocationError),

    #[error("unknown host '{0}': it must be defined under 'hosts'")]
    UnknownHost(String),

    #[error("host '{host}' uses unknown gateway '{gateway}': it must be defined under 'hosts'")]
    UnknownGateway { host: String, gateway: String },

    #[error("host '{host}' must specify '{field}'")]
    MissingRemoteField { host: String, field: &'static str },

    #[error("no password available for host '{host}': {reason}")]
    CredentialUnavailable { host: String, reason: String },

    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("config file must be a .yml or .yaml file: {0}")]
    UnsupportedFile(PathBuf),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// How eagerly the local cache is refreshed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// Refresh when the interval elapsed or the local cache is empty.
    #[default]
    Auto,
    /// Refresh on every run.
    Always,
    /// Refresh only when the interval elapsed.
    Manual,
}

impl RefreshMode {
    pub const ALLOWED: &'static str = "auto, always, manual";
}

impl FromStr for RefreshMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "always" => Ok(Self::Always),
            "manual" => Ok(Self::Manual),
            other => Err(ConfigError::InvalidEnum {
                field: "data_refresh_mode",
                value: other.to_string(),
                allowed: Self::ALLOWED,
            }),
        }
    }
}

impl fmt::Display for RefreshMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Always => write!(f, "always"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// A host entry as written in the config file.
///
/// Blank strings are treated the same as missing values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_gateway: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl HostConfig {
    pub fn location(&self) -> Option<&str> {
        non_blank(&self.location)
    }

    pub fn username(&self) -> Option<&str> {
        non_blank(&self.username)
    }

    /// Configured password. Not trimmed: whitespace may be significant.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    pub fn gateway(&self) -> Option<&str> {
        non_blank(&self.use_gateway)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SSH_PORT)
    }
}

/// `input_dir` may be a single specifier or a list of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Default, Deserialize)]
struct RawDirs {
    input_dir: Option<OneOrMany>,
    output_dir: Option<String>,
    work_dir: Option<String>,
}

/// Config file contents before validation.
#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    project_name: Option<String>,
    #[serde(default)]
    dir: Option<RawDirs>,
    #[serde(default)]
    data_refresh_mode: Option<String>,
    #[serde(default)]
    data_refresh_days: Option<f64>,
    #[serde(default)]
    hosts: Option<BTreeMap<String, HostConfig>>,
}

impl RawConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Err(ConfigError::Parse("configuration is empty".into()));
        }
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Validated sync configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfiguration {
    pub project_name: Option<String>,
    pub input_locations: Vec<LocationSpecifier>,
    pub output_dir: PathBuf,
    pub work_dir: PathBuf,
    pub refresh_mode: RefreshMode,
    pub refresh_interval_days: f64,
    pub hosts: BTreeMap<String, HostConfig>,
}

impl SyncConfiguration {
    /// Parse and validate YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        validate(RawConfig::from_yaml_str(content)?)
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yml") || e.eq_ignore_ascii_case("yaml"));
        if !is_yaml {
            return Err(ConfigError::UnsupportedFile(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&content)?;
        tracing::debug!(path = %path.display(), inputs = config.input_locations.len(), "loaded config");
        Ok(config)
    }

    /// Directory that receives fetched data.
    pub fn local_cache_dir(&self) -> PathBuf {
        self.work_dir.join(LOCAL_CACHE_DIR)
    }

    /// Remote locations in declaration order.
    pub fn remote_locations(&self) -> impl Iterator<Item = &LocationSpecifier> {
        self.input_locations.iter().filter(|l| !l.is_local())
    }
}

fn required_path(value: Option<String>, field: &'static str) -> Result<PathBuf, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(PathBuf::from(v.trim())),
        _ => Err(ConfigError::MissingField(field)),
    }
}

/// Validate raw config contents. Pure: touches neither disk nor network.
pub fn validate(raw: RawConfig) -> Result<SyncConfiguration, ConfigError> {
    let dirs = raw.dir.ok_or(ConfigError::MissingField("dir"))?;

    let inputs = match dirs.input_dir {
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(list)) => list,
        None => Vec::new(),
    };
    if inputs.is_empty() || inputs.iter().any(|s| s.trim().is_empty()) {
        return Err(ConfigError::MissingField("dir.input_dir"));
    }
    let output_dir = required_path(dirs.output_dir, "dir.output_dir")?;
    let work_dir = required_path(dirs.work_dir, "dir.work_dir")?;

    let input_locations = inputs
        .iter()
        .map(|s| LocationSpecifier::parse(s))
        .collect::<Result<Vec<_>, _>>()?;

    let refresh_mode = match raw.data_refresh_mode.as_deref() {
        Some(mode) => mode.trim().parse()?,
        None => RefreshMode::default(),
    };

    let refresh_interval_days = raw.data_refresh_days.unwrap_or(0.0);
    if !refresh_interval_days.is_finite() || refresh_interval_days < 0.0 {
        return Err(ConfigError::InvalidValue {
            field: "data_refresh_days",
            reason: format!("must be a non-negative number, got {refresh_interval_days}"),
        });
    }

    Ok(SyncConfiguration {
        project_name: raw.project_name.filter(|n| !n.trim().is_empty()),
        input_locations,
        output_dir,
        work_dir,
        refresh_mode,
        refresh_interval_days,
        hosts: raw.hosts.unwrap_or_default(),
    })
}

/// Pick the config file to use.
///
/// An explicit path wins; otherwise `config.yml` in `cwd` is used when present.
pub fn discover_config_file(explicit: Option<&Path>, cwd: &Path) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit.filter(|p| !p.as_os_str().is_empty()) {
        return Ok(path.to_path_buf());
    }
    let fallback = cwd.join(DEFAULT_CONFIG_FILE);
    if fallback.is_file() {
        Ok(fallback)
    } else {
        Err(ConfigError::NotFound(fallback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
dir:
  input_dir: /srv/raw
  output_dir: out
  work_dir: work
"#;

    #[test]
    fn test_defaults_applied() {
        let config = SyncConfiguration::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(config.refresh_mode, RefreshMode::Auto);
        assert_eq!(config.refresh_interval_days, 0.0);
        assert!(config.hosts.is_empty());
        assert_eq!(config.input_locations.len(), 1);
        assert_eq!(config.local_cache_dir(), PathBuf::from("work/data"));
    }

    #[test]
    fn test_input_dir_list_keeps_order() {
        let config = SyncConfiguration::from_yaml_str(
            r#"
dir:
  input_dir: [hostA:/b, /a]
  output_dir: out
  work_dir: work
hosts:
  hostA: { location: a.example.org, username: me }
"#,
        )
        .unwrap();
        assert_eq!(config.input_locations[0].host(), Some("hostA"));
        assert!(config.input_locations[1].is_local());
        assert_eq!(config.remote_locations().count(), 1);
    }

    #[test]
    fn test_missing_dir_fields() {
        for (yaml, field) in [
            ("data_refresh_mode: auto\n", "dir"),
            ("dir: { output_dir: o, work_dir: w }\n", "dir.input_dir"),
            ("dir: { input_dir: [], output_dir: o, work_dir: w }\n", "dir.input_dir"),
            ("dir: { input_dir: '', output_dir: o, work_dir: w }\n", "dir.input_dir"),
            ("dir: { input_dir: i, work_dir: w }\n", "dir.output_dir"),
            ("dir: { input_dir: i, output_dir: o, work_dir: '' }\n", "dir.work_dir"),
            // Missing directories are reported before malformed locations.
            ("dir: { input_dir: 'hostA:', work_dir: w }\n", "dir.output_dir"),
            ("dir: { input_dir: [':/data'], output_dir: o }\n", "dir.work_dir"),
        ] {
            match SyncConfiguration::from_yaml_str(yaml) {
                Err(ConfigError::MissingField(f)) => assert_eq!(f, field, "yaml: {yaml}"),
                other => panic!("expected MissingField({field}) for {yaml}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_invalid_refresh_mode() {
        let yaml = format!("{MINIMAL}data_refresh_mode: sometimes\n");
        let err = SyncConfiguration::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnum { ref value, .. } if value == "sometimes"));
        assert!(err.to_string().contains("data_refresh_mode"));
    }

    #[test]
    fn test_refresh_settings_parsed() {
        let yaml = format!("{MINIMAL}data_refresh_mode: manual\ndata_refresh_days: 30\n");
        let config = SyncConfiguration::from_yaml_str(&yaml).unwrap();
        assert_eq!(config.refresh_mode, RefreshMode::Manual);
        assert_eq!(config.refresh_interval_days, 30.0);
    }

    #[test]
    fn test_negative_refresh_days_rejected() {
        let yaml = format!("{MINIMAL}data_refresh_days: -1\n");
        assert!(matches!(
            SyncConfiguration::from_yaml_str(&yaml),
            Err(ConfigError::InvalidValue { field: "data_refresh_days", .. })
        ));
    }

    #[test]
    fn test_location_without_remote_path() {
        let yaml = "dir: { input_dir: 'hostA:', output_dir: o, work_dir: w }\n";
        assert!(matches!(
            SyncConfiguration::from_yaml_str(yaml),
            Err(ConfigError::InvalidLocation(LocationError::MissingRemotePath(_)))
        ));
    }

    #[test]
    fn test_host_blank_values() {
        let host = HostConfig {
            location: Some("  ".into()),
            username: Some("me".into()),
            password: Some(String::new()),
            use_gateway: Some(String::new()),
            port: None,
        };
        assert_eq!(host.location(), None);
        assert_eq!(host.username(), Some("me"));
        assert_eq!(host.password(), None);
        assert_eq!(host.gateway(), None);
        assert_eq!(host.port(), DEFAULT_SSH_PORT);
    }

    #[test]
    fn test_empty_document_rejected() {
        assert!(matches!(
            SyncConfiguration::from_yaml_str("\n  \n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_rejects_non_yaml_extension() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, MINIMAL).unwrap();
        assert!(matches!(
            SyncConfiguration::load(&path),
            Err(ConfigError::UnsupportedFile(_))
        ));
    }

    #[test]
    fn test_discover_config_file() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            discover_config_file(None, tmp.path()),
            Err(ConfigError::NotFound(_))
        ));

        std::fs::write(tmp.path().join(DEFAULT_CONFIG_FILE), MINIMAL).unwrap();
        let found = discover_config_file(None, tmp.path()).unwrap();
        assert_eq!(found, tmp.path().join(DEFAULT_CONFIG_FILE));

        let explicit = discover_config_file(Some(Path::new("other.yaml")), tmp.path()).unwrap();
        assert_eq!(explicit, PathBuf::from("other.yaml"));
    }
}
