//! Input sources and the sync pipeline for a project's local data cache.
//!
//! # Architecture
//!
//! - **location**: `host:path` / local path specifiers
//! - **config**: YAML config model and validation
//! - **resolve**: host → [`ConnectionPlan`] resolution with credential prompting
//! - **staleness**: last-sync record and the refresh decision
//! - **transport**: the fetch capability (local copy, direct SSH, gateway SSH)
//! - **sync**: the per-location sync loop and its report
//! - **interactive**: terminal password prompt and summary output
//!
//! # Configuration
//!
//! ```yaml
//! dir:
//!   input_dir: [/srv/raw, cluster:/scratch/exports]
//!   output_dir: out
//!   work_dir: work
//! data_refresh_mode: auto
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
//! # Syncing
//!
//! ```rust,ignore
//! use rproj::sources::{HostResolver, InteractivePrompt, SyncConfiguration, SyncEngine, SystemTransport};
//!
//! let config = SyncConfiguration::load(Path::new("config.yml"))?;
//! let plans = HostResolver::new(InteractivePrompt::new()).resolve(&config)?;
//! rproj::project::prepare_directories(&config)?;
//! let report = SyncEngine::new(SystemTransport::new()).run(&config, &plans)?;
//! ```

pub mod config;
pub mod interactive;
pub mod local_copy;
pub mod location;
pub mod resolve;
pub mod ssh;
pub mod staleness;
pub mod sync;
pub mod transport;
pub mod tunnel;

// Re-export commonly used config types
pub use config::{ConfigError, HostConfig, RefreshMode, SyncConfiguration, discover_config_file};

// Re-export commonly used resolution types
pub use location::{LocationError, LocationSpecifier};
pub use resolve::{
    ConfigOnly, ConnectionPlan, CredentialError, CredentialProvider, CredentialRequest,
    GatewayPlan, HostPlans, HostResolver,
};

// Re-export commonly used sync types
pub use interactive::{InteractivePrompt, format_report};
pub use staleness::{RefreshReason, SyncDecision};
pub use sync::{
    LocationReport, StampPolicy, Strategy, SyncEngine, SyncError, SyncReport, TransferOutcome,
};
pub use transport::{FetchSource, SystemTransport, TransferStats, Transport, TransportError};
