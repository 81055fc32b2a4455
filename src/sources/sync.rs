//! Sync engine for refreshing the local data cache.
//!
//! For every configured input location, in declaration order, the engine picks
//! one of three strategies (local copy, direct SSH fetch, gateway-relayed SSH
//! fetch), runs it when the cache is stale, and records the outcome. Transfer
//! failures do not abort the run: the remaining locations are still processed
//! and the failure shows up in the [`SyncReport`].
//!
//! # Staleness record
//!
//! With the default [`StampPolicy::OnSuccess`] the record is rewritten only
//! after a refresh in which every location succeeded, so a failed or partial
//! sync is retried on the next run. [`StampPolicy::EveryAttempt`] rewrites it
//! after every location regardless of outcome.
//!
//! # Example
//!
//! ```rust,ignore
//! use rproj::sources::{HostResolver, InteractivePrompt, SyncConfiguration, SyncEngine, SystemTransport};
//!
//! let config = SyncConfiguration::load(Path::new("config.yml"))?;
//! let plans = HostResolver::new(InteractivePrompt::new()).resolve(&config)?;
//! let report = SyncEngine::new(SystemTransport::new()).run(&config, &plans)?;
//! println!("{} of {} locations failed", report.failed_locations(), report.locations.len());
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use super::config::{ConfigError, SyncConfiguration};
use super::location::LocationSpecifier;
use super::resolve::{ConnectionPlan, HostPlans};
use super::staleness::{self, SyncDecision};
use super::transport::{FetchSource, Transport};

/// Errors that abort a sync run.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no connection plan resolved for host '{0}'")]
    UnresolvedHost(String),

    #[error("failed to access staleness record in {path}: {source}")]
    Record {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create directory {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Transport strategy used for a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Recursive copy from the local filesystem.
    LocalCopy,
    /// SSH straight to the host.
    Direct,
    /// SSH through a gateway port forward.
    Gateway,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalCopy => write!(f, "local"),
            Self::Direct => write!(f, "direct"),
            Self::Gateway => write!(f, "gateway"),
        }
    }
}

/// What happened to one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferOutcome {
    Fetched { files: u64, bytes: u64 },
    /// The cache was fresh; no transfer was attempted.
    Skipped,
    Failed { error: String },
}

/// Result for a single input location.
#[derive(Debug, Clone, Serialize)]
pub struct LocationReport {
    /// Location as written in the config.
    pub location: String,
    pub strategy: Strategy,
    pub outcome: TransferOutcome,
    pub duration_ms: u64,
}

/// Report from a whole sync run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub decision: SyncDecision,
    pub locations: Vec<LocationReport>,
    /// Epoch seconds written to the staleness record, if it was written.
    pub record_written: Option<i64>,
}

impl SyncReport {
    pub fn new(decision: SyncDecision) -> Self {
        Self {
            decision,
            locations: Vec::new(),
            record_written: None,
        }
    }

    /// Whether no location failed.
    pub fn all_succeeded(&self) -> bool {
        self.failed_locations() == 0
    }

    pub fn failed_locations(&self) -> usize {
        self.locations
            .iter()
            .filter(|l| matches!(l.outcome, TransferOutcome::Failed { .. }))
            .count()
    }

    pub fn total_files(&self) -> u64 {
        self.locations
            .iter()
            .map(|l| match l.outcome {
                TransferOutcome::Fetched { files, .. } => files,
                _ => 0,
            })
            .sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.locations
            .iter()
            .map(|l| match l.outcome {
                TransferOutcome::Fetched { bytes, .. } => bytes,
                _ => 0,
            })
            .sum()
    }
}

/// When the staleness record is rewritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StampPolicy {
    /// After a refresh in which every location succeeded.
    #[default]
    OnSuccess,
    /// After every location, whatever happened.
    EveryAttempt,
}

/// Runs the per-location sync loop.
pub struct SyncEngine<T> {
    transport: T,
    stamp_policy: StampPolicy,
    clock: fn() -> i64,
}

impl<T: Transport> SyncEngine<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            stamp_policy: StampPolicy::default(),
            clock: staleness::now_epoch,
        }
    }

    pub fn with_stamp_policy(mut self, policy: StampPolicy) -> Self {
        self.stamp_policy = policy;
        self
    }

    /// Replace the epoch-seconds clock.
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// Sync every input location into the local cache.
    ///
    /// Directories must already exist (see [`crate::project::prepare_directories`])
    /// and every remote host must have a plan in `plans`.
    pub fn run(
        &self,
        config: &SyncConfiguration,
        plans: &HostPlans,
    ) -> Result<SyncReport, SyncError> {
        let cache_dir = config.local_cache_dir();
        let decision = staleness::is_stale(
            &config.work_dir,
            config.refresh_mode,
            config.refresh_interval_days,
            &cache_dir,
            (self.clock)(),
        )
        .map_err(|source| self.record_error(config, source))?;

        tracing::debug!(
            input = config.input_locations.len(),
            output = %config.output_dir.display(),
            cache = %cache_dir.display(),
            work = %config.work_dir.display(),
            "starting sync"
        );
        if decision.should_refresh {
            tracing::info!(reason = %decision.reason, "downloading new data");
        }

        let mut report = SyncReport::new(decision);
        for location in &config.input_locations {
            let started = Instant::now();
            let (strategy, source) = select_strategy(location, plans)?;

            let outcome = if decision.should_refresh {
                match self.transport.fetch(&source, &cache_dir) {
                    Ok(stats) => TransferOutcome::Fetched {
                        files: stats.files,
                        bytes: stats.bytes,
                    },
                    Err(e) => {
                        tracing::warn!(location = %location, %strategy, error = %e, "fetch failed");
                        TransferOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                }
            } else {
                tracing::info!(location = %location, "using local data files, not attempting download");
                TransferOutcome::Skipped
            };

            report.locations.push(LocationReport {
                location: location.to_string(),
                strategy,
                outcome,
                duration_ms: started.elapsed().as_millis() as u64,
            });

            if self.stamp_policy == StampPolicy::EveryAttempt {
                report.record_written = Some(self.stamp(config)?);
            }
        }

        if self.stamp_policy == StampPolicy::OnSuccess && decision.should_refresh {
            if report.all_succeeded() {
                report.record_written = Some(self.stamp(config)?);
            } else {
                tracing::warn!(
                    failed = report.failed_locations(),
                    "leaving last update unchanged so the next run retries"
                );
            }
        }

        tracing::info!(
            files = report.total_files(),
            bytes = report.total_bytes(),
            failed = report.failed_locations(),
            "finished fetching files"
        );
        Ok(report)
    }

    fn stamp(&self, config: &SyncConfiguration) -> Result<i64, SyncError> {
        let now = (self.clock)();
        staleness::write_record(&config.work_dir, now)
            .map_err(|source| self.record_error(config, source))?;
        Ok(now)
    }

    fn record_error(&self, config: &SyncConfiguration, source: io::Error) -> SyncError {
        SyncError::Record {
            path: staleness::record_path(&config.work_dir),
            source,
        }
    }
}

/// Pick the strategy for a location and build its fetch source.
pub fn select_strategy<'a>(
    location: &'a LocationSpecifier,
    plans: &'a HostPlans,
) -> Result<(Strategy, FetchSource<'a>), SyncError> {
    match location {
        LocationSpecifier::Local { path } => Ok((Strategy::LocalCopy, FetchSource::Local(path))),
        LocationSpecifier::Remote { host, path } => {
            let plan: &ConnectionPlan = plans
                .get(host.as_str())
                .map(Arc::as_ref)
                .ok_or_else(|| SyncError::UnresolvedHost(host.clone()))?;
            Ok(match &plan.gateway {
                Some(gateway) => (
                    Strategy::Gateway,
                    FetchSource::Gateway {
                        plan,
                        gateway,
                        remote_path: path,
                    },
                ),
                None => (
                    Strategy::Direct,
                    FetchSource::Direct {
                        plan,
                        remote_path: path,
                    },
                ),
            })
        }
    }
}
