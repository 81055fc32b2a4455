//! The fetch capability and its three strategies.
//!
//! The sync engine only decides what to fetch and through which path; the
//! bytes are moved by a [`Transport`]. [`SystemTransport`] is the real
//! implementation: a recursive filesystem copy for local inputs and SFTP over
//! `ssh2` for remote ones, optionally through a gateway tunnel.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use super::local_copy;
use super::resolve::{ConnectionPlan, GatewayPlan};
use super::ssh;
use super::tunnel::Tunnel;

/// Errors from a single fetch. These never abort the whole run.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("source not found: {0}")]
    SourceNotFound(String),

    #[error("connection to {host} failed: {reason}")]
    ConnectionFailed { host: String, reason: String },

    #[error("authentication failed for {user}@{host}")]
    AuthenticationFailed { host: String, user: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a fetch reads from.
#[derive(Debug, Clone, Copy)]
pub enum FetchSource<'a> {
    /// Local file or directory.
    Local(&'a Path),
    /// Remote path reached by connecting to the host directly.
    Direct {
        plan: &'a ConnectionPlan,
        remote_path: &'a str,
    },
    /// Remote path reached through a port forward on a gateway host.
    Gateway {
        plan: &'a ConnectionPlan,
        gateway: &'a GatewayPlan,
        remote_path: &'a str,
    },
}

/// Totals for one fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub files: u64,
    pub bytes: u64,
}

impl TransferStats {
    pub fn add_file(&mut self, bytes: u64) {
        self.files += 1;
        self.bytes += bytes;
    }
}

/// Moves data from a [`FetchSource`] into a destination directory.
pub trait Transport {
    fn fetch(
        &self,
        source: &FetchSource<'_>,
        destination: &Path,
    ) -> Result<TransferStats, TransportError>;
}

/// Filesystem and SSH transport.
#[derive(Debug, Clone)]
pub struct SystemTransport {
    /// TCP connect and SSH operation timeout.
    connection_timeout: Duration,
}

impl Default for SystemTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemTransport {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

    pub fn new() -> Self {
        Self {
            connection_timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_connection_timeout(mut self, seconds: u64) -> Self {
        self.connection_timeout = Duration::from_secs(seconds);
        self
    }
}

impl Transport for SystemTransport {
    fn fetch(
        &self,
        source: &FetchSource<'_>,
        destination: &Path,
    ) -> Result<TransferStats, TransportError> {
        match *source {
            FetchSource::Local(path) => {
                tracing::info!(
                    source = %path.display(),
                    dest = %destination.display(),
                    "copying local files"
                );
                local_copy::copy_recursive(path, destination)
            }
            FetchSource::Direct { plan, remote_path } => {
                tracing::info!(host = %plan.host_name, remote_path, "copying files from server");
                let endpoint = ssh::Endpoint::direct(plan);
                let session = ssh::connect(&endpoint, self.connection_timeout)?;
                ssh::fetch_recursive(&session, remote_path, destination)
            }
            FetchSource::Gateway {
                plan,
                gateway,
                remote_path,
            } => {
                tracing::info!(
                    host = %plan.host_name,
                    gateway = %gateway.host_name,
                    remote_path,
                    "copying files through gateway"
                );
                let tunnel = Tunnel::open(gateway, plan, self.connection_timeout)?;
                let endpoint = ssh::Endpoint::through_tunnel(plan, tunnel.local_port());
                let fetched = ssh::connect(&endpoint, self.connection_timeout)
                    .and_then(|session| ssh::fetch_recursive(&session, remote_path, destination));
                let closed = tunnel.close();
                match (fetched, closed) {
                    (Ok(stats), Ok(())) => Ok(stats),
                    (Ok(stats), Err(e)) => {
                        tracing::warn!(gateway = %gateway.host_name, error = %e, "tunnel closed with error");
                        Ok(stats)
                    }
                    // A forwarding error usually explains why the fetch failed.
                    (Err(_), Err(e @ TransportError::ConnectionFailed { .. })) => Err(e),
                    (Err(e), _) => Err(e),
                }
            }
        }
    }
}
