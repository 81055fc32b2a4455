//! SSH sessions and SFTP retrieval on top of `ssh2`.
//!
//! Sessions authenticate with a password. Host keys are checked against
//! `~/.ssh/known_hosts`: a mismatch fails the connection, an unknown host is
//! accepted with a warning (the equivalent of `StrictHostKeyChecking=accept-new`
//! without writing the file).

use std::fs::File;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ssh2::{CheckResult, ErrorCode, FileStat, KnownHostFileKind, Session, Sftp};

use super::resolve::{ConnectionPlan, GatewayPlan};
use super::transport::{TransferStats, TransportError};

/// `LIBSSH2_FX_NO_SUCH_FILE`
const SFTP_NO_SUCH_FILE: i32 = 2;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Where to dial, and who we expect to be talking to.
pub struct Endpoint<'a> {
    /// Address actually dialed (the host, or the local end of a tunnel).
    pub dial_host: String,
    pub dial_port: u16,
    /// Host identity used for host-key checks and error messages.
    pub host: &'a str,
    pub port: u16,
    pub username: &'a str,
    pub password: &'a str,
}

impl<'a> Endpoint<'a> {
    pub fn direct(plan: &'a ConnectionPlan) -> Self {
        Self {
            dial_host: plan.location.clone(),
            dial_port: plan.port,
            host: &plan.location,
            port: plan.port,
            username: &plan.username,
            password: &plan.password,
        }
    }

    /// Dial the local end of a tunnel while checking the remote host's key.
    pub fn through_tunnel(plan: &'a ConnectionPlan, local_port: u16) -> Self {
        Self {
            dial_host: "127.0.0.1".to_string(),
            dial_port: local_port,
            ..Self::direct(plan)
        }
    }

    pub fn gateway(gateway: &'a GatewayPlan) -> Self {
        Self {
            dial_host: gateway.location.clone(),
            dial_port: gateway.port,
            host: &gateway.location,
            port: gateway.port,
            username: &gateway.username,
            password: &gateway.password,
        }
    }

    fn connection_failed(&self, reason: impl ToString) -> TransportError {
        TransportError::ConnectionFailed {
            host: self.host.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Open an authenticated session.
pub fn connect(endpoint: &Endpoint<'_>, timeout: Duration) -> Result<Session, TransportError> {
    let addr = (endpoint.dial_host.as_str(), endpoint.dial_port)
        .to_socket_addrs()
        .map_err(|e| endpoint.connection_failed(e))?
        .next()
        .ok_or_else(|| endpoint.connection_failed("address did not resolve"))?;

    tracing::debug!(
        host = endpoint.host,
        dial = %addr,
        user = endpoint.username,
        "connecting"
    );
    let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| endpoint.connection_failed(e))?;

    let mut session = Session::new().map_err(|e| endpoint.connection_failed(e))?;
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| endpoint.connection_failed(format!("SSH handshake failed: {e}")))?;

    verify_host_key(&session, endpoint)?;

    let auth_failed = || TransportError::AuthenticationFailed {
        host: endpoint.host.to_string(),
        user: endpoint.username.to_string(),
    };
    session
        .userauth_password(endpoint.username, endpoint.password)
        .map_err(|_| auth_failed())?;
    if !session.authenticated() {
        return Err(auth_failed());
    }

    Ok(session)
}

fn known_hosts_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
}

fn verify_host_key(session: &Session, endpoint: &Endpoint<'_>) -> Result<(), TransportError> {
    let Some(path) = known_hosts_path().filter(|p| p.is_file()) else {
        tracing::debug!(host = endpoint.host, "no known_hosts file, skipping host key check");
        return Ok(());
    };

    let mut known = session
        .known_hosts()
        .map_err(|e| endpoint.connection_failed(e))?;
    if let Err(e) = known.read_file(&path, KnownHostFileKind::OpenSSH) {
        tracing::warn!(path = %path.display(), error = %e, "could not read known_hosts");
        return Ok(());
    }

    let (key, _) = session
        .host_key()
        .ok_or_else(|| endpoint.connection_failed("server sent no host key"))?;

    match known.check_port(endpoint.host, endpoint.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => Err(endpoint.connection_failed(format!(
            "host key does not match {}",
            path.display()
        ))),
        CheckResult::NotFound => {
            tracing::warn!(host = endpoint.host, "host key not in known_hosts, accepting");
            Ok(())
        }
        CheckResult::Failure => {
            tracing::warn!(host = endpoint.host, "host key check failed, accepting");
            Ok(())
        }
    }
}

/// Map a `~`-relative remote path onto SFTP's login-directory-relative paths.
///
/// `~user/...` is left untouched.
pub fn sftp_path(remote_path: &str) -> &str {
    if remote_path == "~" {
        "."
    } else if let Some(rest) = remote_path.strip_prefix("~/") {
        if rest.is_empty() { "." } else { rest }
    } else {
        remote_path
    }
}

/// Local name for a fetched remote path (`/` and `~` become `root`).
fn local_name(remote: &Path) -> PathBuf {
    match remote.file_name() {
        Some(name) if name != "." => PathBuf::from(name),
        _ => PathBuf::from("root"),
    }
}

fn sftp_error(e: ssh2::Error, remote: &Path) -> TransportError {
    if matches!(e.code(), ErrorCode::SFTP(SFTP_NO_SUCH_FILE)) {
        TransportError::SourceNotFound(remote.display().to_string())
    } else {
        TransportError::Io(std::io::Error::other(format!(
            "{}: {}",
            remote.display(),
            e
        )))
    }
}

/// Retrieve `remote_path` recursively into `destination`.
///
/// Like `scp -r`, a remote directory lands under `destination/<basename>`.
pub fn fetch_recursive(
    session: &Session,
    remote_path: &str,
    destination: &Path,
) -> Result<TransferStats, TransportError> {
    let sftp = session.sftp().map_err(|e| TransportError::ConnectionFailed {
        host: remote_path.to_string(),
        reason: format!("SFTP subsystem unavailable: {e}"),
    })?;

    let remote = Path::new(sftp_path(remote_path));
    let stat = sftp.stat(remote).map_err(|e| sftp_error(e, remote))?;

    std::fs::create_dir_all(destination)?;
    let target = destination.join(local_name(remote));
    let mut stats = TransferStats::default();

    if stat.is_dir() {
        fetch_dir(&sftp, remote, &target, &mut stats)?;
    } else {
        fetch_file(&sftp, remote, &target, &stat, &mut stats)?;
    }

    tracing::info!(
        remote_path,
        files = stats.files,
        bytes = stats.bytes,
        "fetch completed"
    );
    Ok(stats)
}

fn fetch_dir(
    sftp: &Sftp,
    remote: &Path,
    target: &Path,
    stats: &mut TransferStats,
) -> Result<(), TransportError> {
    std::fs::create_dir_all(target)?;

    for (path, stat) in sftp.readdir(remote).map_err(|e| sftp_error(e, remote))? {
        let Some(name) = path.file_name() else {
            continue;
        };
        if name == "." || name == ".." {
            continue;
        }

        let stat = if stat.file_type().is_symlink() {
            match sftp.stat(&path) {
                Ok(resolved) => resolved,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping broken symlink");
                    continue;
                }
            }
        } else {
            stat
        };

        let child = target.join(name);
        if stat.is_dir() {
            fetch_dir(sftp, &path, &child, stats)?;
        } else if stat.is_file() {
            fetch_file(sftp, &path, &child, &stat, stats)?;
        }
    }
    Ok(())
}

fn fetch_file(
    sftp: &Sftp,
    remote: &Path,
    target: &Path,
    stat: &FileStat,
    stats: &mut TransferStats,
) -> Result<(), TransportError> {
    let mut input = sftp.open(remote).map_err(|e| sftp_error(e, remote))?;
    let mut output = File::create(target)?;
    let size = stat.size.unwrap_or(0);

    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut received: u64 = 0;
    let mut last_reported = 0;
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        output.write_all(&buf[..n])?;
        received += n as u64;

        let pct = progress_pct(received, size);
        if pct >= last_reported + 10 {
            last_reported = pct;
            tracing::debug!(file = %remote.display(), progress = pct, "receiving");
        }
    }
    output.flush()?;

    stats.add_file(received);
    Ok(())
}

fn progress_pct(received: u64, size: u64) -> u64 {
    if size == 0 {
        100
    } else {
        (received.saturating_mul(100) / size).min(100)
    }
}
