//! Host resolution: turns configured hosts into ready-to-use connection plans.
//!
//! Each distinct host referenced by an input location is resolved once per
//! run. Missing passwords are obtained from a [`CredentialProvider`], so a
//! host used by several locations prompts at most once. Gateways inherit the
//! remote host's resolved username and password when their own are blank.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::config::{ConfigError, HostConfig, SyncConfiguration};

/// Resolved plans keyed by host name.
pub type HostPlans = BTreeMap<String, Arc<ConnectionPlan>>;

/// Credential-complete description of how to reach a host.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionPlan {
    pub host_name: String,
    pub location: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub gateway: Option<GatewayPlan>,
}

impl ConnectionPlan {
    pub fn uses_gateway(&self) -> bool {
        self.gateway.is_some()
    }
}

/// Jump host used to reach a [`ConnectionPlan`]'s host.
#[derive(Clone, PartialEq, Eq)]
pub struct GatewayPlan {
    pub host_name: String,
    pub location: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ConnectionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPlan")
            .field("host_name", &self.host_name)
            .field("location", &self.location)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("gateway", &self.gateway)
            .finish()
    }
}

impl fmt::Debug for GatewayPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayPlan")
            .field("host_name", &self.host_name)
            .field("location", &self.location)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What the credential provider is asked for.
#[derive(Debug, Clone, Copy)]
pub struct CredentialRequest<'a> {
    pub host_name: &'a str,
    pub location: &'a str,
    pub username: &'a str,
}

/// Errors from a credential provider.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("password prompt cancelled")]
    Cancelled,

    #[error("interactive prompts are disabled")]
    Disabled,

    #[error("prompt failed: {0}")]
    Io(String),
}

/// Source of passwords for hosts that do not configure one.
pub trait CredentialProvider {
    fn password(&mut self, request: &CredentialRequest<'_>) -> Result<String, CredentialError>;
}

/// Provider that only accepts passwords written in the config file.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigOnly;

impl CredentialProvider for ConfigOnly {
    fn password(&mut self, _request: &CredentialRequest<'_>) -> Result<String, CredentialError> {
        Err(CredentialError::Disabled)
    }
}

/// Resolves hosts into [`ConnectionPlan`]s and caches them by host name.
pub struct HostResolver<P> {
    provider: P,
    cache: HashMap<String, Arc<ConnectionPlan>>,
}

impl<P: CredentialProvider> HostResolver<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            cache: HashMap::new(),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Resolve every host referenced by the configured input locations.
    ///
    /// Every referenced host, and its gateway, is checked for the fields a
    /// connection needs before any password is requested.
    pub fn resolve(&mut self, config: &SyncConfiguration) -> Result<HostPlans, ConfigError> {
        let mut needed: Vec<&str> = Vec::new();
        for host in config.remote_locations().filter_map(|l| l.host()) {
            if !config.hosts.contains_key(host) {
                return Err(ConfigError::UnknownHost(host.to_string()));
            }
            if needed.contains(&host) {
                tracing::debug!(host, "host already queued for resolution");
            } else {
                needed.push(host);
            }
        }

        for host in &needed {
            check_host(host, config)?;
        }

        let mut plans = HostPlans::new();
        for host in needed {
            let plan = self.resolve_host(host, config)?;
            plans.insert(host.to_string(), plan);
        }
        Ok(plans)
    }

    /// Resolve a single host, reusing the cached plan when present.
    pub fn resolve_host(
        &mut self,
        host_name: &str,
        config: &SyncConfiguration,
    ) -> Result<Arc<ConnectionPlan>, ConfigError> {
        if let Some(plan) = self.cache.get(host_name) {
            return Ok(Arc::clone(plan));
        }

        let host = check_host(host_name, config)?;

        let location = require(host.location(), host_name, "location")?;
        let username = require(host.username(), host_name, "username")?;
        let password = match host.password() {
            Some(p) => p.to_string(),
            None => self.request_password(host_name, &location, &username)?,
        };

        let gateway = match host.gateway() {
            Some(gateway_name) => Some(resolve_gateway(
                host_name,
                gateway_name,
                config,
                &username,
                &password,
            )?),
            None => None,
        };

        let plan = Arc::new(ConnectionPlan {
            host_name: host_name.to_string(),
            location,
            port: host.port(),
            username,
            password,
            gateway,
        });
        tracing::debug!(host = host_name, gateway = plan.uses_gateway(), "resolved host");
        self.cache.insert(host_name.to_string(), Arc::clone(&plan));
        Ok(plan)
    }

    fn request_password(
        &mut self,
        host_name: &str,
        location: &str,
        username: &str,
    ) -> Result<String, ConfigError> {
        let request = CredentialRequest {
            host_name,
            location,
            username,
        };
        let unavailable = |reason: String| ConfigError::CredentialUnavailable {
            host: host_name.to_string(),
            reason,
        };

        let password = self
            .provider
            .password(&request)
            .map_err(|e| unavailable(e.to_string()))?;
        if password.is_empty() {
            return Err(unavailable("empty password".into()));
        }
        Ok(password)
    }
}

/// Check everything about a host that does not need a password.
fn check_host<'c>(
    host_name: &str,
    config: &'c SyncConfiguration,
) -> Result<&'c HostConfig, ConfigError> {
    let host = config
        .hosts
        .get(host_name)
        .ok_or_else(|| ConfigError::UnknownHost(host_name.to_string()))?;
    require(host.location(), host_name, "location")?;
    require(host.username(), host_name, "username")?;

    if let Some(gateway_name) = host.gateway() {
        let gateway = config
            .hosts
            .get(gateway_name)
            .ok_or_else(|| ConfigError::UnknownGateway {
                host: host_name.to_string(),
                gateway: gateway_name.to_string(),
            })?;
        require(gateway.location(), gateway_name, "location")?;
    }
    Ok(host)
}

fn require(value: Option<&str>, host: &str, field: &'static str) -> Result<String, ConfigError> {
    value
        .map(str::to_string)
        .ok_or_else(|| ConfigError::MissingRemoteField {
            host: host.to_string(),
            field,
        })
}

fn resolve_gateway(
    host_name: &str,
    gateway_name: &str,
    config: &SyncConfiguration,
    username: &str,
    password: &str,
) -> Result<GatewayPlan, ConfigError> {
    let gateway: &HostConfig =
        config
            .hosts
            .get(gateway_name)
            .ok_or_else(|| ConfigError::UnknownGateway {
                host: host_name.to_string(),
                gateway: gateway_name.to_string(),
            })?;

    let location = require(gateway.location(), gateway_name, "location")?;
    let username = match gateway.username() {
        Some(u) => u.to_string(),
        None => {
            tracing::info!(gateway = gateway_name, "using same username for gateway and remote");
            username.to_string()
        }
    };
    let password = match gateway.password() {
        Some(p) => p.to_string(),
        None => {
            tracing::info!(gateway = gateway_name, "using same password for gateway and remote");
            password.to_string()
        }
    };

    Ok(GatewayPlan {
        host_name: gateway_name.to_string(),
        location,
        port: gateway.port(),
        username,
        password,
    })
}
