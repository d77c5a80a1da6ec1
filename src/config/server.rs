use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request body size limit in bytes.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Proxies whose forwarding headers are trusted for client IP extraction.
    #[serde(default)]
    pub trusted_proxies: TrustedProxiesConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
            timeout_secs: default_timeout(),
            trusted_proxies: TrustedProxiesConfig::default(),
        }
    }
}

impl ServerConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.body_limit_bytes == 0 {
            return Err(ConfigError::Validation(
                "server.body_limit_bytes must be greater than zero".into(),
            ));
        }
        self.trusted_proxies.validate()
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    3000
}

fn default_body_limit() -> usize {
    1024 * 1024 // 1 MiB, SAML responses are well under this
}

fn default_timeout() -> u64 {
    30
}

/// Trusted reverse proxies.
///
/// Login attempts and sessions record the client IP. Forwarding headers are
/// only honored when the connecting peer is one of these networks; otherwise
/// the socket address is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustedProxiesConfig {
    /// Trust forwarding headers from any peer. Only for deployments that are
    /// exclusively reachable through a proxy.
    #[serde(default)]
    pub dangerously_trust_all: bool,

    /// CIDR ranges of trusted proxies.
    #[serde(default)]
    pub cidrs: Vec<String>,

    /// Header carrying the client IP chain.
    #[serde(default = "default_real_ip_header")]
    pub real_ip_header: String,
}

impl Default for TrustedProxiesConfig {
    fn default() -> Self {
        Self {
            dangerously_trust_all: false,
            cidrs: Vec::new(),
            real_ip_header: default_real_ip_header(),
        }
    }
}

impl TrustedProxiesConfig {
    pub fn is_configured(&self) -> bool {
        self.dangerously_trust_all || !self.cidrs.is_empty()
    }

    /// Parsed CIDRs. Invalid entries are rejected by `validate`, so they are
    /// silently skipped here.
    pub fn parsed_cidrs(&self) -> Vec<IpNet> {
        self.cidrs.iter().filter_map(|c| c.parse().ok()).collect()
    }

    pub fn is_trusted_ip(&self, ip: IpAddr, cidrs: &[IpNet]) -> bool {
        cidrs.iter().any(|net| net.contains(&ip))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for cidr in &self.cidrs {
            cidr.parse::<IpNet>().map_err(|e| {
                ConfigError::Validation(format!("Invalid trusted proxy CIDR '{}': {}", cidr, e))
            })?;
        }
        Ok(())
    }
}

fn default_real_ip_header() -> String {
    "X-Forwarded-For".to_string()
}
