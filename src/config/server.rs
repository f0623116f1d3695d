use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// `[server]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_host")]
    pub host: IpAddr,

    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,

    /// Request bodies are small JSON documents; anything larger is rejected
    /// with 413 before reaching a handler.
    #[serde(default = "ServerConfig::default_body_limit")]
    pub body_limit_bytes: usize,

    /// Header the upstream gateway uses to pass the authenticated tenant.
    #[serde(default = "ServerConfig::default_tenant_header")]
    pub tenant_header: String,
}

impl ServerConfig {
    fn default_host() -> IpAddr {
        IpAddr::from([0, 0, 0, 0])
    }

    fn default_port() -> u16 {
        8080
    }

    fn default_body_limit() -> usize {
        64 * 1024
    }

    fn default_tenant_header() -> String {
        "x-tenant-id".to_string()
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if http::HeaderName::from_bytes(self.tenant_header.as_bytes()).is_err() {
            return Err(ConfigError::Validation(format!(
                "server.tenant_header '{}' is not a valid header name",
                self.tenant_header
            )));
        }
        if self.body_limit_bytes == 0 {
            return Err(ConfigError::Validation(
                "server.body_limit_bytes must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            body_limit_bytes: Self::default_body_limit(),
            tenant_header: Self::default_tenant_header(),
        }
    }
}
