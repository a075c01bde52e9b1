use crate::{ConfigError, FromEnv, env_or_default, env_parse};
use std::net::Ipv4Addr;

/// Listener for the worker's `/metrics` and `/health` endpoints
#[derive(Clone, Debug)]
pub struct MetricsServerConfig {
    pub host: String,
    pub port: u16,
}

impl MetricsServerConfig {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromEnv for MetricsServerConfig {
    /// Reads from environment variables:
    /// - METRICS_HOST: defaults to 0.0.0.0 (all interfaces)
    /// - METRICS_PORT: defaults to 9100
    fn from_env() -> Result<Self, ConfigError> {
        let host = env_or_default("METRICS_HOST", &Ipv4Addr::UNSPECIFIED.to_string());
        let port = env_parse("METRICS_PORT", 9100)?;

        Ok(Self { host, port })
    }
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::UNSPECIFIED.to_string(),
            port: 9100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_config_defaults() {
        temp_env::with_vars(
            [("METRICS_HOST", None::<&str>), ("METRICS_PORT", None::<&str>)],
            || {
                let config = MetricsServerConfig::from_env().unwrap();
                assert_eq!(config.address(), "0.0.0.0:9100");
            },
        );
    }

    #[test]
    fn test_metrics_server_config_custom_port() {
        temp_env::with_vars(
            [("METRICS_HOST", Some("127.0.0.1")), ("METRICS_PORT", Some("9464"))],
            || {
                let config = MetricsServerConfig::from_env().unwrap();
                assert_eq!(config.host, "127.0.0.1");
                assert_eq!(config.port, 9464);
            },
        );
    }

    #[test]
    fn test_metrics_server_config_port_out_of_range() {
        temp_env::with_var("METRICS_PORT", Some("99999"), || {
            let err = MetricsServerConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("METRICS_PORT"));
        });
    }
}
