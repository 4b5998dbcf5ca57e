use std::{env, net::SocketAddr, time::Duration};

use thiserror::Error;

use crate::transport::stdio::{EofPolicy, Framing};

pub const DEFAULT_WEATHER_API_BASE_URL: &str = "https://api.weatherapi.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Http,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub transport: TransportKind,
    pub bind_addr: String,
    pub bind_port: u16,
    pub secret_key: String,
    pub call_timeout: Duration,
    pub stdio_framing: Framing,
    pub stdio_eof: EofPolicy,
    pub weather_api_key: Option<String>,
    pub weather_api_base_url: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MCP_SECRET_KEY is required and must not be empty")]
    MissingSecretKey,
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("invalid bind address or port")]
    InvalidSocket,
    #[error("MCP_TRANSPORT must be `stdio` or `http`")]
    InvalidTransport,
    #[error("MCP_CALL_TIMEOUT_MS must be a positive number of milliseconds")]
    InvalidTimeout,
    #[error("MCP_STDIO_FRAMING must be `newline` or `content-length`")]
    InvalidFraming,
    #[error("MCP_STDIO_ON_EOF must be `cancel` or `drain`")]
    InvalidEofPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let value = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let secret_key = value("MCP_SECRET_KEY").ok_or(ConfigError::MissingSecretKey)?;

        let transport = match value("MCP_TRANSPORT")
            .map(|value| value.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("stdio") => TransportKind::Stdio,
            Some("http") => TransportKind::Http,
            Some(_) => return Err(ConfigError::InvalidTransport),
        };

        let bind_addr = value("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = value("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);

        let call_timeout = value("MCP_CALL_TIMEOUT_MS")
            .map(|value| {
                value
                    .parse::<u64>()
                    .ok()
                    .filter(|millis| *millis > 0)
                    .map(Duration::from_millis)
                    .ok_or(ConfigError::InvalidTimeout)
            })
            .transpose()?
            .unwrap_or(Duration::from_secs(30));

        let stdio_framing = match value("MCP_STDIO_FRAMING")
            .map(|value| value.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("newline") => Framing::Newline,
            Some("content-length") => Framing::ContentLength,
            Some(_) => return Err(ConfigError::InvalidFraming),
        };

        let stdio_eof = match value("MCP_STDIO_ON_EOF")
            .map(|value| value.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("cancel") => EofPolicy::Cancel,
            Some("drain") => EofPolicy::Drain,
            Some(_) => return Err(ConfigError::InvalidEofPolicy),
        };

        let config = Self {
            transport,
            bind_addr,
            bind_port,
            secret_key,
            call_timeout,
            stdio_framing,
            stdio_eof,
            weather_api_key: value("WEATHER_API_KEY"),
            weather_api_base_url: value("WEATHER_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_WEATHER_API_BASE_URL.to_string()),
        };

        if config.transport == TransportKind::Http {
            let _ = config.bind_socket()?;
        }
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn parse(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn parse_defaults() {
        let config = parse(&[("MCP_SECRET_KEY", "abc")]).expect("config should parse");

        assert_eq!(config.transport, TransportKind::Stdio);
        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.bind_port, 8080);
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        assert_eq!(config.stdio_framing, Framing::Newline);
        assert_eq!(config.stdio_eof, EofPolicy::Cancel);
        assert_eq!(config.weather_api_key, None);
        assert_eq!(config.weather_api_base_url, DEFAULT_WEATHER_API_BASE_URL);
    }

    #[test]
    fn missing_secret_fails() {
        let err = parse(&[("MCP_SECRET_KEY", "   ")]).expect_err("expected missing secret error");
        assert!(matches!(err, ConfigError::MissingSecretKey));
    }

    #[test]
    fn http_transport_with_custom_socket() {
        let config = parse(&[
            ("MCP_SECRET_KEY", "abc"),
            ("MCP_TRANSPORT", "HTTP"),
            ("BIND_ADDR", "0.0.0.0"),
            ("BIND_PORT", "9090"),
            ("MCP_CALL_TIMEOUT_MS", "1500"),
            ("MCP_STDIO_FRAMING", "content-length"),
            ("MCP_STDIO_ON_EOF", "Drain"),
            ("WEATHER_API_KEY", "weather-key"),
        ])
        .expect("config should parse");

        assert_eq!(config.transport, TransportKind::Http);
        assert_eq!(
            config.bind_socket().expect("socket"),
            "0.0.0.0:9090".parse().expect("addr")
        );
        assert_eq!(config.call_timeout, Duration::from_millis(1500));
        assert_eq!(config.stdio_framing, Framing::ContentLength);
        assert_eq!(config.stdio_eof, EofPolicy::Drain);
        assert_eq!(config.weather_api_key.as_deref(), Some("weather-key"));
    }

    #[test]
    fn invalid_values_fail() {
        let cases: [(&str, &str, fn(&ConfigError) -> bool); 6] = [
            ("MCP_TRANSPORT", "carrier-pigeon", |err| {
                matches!(err, ConfigError::InvalidTransport)
            }),
            ("BIND_PORT", "70000", |err| matches!(err, ConfigError::InvalidPort)),
            ("MCP_CALL_TIMEOUT_MS", "0", |err| {
                matches!(err, ConfigError::InvalidTimeout)
            }),
            ("MCP_CALL_TIMEOUT_MS", "soon", |err| {
                matches!(err, ConfigError::InvalidTimeout)
            }),
            ("MCP_STDIO_FRAMING", "xml", |err| {
                matches!(err, ConfigError::InvalidFraming)
            }),
            ("MCP_STDIO_ON_EOF", "shrug", |err| {
                matches!(err, ConfigError::InvalidEofPolicy)
            }),
        ];

        for (name, value, expected) in cases {
            let err = parse(&[("MCP_SECRET_KEY", "abc"), (name, value)])
                .expect_err("expected configuration error");
            assert!(expected(&err), "{name}={value} gave {err:?}");
        }
    }

    #[test]
    fn invalid_bind_address_fails_for_http() {
        let err = parse(&[
            ("MCP_SECRET_KEY", "abc"),
            ("MCP_TRANSPORT", "http"),
            ("BIND_ADDR", "not an address"),
        ])
        .expect_err("expected invalid socket error");
        assert!(matches!(err, ConfigError::InvalidSocket));
    }
}
