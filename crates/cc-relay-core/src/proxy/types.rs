use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use crate::app_config::AppType;
use crate::error::AppError;

/// Engine operating mode. Exactly one value at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyMode {
    #[default]
    Stopped,
    Monitoring,
    TakeoverActive,
}

impl ProxyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyMode::Stopped => "stopped",
            ProxyMode::Monitoring => "monitoring",
            ProxyMode::TakeoverActive => "takeover_active",
        }
    }

    pub fn is_running(&self) -> bool {
        !matches!(self, ProxyMode::Stopped)
    }
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(ProxyMode::Stopped),
            "monitoring" => Ok(ProxyMode::Monitoring),
            "takeover_active" => Ok(ProxyMode::TakeoverActive),
            other => Err(AppError::InvalidInput(format!("unknown proxy mode: {other}"))),
        }
    }
}

/// Address the listener actually bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyServerInfo {
    pub address: String,
    pub port: u16,
    pub started_at: String,
}

impl ProxyServerInfo {
    /// Origin clients should use; a wildcard bind is reached via loopback.
    /// IPv6 hosts come out bracketed.
    pub fn origin(&self) -> String {
        let bare = self.address.trim_start_matches('[').trim_end_matches(']');
        match bare.parse::<IpAddr>() {
            Ok(ip) => {
                let ip = match ip {
                    IpAddr::V4(v4) if v4.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
                    IpAddr::V6(v6) if v6.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
                    other => other,
                };
                format!("http://{}", SocketAddr::new(ip, self.port))
            }
            Err(_) => format!("http://{}:{}", self.address, self.port),
        }
    }
}

/// Listener settings that can be changed at runtime. Persisted and used by
/// the next start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    pub listen_address: String,
    pub listen_port: u16,
}

impl ProxyConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.listen_address.trim().parse::<IpAddr>().is_err() {
            return Err(AppError::InvalidInput(format!(
                "listen address must be an IP: {}",
                self.listen_address
            )));
        }
        if self.listen_port == 0 {
            return Err(AppError::InvalidInput("listen port must not be 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyStatus {
    pub running: bool,
    pub mode: ProxyMode,
    pub address: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_provider_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_provider_name: Option<String>,
    /// Tools whose config currently points at the proxy.
    pub taken_over_apps: Vec<AppType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_bind_advertises_loopback() {
        let info = ProxyServerInfo {
            address: "0.0.0.0".into(),
            port: 15721,
            started_at: String::new(),
        };
        assert_eq!(info.origin(), "http://127.0.0.1:15721");
    }

    #[test]
    fn ipv6_bind_is_bracketed() {
        let info = |address: &str| ProxyServerInfo {
            address: address.into(),
            port: 15721,
            started_at: String::new(),
        };
        assert_eq!(info("::1").origin(), "http://[::1]:15721");
        assert_eq!(info("::").origin(), "http://[::1]:15721");
        assert_eq!(info("[::]").origin(), "http://[::1]:15721");
        assert_eq!(info("127.0.0.1").origin(), "http://127.0.0.1:15721");
        assert!(url::Url::parse(&info("fe80::1").origin()).is_ok());
    }

    #[test]
    fn proxy_config_validation() {
        let config = |address: &str, port: u16| ProxyConfig {
            listen_address: address.into(),
            listen_port: port,
        };
        assert!(config("127.0.0.1", 15800).validate().is_ok());
        assert!(config("::1", 15800).validate().is_ok());
        assert!(config("localhost", 15800).validate().is_err());
        assert!(config("127.0.0.1", 0).validate().is_err());
    }

    #[test]
    fn mode_string_roundtrip() {
        for mode in [ProxyMode::Stopped, ProxyMode::Monitoring, ProxyMode::TakeoverActive] {
            assert_eq!(ProxyMode::from_str(mode.as_str()).unwrap(), mode);
        }
        assert_eq!(
            serde_json::to_string(&ProxyMode::TakeoverActive).unwrap(),
            "\"takeover_active\""
        );
    }
}
