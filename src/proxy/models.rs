//! Proxy descriptor data models

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Proxy protocol enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Vless,
    Vmess,
    Trojan,
    Shadowsocks,
}

impl Protocol {
    /// Get the protocol from a URI scheme
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "vless" => Some(Protocol::Vless),
            "vmess" => Some(Protocol::Vmess),
            "trojan" => Some(Protocol::Trojan),
            "ss" => Some(Protocol::Shadowsocks),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Vless => write!(f, "vless"),
            Protocol::Vmess => write!(f, "vmess"),
            Protocol::Trojan => write!(f, "trojan"),
            Protocol::Shadowsocks => write!(f, "shadowsocks"),
        }
    }
}

/// Error raised when a descriptor line cannot be parsed
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    #[error("malformed descriptor: {0}")]
    Malformed(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Parsed parameters of a single proxy descriptor
///
/// Credential fields are protocol-specific: vless and vmess carry a UUID in
/// `user_id`, trojan and shadowsocks carry `password`, shadowsocks and vmess
/// additionally carry `cipher`. Transport fields describe how the outbound
/// connection is wrapped and are not part of the proxy's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyParams {
    pub protocol: Protocol,
    pub address: String,
    pub port: u16,
    pub user_id: Option<String>,
    pub password: Option<String>,
    pub cipher: Option<String>,
    pub alter_id: u32,
    pub flow: Option<String>,
    pub network: Option<String>,
    pub security: Option<String>,
    pub sni: Option<String>,
    pub path: Option<String>,
    pub host: Option<String>,
    pub display_tag: String,
}

impl ProxyParams {
    /// Identity key of the underlying endpoint
    ///
    /// Two descriptors with equal identity are the same proxy regardless of
    /// surface URI differences. Address and UUID are compared
    /// case-insensitively; vmess base64 padding never reaches this point
    /// because identity is derived from the decoded fields.
    pub fn identity(&self) -> IdentityKey {
        IdentityKey {
            protocol: self.protocol,
            address: self.address.to_lowercase(),
            port: self.port,
            user_id: self.user_id.as_ref().map(|s| s.to_lowercase()),
            password: self.password.clone(),
            cipher: self.cipher.clone(),
        }
    }
}

impl fmt::Display for ProxyParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.address, self.port)
    }
}

/// Fields that define a proxy as "the same endpoint" for dedup purposes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub protocol: Protocol,
    pub address: String,
    pub port: u16,
    pub user_id: Option<String>,
    pub password: Option<String>,
    pub cipher: Option<String>,
}

/// A descriptor that survived parsing: the original raw line plus its params
///
/// Immutable after dedup; owned by the pipeline for its whole run.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub raw: String,
    pub params: ProxyParams,
}

impl CatalogEntry {
    pub fn new(raw: String, params: ProxyParams) -> Self {
        Self { raw, params }
    }
}

/// Outcome of the connectivity stage of a probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeStatus {
    /// The latency probe completed with a 2xx response
    Success,
    /// Connect error, timeout, or non-success status
    ConnectFailed(String),
    /// The local listener never became ready; the entry was not probed
    NotReady,
}

/// Outcome of the regional-reachability check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reachability {
    Reachable,
    Unreachable,
    /// The service was rate-limited, errored, or never answered in time
    Inconclusive,
    /// The check was disabled or had no exit IP to work with
    NotChecked,
}

/// Sentinel country code when the geolocation lookup fails or is disabled
pub const UNKNOWN_COUNTRY: &str = "XX";

/// Result of probing a single catalog entry
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub entry: CatalogEntry,
    pub status: ProbeStatus,
    pub latency_ms: Option<u64>,
    pub exit_ip: Option<String>,
    pub country: String,
    pub reachability: Reachability,
}

impl ProbeResult {
    /// Result for an entry whose listener never accepted a connection
    pub fn not_ready(entry: CatalogEntry) -> Self {
        Self {
            entry,
            status: ProbeStatus::NotReady,
            latency_ms: None,
            exit_ip: None,
            country: UNKNOWN_COUNTRY.to_string(),
            reachability: Reachability::NotChecked,
        }
    }

    /// Result for an entry that failed the connectivity stage
    pub fn connect_failed(entry: CatalogEntry, error: String) -> Self {
        Self {
            entry,
            status: ProbeStatus::ConnectFailed(error),
            latency_ms: None,
            exit_ip: None,
            country: UNKNOWN_COUNTRY.to_string(),
            reachability: Reachability::NotChecked,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ProbeStatus::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(protocol: Protocol, address: &str, port: u16) -> ProxyParams {
        ProxyParams {
            protocol,
            address: address.to_string(),
            port,
            user_id: None,
            password: None,
            cipher: None,
            alter_id: 0,
            flow: None,
            network: None,
            security: None,
            sni: None,
            path: None,
            host: None,
            display_tag: String::new(),
        }
    }

    #[test]
    fn test_protocol_from_scheme() {
        assert_eq!(Protocol::from_scheme("vless"), Some(Protocol::Vless));
        assert_eq!(Protocol::from_scheme("ss"), Some(Protocol::Shadowsocks));
        assert_eq!(Protocol::from_scheme("http"), None);
    }

    #[test]
    fn test_identity_ignores_address_case() {
        let mut a = params(Protocol::Vless, "Example.COM", 443);
        a.user_id = Some("D342D11E-D424-4583-B36E-524AB1F0AFA4".to_string());
        let mut b = params(Protocol::Vless, "example.com", 443);
        b.user_id = Some("d342d11e-d424-4583-b36e-524ab1f0afa4".to_string());
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_identity_ignores_transport_fields() {
        let mut a = params(Protocol::Trojan, "example.com", 443);
        a.password = Some("secret".to_string());
        let mut b = a.clone();
        b.network = Some("ws".to_string());
        b.display_tag = "other name".to_string();
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_identity_distinguishes_credentials() {
        let mut a = params(Protocol::Trojan, "example.com", 443);
        a.password = Some("secret".to_string());
        let mut b = a.clone();
        b.password = Some("other".to_string());
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn test_probe_result_constructors() {
        let mut p = params(Protocol::Trojan, "example.com", 443);
        p.password = Some("pw".to_string());
        let entry = CatalogEntry::new("trojan://pw@example.com:443#x".to_string(), p);

        let result = ProbeResult::not_ready(entry.clone());
        assert_eq!(result.status, ProbeStatus::NotReady);
        assert!(!result.is_success());

        let result = ProbeResult::connect_failed(entry, "connection refused".to_string());
        assert!(matches!(result.status, ProbeStatus::ConnectFailed(_)));
        assert_eq!(result.country, UNKNOWN_COUNTRY);
    }
}
