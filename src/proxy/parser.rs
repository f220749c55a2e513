//! Descriptor parser module for parsing proxy URIs
//!
//! This module provides functionality for:
//! - Parsing descriptor URIs into structured parameters (vless, vmess,
//!   trojan, shadowsocks)
//! - Building a catalog from a descriptor list, skipping unparsable lines
//! - Deduplicating catalog entries by endpoint identity
//! - Writing surviving descriptors back out

use crate::proxy::models::{CatalogEntry, ParseError, Protocol, ProxyParams};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use log::warn;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use url::Url;

/// Descriptor parser for proxy URIs
pub struct DescriptorParser;

impl DescriptorParser {
    /// Parse a single descriptor URI
    ///
    /// Supported schemes:
    /// - `vless://<uuid>@host:port?query#tag`
    /// - `vmess://<base64 json>`
    /// - `trojan://<password>@host:port?query#tag`
    /// - `ss://<base64 or plain userinfo>@host:port#tag`
    pub fn parse_uri(line: &str) -> Result<ProxyParams, ParseError> {
        let line = line.trim();
        let scheme = line
            .split_once("://")
            .map(|(s, _)| s)
            .ok_or_else(|| ParseError::Malformed("no scheme separator".to_string()))?;

        match Protocol::from_scheme(scheme) {
            Some(Protocol::Vless) => Self::parse_vless(line),
            Some(Protocol::Vmess) => Self::parse_vmess(line),
            Some(Protocol::Trojan) => Self::parse_trojan(line),
            Some(Protocol::Shadowsocks) => Self::parse_shadowsocks(line),
            None => Err(ParseError::UnsupportedScheme(scheme.to_string())),
        }
    }

    fn parse_vless(line: &str) -> Result<ProxyParams, ParseError> {
        let url = Url::parse(line).map_err(|e| ParseError::Malformed(e.to_string()))?;
        let user_id = percent_decode(url.username());
        if user_id.is_empty() {
            return Err(ParseError::MissingField("user id"));
        }
        uuid::Uuid::parse_str(&user_id)
            .map_err(|_| ParseError::Malformed(format!("invalid uuid: {}", user_id)))?;

        let address = host_of(&url)?;
        let port = url.port().ok_or(ParseError::MissingField("port"))?;
        let query = query_map(&url);

        Ok(ProxyParams {
            protocol: Protocol::Vless,
            address: address.clone(),
            port,
            user_id: Some(user_id),
            password: None,
            cipher: None,
            alter_id: 0,
            flow: query.get("flow").cloned(),
            network: query.get("type").cloned(),
            security: query.get("security").cloned(),
            sni: query.get("sni").cloned(),
            path: query.get("path").cloned(),
            host: query.get("host").cloned(),
            display_tag: fragment_tag(&url, &address, port),
        })
    }

    fn parse_vmess(line: &str) -> Result<ProxyParams, ParseError> {
        let payload = line.trim_start_matches("vmess://");
        let decoded = decode_base64(payload)
            .ok_or_else(|| ParseError::Malformed("vmess payload is not base64".to_string()))?;
        let json: serde_json::Value = serde_json::from_slice(&decoded)
            .map_err(|e| ParseError::Malformed(format!("vmess payload json: {}", e)))?;

        let address = json_str(&json, "add").ok_or(ParseError::MissingField("add"))?;
        let port = json_u16(&json, "port").ok_or(ParseError::MissingField("port"))?;
        let user_id = json_str(&json, "id").ok_or(ParseError::MissingField("id"))?;
        uuid::Uuid::parse_str(&user_id)
            .map_err(|_| ParseError::Malformed(format!("invalid uuid: {}", user_id)))?;

        let tls = json_str(&json, "tls").filter(|v| !v.is_empty() && v != "none");
        let display_tag = json_str(&json, "ps")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| format!("{}:{}", address, port));

        Ok(ProxyParams {
            protocol: Protocol::Vmess,
            address,
            port,
            user_id: Some(user_id),
            password: None,
            cipher: json_str(&json, "scy"),
            alter_id: json_u32(&json, "aid").unwrap_or(0),
            flow: None,
            network: json_str(&json, "net"),
            security: tls,
            sni: json_str(&json, "sni"),
            path: json_str(&json, "path"),
            host: json_str(&json, "host"),
            display_tag,
        })
    }

    fn parse_trojan(line: &str) -> Result<ProxyParams, ParseError> {
        let url = Url::parse(line).map_err(|e| ParseError::Malformed(e.to_string()))?;
        let password = percent_decode(url.username());
        if password.is_empty() {
            return Err(ParseError::MissingField("password"));
        }

        let address = host_of(&url)?;
        let port = url.port().ok_or(ParseError::MissingField("port"))?;
        let query = query_map(&url);

        Ok(ProxyParams {
            protocol: Protocol::Trojan,
            address: address.clone(),
            port,
            user_id: None,
            password: Some(password),
            cipher: None,
            alter_id: 0,
            flow: None,
            network: query.get("type").cloned(),
            security: query.get("security").cloned(),
            sni: query.get("sni").cloned(),
            path: query.get("path").cloned(),
            host: query.get("host").cloned(),
            display_tag: fragment_tag(&url, &address, port),
        })
    }

    /// Parse an `ss://` descriptor
    ///
    /// Three encodings circulate: base64 userinfo (`ss://<b64>@host:port`),
    /// plain userinfo (`ss://method:pass@host:port`), and a fully
    /// base64-encoded body (`ss://<b64 of method:pass@host:port>`).
    fn parse_shadowsocks(line: &str) -> Result<ProxyParams, ParseError> {
        let body = line.trim_start_matches("ss://");
        let (body, tag) = match body.split_once('#') {
            Some((b, t)) => (b, Some(percent_decode(t))),
            None => (body, None),
        };

        let expanded;
        let body = if body.contains('@') {
            body
        } else {
            // Fully encoded body form
            let decoded = decode_base64(body)
                .and_then(|b| String::from_utf8(b).ok())
                .ok_or_else(|| ParseError::Malformed("ss body is not base64".to_string()))?;
            expanded = decoded;
            expanded.as_str()
        };

        let (userinfo, endpoint) = body
            .rsplit_once('@')
            .ok_or_else(|| ParseError::Malformed("ss descriptor has no userinfo".to_string()))?;
        let userinfo = match decode_base64(userinfo).and_then(|b| String::from_utf8(b).ok()) {
            Some(plain) if plain.contains(':') => plain,
            _ => percent_decode(userinfo),
        };
        let (method, password) = userinfo
            .split_once(':')
            .ok_or(ParseError::MissingField("cipher"))?;
        if method.is_empty() {
            return Err(ParseError::MissingField("cipher"));
        }

        let (address, port) = endpoint
            .rsplit_once(':')
            .ok_or(ParseError::MissingField("port"))?;
        let port: u16 = port
            .trim_end_matches('/')
            .parse()
            .map_err(|_| ParseError::Malformed(format!("invalid port: {}", port)))?;

        Ok(ProxyParams {
            protocol: Protocol::Shadowsocks,
            address: address.to_string(),
            port,
            user_id: None,
            password: Some(password.to_string()),
            cipher: Some(method.to_string()),
            alter_id: 0,
            flow: None,
            network: None,
            security: None,
            sni: None,
            path: None,
            host: None,
            display_tag: tag.unwrap_or_else(|| format!("{}:{}", address, port)),
        })
    }

    /// Build the catalog from a descriptor list
    ///
    /// Blank lines and `#` comments are ignored. Unparsable lines are logged
    /// and skipped; they never abort the run.
    pub fn parse_list(content: &str) -> Vec<CatalogEntry> {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| match Self::parse_uri(line) {
                Ok(params) => Some(CatalogEntry::new(line.to_string(), params)),
                Err(e) => {
                    warn!("skipping descriptor: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Parse a descriptor file into a catalog
    pub fn parse_file<P: AsRef<Path>>(path: P) -> crate::Result<Vec<CatalogEntry>> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse_list(&content))
    }

    /// Save surviving descriptors to a file, one per line
    pub fn save_to_file<P: AsRef<Path>>(descriptors: &[String], path: P) -> crate::Result<()> {
        let mut content = descriptors.join("\n");
        content.push('\n');
        fs::write(path, content)?;
        Ok(())
    }
}

/// Collapse entries sharing an identity key, keeping the first-seen entry
///
/// Deterministic: the same input order always yields the same output order
/// and the same representatives.
pub fn deduplicate(entries: Vec<CatalogEntry>) -> Vec<CatalogEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|entry| seen.insert(entry.params.identity()))
        .collect()
}

fn host_of(url: &Url) -> Result<String, ParseError> {
    url.host_str()
        .map(|h| h.to_string())
        .ok_or(ParseError::MissingField("host"))
}

fn query_map(url: &Url) -> std::collections::HashMap<String, String> {
    url.query_pairs()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn fragment_tag(url: &Url, address: &str, port: u16) -> String {
    url.fragment()
        .map(percent_decode)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| format!("{}:{}", address, port))
}

fn percent_decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

/// Decode base64 accepting standard or url-safe alphabets, padded or not
fn decode_base64(s: &str) -> Option<Vec<u8>> {
    let s = s.trim();
    STANDARD
        .decode(s)
        .or_else(|_| STANDARD_NO_PAD.decode(s))
        .or_else(|_| URL_SAFE.decode(s))
        .or_else(|_| URL_SAFE_NO_PAD.decode(s))
        .ok()
}

fn json_str(json: &serde_json::Value, key: &str) -> Option<String> {
    match json.get(key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_u16(json: &serde_json::Value, key: &str) -> Option<u16> {
    json_str(json, key).and_then(|s| s.parse().ok())
}

fn json_u32(json: &serde_json::Value, key: &str) -> Option<u32> {
    json_str(json, key).and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "d342d11e-d424-4583-b36e-524ab1f0afa4";

    fn vmess_uri(ps: &str, pad: bool) -> String {
        let json = format!(
            r#"{{"v":"2","ps":"{}","add":"example.com","port":"443","id":"{}","aid":"0","net":"ws","tls":"tls","path":"/v"}}"#,
            ps, UUID
        );
        if pad {
            format!("vmess://{}", STANDARD.encode(json))
        } else {
            format!("vmess://{}", STANDARD_NO_PAD.encode(json))
        }
    }

    #[test]
    fn test_parse_vless() {
        let uri = format!(
            "vless://{}@example.com:443?type=ws&security=tls&sni=cdn.example.com&path=%2Fws#My%20Proxy",
            UUID
        );
        let params = DescriptorParser::parse_uri(&uri).unwrap();
        assert_eq!(params.protocol, Protocol::Vless);
        assert_eq!(params.address, "example.com");
        assert_eq!(params.port, 443);
        assert_eq!(params.user_id.as_deref(), Some(UUID));
        assert_eq!(params.network.as_deref(), Some("ws"));
        assert_eq!(params.sni.as_deref(), Some("cdn.example.com"));
        assert_eq!(params.path.as_deref(), Some("/ws"));
        assert_eq!(params.display_tag, "My Proxy");
    }

    #[test]
    fn test_parse_vless_without_fragment_gets_default_tag() {
        let uri = format!("vless://{}@example.com:443", UUID);
        let params = DescriptorParser::parse_uri(&uri).unwrap();
        assert_eq!(params.display_tag, "example.com:443");
    }

    #[test]
    fn test_parse_vless_rejects_bad_uuid() {
        let uri = "vless://not-a-uuid@example.com:443";
        assert!(matches!(
            DescriptorParser::parse_uri(uri),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_vmess() {
        let params = DescriptorParser::parse_uri(&vmess_uri("Tokyo", true)).unwrap();
        assert_eq!(params.protocol, Protocol::Vmess);
        assert_eq!(params.address, "example.com");
        assert_eq!(params.port, 443);
        assert_eq!(params.user_id.as_deref(), Some(UUID));
        assert_eq!(params.network.as_deref(), Some("ws"));
        assert_eq!(params.security.as_deref(), Some("tls"));
        assert_eq!(params.display_tag, "Tokyo");
    }

    #[test]
    fn test_vmess_padding_does_not_change_identity() {
        let padded = DescriptorParser::parse_uri(&vmess_uri("Tokyo", true)).unwrap();
        let unpadded = DescriptorParser::parse_uri(&vmess_uri("Tokyo", false)).unwrap();
        assert_eq!(padded.identity(), unpadded.identity());
    }

    #[test]
    fn test_parse_trojan() {
        let uri = "trojan://s3cret@example.com:443?sni=example.com&type=tcp#edge";
        let params = DescriptorParser::parse_uri(uri).unwrap();
        assert_eq!(params.protocol, Protocol::Trojan);
        assert_eq!(params.password.as_deref(), Some("s3cret"));
        assert_eq!(params.sni.as_deref(), Some("example.com"));
        assert_eq!(params.display_tag, "edge");
    }

    #[test]
    fn test_parse_shadowsocks_base64_userinfo() {
        let userinfo = STANDARD.encode("chacha20-ietf-poly1305:pass");
        let uri = format!("ss://{}@example.com:8388#node", userinfo);
        let params = DescriptorParser::parse_uri(&uri).unwrap();
        assert_eq!(params.protocol, Protocol::Shadowsocks);
        assert_eq!(params.cipher.as_deref(), Some("chacha20-ietf-poly1305"));
        assert_eq!(params.password.as_deref(), Some("pass"));
        assert_eq!(params.port, 8388);
        assert_eq!(params.display_tag, "node");
    }

    #[test]
    fn test_parse_shadowsocks_plain_userinfo() {
        let uri = "ss://aes-256-gcm:pass@example.com:8388";
        let params = DescriptorParser::parse_uri(uri).unwrap();
        assert_eq!(params.cipher.as_deref(), Some("aes-256-gcm"));
        assert_eq!(params.display_tag, "example.com:8388");
    }

    #[test]
    fn test_parse_shadowsocks_encoded_body() {
        let body = STANDARD.encode("aes-128-gcm:pw@example.com:8388");
        let uri = format!("ss://{}#full", body);
        let params = DescriptorParser::parse_uri(&uri).unwrap();
        assert_eq!(params.cipher.as_deref(), Some("aes-128-gcm"));
        assert_eq!(params.address, "example.com");
        assert_eq!(params.display_tag, "full");
    }

    #[test]
    fn test_parse_unsupported_scheme() {
        assert!(matches!(
            DescriptorParser::parse_uri("wireguard://example.com:51820"),
            Err(ParseError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_parse_list_skips_garbage() {
        let content = format!(
            "# comment\n\nvless://{}@example.com:443#a\nnot a uri\n",
            UUID
        );
        let entries = DescriptorParser::parse_list(&content);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].params.display_tag, "a");
    }

    #[test]
    fn test_deduplicate_keeps_first_seen() {
        let content = format!(
            "vless://{uuid}@example.com:443#A\nvless://{uuid}@EXAMPLE.com:443#A-dup\ntrojan://pw@example.com:443#B\n",
            uuid = UUID
        );
        let entries = DescriptorParser::parse_list(&content);
        assert_eq!(entries.len(), 3);
        let unique = deduplicate(entries);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].params.display_tag, "A");
        assert_eq!(unique[1].params.display_tag, "B");
    }

    #[test]
    fn test_deduplicate_is_idempotent() {
        let content = format!(
            "vless://{uuid}@example.com:443#A\nvless://{uuid}@example.com:443#A2\n",
            uuid = UUID
        );
        let unique = deduplicate(DescriptorParser::parse_list(&content));
        let twice = deduplicate(unique.clone());
        assert_eq!(unique.len(), twice.len());
        let keys: Vec<_> = twice.iter().map(|e| e.params.identity()).collect();
        let set: HashSet<_> = keys.iter().cloned().collect();
        assert_eq!(keys.len(), set.len());
    }
}
