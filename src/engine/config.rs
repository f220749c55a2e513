//! Engine configuration synthesis
//!
//! This module provides functionality for:
//! - Partitioning unique catalog entries into capacity-bounded batches
//! - Allocating a unique local SOCKS port per entry
//! - Building the JSON configuration document the external engine consumes
//!   (inbound listeners, protocol outbounds, inbound-to-outbound routing)
//!
//! Entries the engine cannot express (unknown cipher, unknown stream
//! network) are skipped and reported, never fatal.

use crate::proxy::models::{CatalogEntry, Protocol, ProxyParams};
use anyhow::ensure;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Shadowsocks ciphers the engine understands
const SUPPORTED_CIPHERS: &[&str] = &[
    "aes-128-gcm",
    "aes-256-gcm",
    "chacha20-poly1305",
    "chacha20-ietf-poly1305",
    "xchacha20-ietf-poly1305",
    "2022-blake3-aes-128-gcm",
    "2022-blake3-aes-256-gcm",
    "none",
    "plain",
];

/// Stream transports the engine understands
const SUPPORTED_NETWORKS: &[&str] = &["tcp", "ws", "grpc"];

/// Error raised when an entry cannot be expressed as an engine outbound
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unsupported cipher: {0}")]
    UnsupportedCipher(String),
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),
    #[error("unsupported security: {0}")]
    UnsupportedSecurity(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Engine configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub log: LogSettings,
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
    pub routing: Routing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    pub loglevel: String,
}

/// Inbound listener descriptor (local-only SOCKS bind)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inbound {
    pub tag: String,
    pub listen: String,
    pub port: u16,
    pub protocol: String,
    pub settings: serde_json::Value,
}

/// Outbound descriptor carrying the proxy's transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outbound {
    pub tag: String,
    pub protocol: String,
    pub settings: serde_json::Value,
    #[serde(rename = "streamSettings", skip_serializing_if = "Option::is_none")]
    pub stream_settings: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Routing {
    pub rules: Vec<RouteRule>,
}

/// Routing rule mapping one inbound tag to exactly one outbound tag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(rename = "inboundTag")]
    pub inbound_tag: Vec<String>,
    #[serde(rename = "outboundTag")]
    pub outbound_tag: String,
}

/// One catalog entry with its allocated local port
#[derive(Debug, Clone)]
pub struct PortAssignment {
    pub entry: CatalogEntry,
    pub local_port: u16,
}

/// The entries of one batch, their ports, and the engine config serving them
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub index: usize,
    pub assignments: Vec<PortAssignment>,
    pub config: EngineConfig,
    /// Entries whose protocol variant the engine could not express
    pub skipped: Vec<CatalogEntry>,
}

/// Knobs for batch partitioning and port allocation
#[derive(Debug, Clone)]
pub struct SynthesisOptions {
    /// Entries per engine instance; the engine degrades above some count
    pub capacity: usize,
    pub base_port: u16,
    /// Port offset between consecutive batches, must be >= capacity
    pub stride: u16,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            capacity: 40,
            base_port: 24000,
            stride: 100,
        }
    }
}

/// Partition entries into batches and synthesize one engine config per batch
///
/// Local port = base + batch_index * stride + index_in_batch, so allocations
/// never collide within a batch or across batches.
pub fn synthesize_batches(
    entries: Vec<CatalogEntry>,
    options: &SynthesisOptions,
) -> crate::Result<Vec<BatchPlan>> {
    ensure!(options.capacity > 0, "batch capacity must be positive");
    ensure!(
        options.stride as usize >= options.capacity,
        "port stride {} is smaller than batch capacity {}",
        options.stride,
        options.capacity
    );

    let mut plans = Vec::new();
    for (batch_index, chunk) in entries.chunks(options.capacity).enumerate() {
        let first_port =
            options.base_port as u32 + batch_index as u32 * options.stride as u32;
        ensure!(
            first_port + chunk.len() as u32 <= u16::MAX as u32,
            "port allocation for batch {} exceeds the valid range",
            batch_index
        );
        plans.push(synthesize_batch(batch_index, first_port as u16, chunk));
    }
    Ok(plans)
}

fn synthesize_batch(index: usize, first_port: u16, entries: &[CatalogEntry]) -> BatchPlan {
    let mut assignments = Vec::new();
    let mut skipped = Vec::new();
    let mut inbounds = Vec::new();
    let mut outbounds = Vec::new();
    let mut rules = Vec::new();

    let mut next_port = first_port;
    for entry in entries {
        let in_tag = format!("in-{}", next_port);
        let out_tag = format!("out-{}", next_port);

        let outbound = match build_outbound(&entry.params, &out_tag) {
            Ok(o) => o,
            Err(e) => {
                warn!("cannot express {}: {}", entry.params, e);
                skipped.push(entry.clone());
                continue;
            }
        };

        inbounds.push(build_inbound(&in_tag, next_port));
        outbounds.push(outbound);
        rules.push(RouteRule {
            rule_type: "field".to_string(),
            inbound_tag: vec![in_tag],
            outbound_tag: out_tag,
        });
        assignments.push(PortAssignment {
            entry: entry.clone(),
            local_port: next_port,
        });
        next_port += 1;
    }

    BatchPlan {
        index,
        assignments,
        config: EngineConfig {
            log: LogSettings {
                loglevel: "warning".to_string(),
            },
            inbounds,
            outbounds,
            routing: Routing { rules },
        },
        skipped,
    }
}

fn build_inbound(tag: &str, port: u16) -> Inbound {
    Inbound {
        tag: tag.to_string(),
        listen: "127.0.0.1".to_string(),
        port,
        protocol: "socks".to_string(),
        settings: json!({ "auth": "noauth", "udp": false }),
    }
}

/// Build the outbound descriptor for one proxy
pub fn build_outbound(params: &ProxyParams, tag: &str) -> Result<Outbound, BuildError> {
    let settings = match params.protocol {
        Protocol::Vless => {
            let user_id = params.user_id.as_ref().ok_or(BuildError::MissingField("user id"))?;
            let mut user = json!({ "id": user_id, "encryption": "none" });
            if let Some(flow) = &params.flow {
                user["flow"] = json!(flow);
            }
            json!({
                "vnext": [{
                    "address": params.address,
                    "port": params.port,
                    "users": [user],
                }]
            })
        }
        Protocol::Vmess => {
            let user_id = params.user_id.as_ref().ok_or(BuildError::MissingField("user id"))?;
            json!({
                "vnext": [{
                    "address": params.address,
                    "port": params.port,
                    "users": [{
                        "id": user_id,
                        "alterId": params.alter_id,
                        "security": params.cipher.as_deref().unwrap_or("auto"),
                    }],
                }]
            })
        }
        Protocol::Trojan => {
            let password = params.password.as_ref().ok_or(BuildError::MissingField("password"))?;
            json!({
                "servers": [{
                    "address": params.address,
                    "port": params.port,
                    "password": password,
                }]
            })
        }
        Protocol::Shadowsocks => {
            let password = params.password.as_ref().ok_or(BuildError::MissingField("password"))?;
            let cipher = params.cipher.as_ref().ok_or(BuildError::MissingField("cipher"))?;
            if !SUPPORTED_CIPHERS.contains(&cipher.as_str()) {
                return Err(BuildError::UnsupportedCipher(cipher.clone()));
            }
            json!({
                "servers": [{
                    "address": params.address,
                    "port": params.port,
                    "method": cipher,
                    "password": password,
                }]
            })
        }
    };

    Ok(Outbound {
        tag: tag.to_string(),
        protocol: params.protocol.to_string(),
        settings,
        stream_settings: build_stream_settings(params)?,
    })
}

fn build_stream_settings(params: &ProxyParams) -> Result<Option<serde_json::Value>, BuildError> {
    // Shadowsocks outbounds carry no stream wrapper
    if params.protocol == Protocol::Shadowsocks {
        return Ok(None);
    }

    let network = params.network.as_deref().unwrap_or("tcp");
    if !SUPPORTED_NETWORKS.contains(&network) {
        return Err(BuildError::UnsupportedNetwork(network.to_string()));
    }

    let mut stream = json!({ "network": network });

    match params.security.as_deref() {
        None | Some("none") => {}
        Some("tls") => {
            stream["security"] = json!("tls");
            let sni = params.sni.as_deref().unwrap_or(&params.address);
            stream["tlsSettings"] = json!({ "serverName": sni, "allowInsecure": false });
        }
        Some(other) => return Err(BuildError::UnsupportedSecurity(other.to_string())),
    }

    match network {
        "ws" => {
            let mut ws = json!({ "path": params.path.as_deref().unwrap_or("/") });
            if let Some(host) = &params.host {
                ws["headers"] = json!({ "Host": host });
            }
            stream["wsSettings"] = ws;
        }
        "grpc" => {
            stream["grpcSettings"] = json!({
                "serviceName": params.path.as_deref().unwrap_or(""),
            });
        }
        _ => {}
    }

    Ok(Some(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::parser::DescriptorParser;
    use std::collections::HashSet;

    const UUID: &str = "d342d11e-d424-4583-b36e-524ab1f0afa4";

    fn entries(n: usize) -> Vec<CatalogEntry> {
        (0..n)
            .map(|i| {
                let uri = format!("trojan://pw@host{}.example.com:443#p{}", i, i);
                CatalogEntry::new(uri.clone(), DescriptorParser::parse_uri(&uri).unwrap())
            })
            .collect()
    }

    #[test]
    fn test_batches_respect_capacity() {
        let options = SynthesisOptions {
            capacity: 4,
            base_port: 24000,
            stride: 10,
        };
        let plans = synthesize_batches(entries(10), &options).unwrap();
        assert_eq!(plans.len(), 3);
        assert_eq!(plans[0].assignments.len(), 4);
        assert_eq!(plans[2].assignments.len(), 2);
    }

    #[test]
    fn test_ports_unique_within_and_across_batches() {
        let options = SynthesisOptions {
            capacity: 4,
            base_port: 24000,
            stride: 10,
        };
        let plans = synthesize_batches(entries(10), &options).unwrap();
        let mut seen = HashSet::new();
        for plan in &plans {
            for assignment in &plan.assignments {
                assert!(seen.insert(assignment.local_port));
            }
        }
        assert_eq!(plans[1].assignments[0].local_port, 24010);
    }

    #[test]
    fn test_stride_smaller_than_capacity_is_rejected() {
        let options = SynthesisOptions {
            capacity: 50,
            base_port: 24000,
            stride: 10,
        };
        assert!(synthesize_batches(entries(3), &options).is_err());
    }

    #[test]
    fn test_each_inbound_routes_to_one_outbound() {
        let plans = synthesize_batches(entries(3), &SynthesisOptions::default()).unwrap();
        let config = &plans[0].config;
        assert_eq!(config.inbounds.len(), 3);
        assert_eq!(config.outbounds.len(), 3);
        assert_eq!(config.routing.rules.len(), 3);
        for (rule, (inbound, outbound)) in config
            .routing
            .rules
            .iter()
            .zip(config.inbounds.iter().zip(config.outbounds.iter()))
        {
            assert_eq!(rule.inbound_tag, vec![inbound.tag.clone()]);
            assert_eq!(rule.outbound_tag, outbound.tag);
            assert_eq!(inbound.listen, "127.0.0.1");
        }
    }

    #[test]
    fn test_unsupported_cipher_is_skipped_not_fatal() {
        let good = "ss://YWVzLTI1Ni1nY206cHc=@a.example.com:8388#good";
        let bad = "ss://cmM0LW1kNTpwdw==@b.example.com:8388#bad"; // rc4-md5:pw
        let catalog: Vec<CatalogEntry> = [good, bad]
            .iter()
            .map(|u| CatalogEntry::new(u.to_string(), DescriptorParser::parse_uri(u).unwrap()))
            .collect();

        let plans = synthesize_batches(catalog, &SynthesisOptions::default()).unwrap();
        assert_eq!(plans[0].assignments.len(), 1);
        assert_eq!(plans[0].skipped.len(), 1);
        assert_eq!(plans[0].skipped[0].params.display_tag, "bad");
    }

    #[test]
    fn test_unsupported_security_is_skipped() {
        let uri = format!(
            "vless://{}@example.com:443?security=reality&pbk=abc#r",
            UUID
        );
        let entry = CatalogEntry::new(uri.clone(), DescriptorParser::parse_uri(&uri).unwrap());
        let plans = synthesize_batches(vec![entry], &SynthesisOptions::default()).unwrap();
        assert!(plans[0].assignments.is_empty());
        assert_eq!(plans[0].skipped.len(), 1);
    }

    #[test]
    fn test_vless_outbound_shape() {
        let uri = format!(
            "vless://{}@example.com:443?type=ws&security=tls&sni=cdn.example.com&path=%2Fws&host=h#x",
            UUID
        );
        let params = DescriptorParser::parse_uri(&uri).unwrap();
        let outbound = build_outbound(&params, "out-1").unwrap();

        assert_eq!(outbound.protocol, "vless");
        assert_eq!(outbound.settings["vnext"][0]["address"], "example.com");
        assert_eq!(outbound.settings["vnext"][0]["users"][0]["id"], UUID);

        let stream = outbound.stream_settings.unwrap();
        assert_eq!(stream["network"], "ws");
        assert_eq!(stream["security"], "tls");
        assert_eq!(stream["tlsSettings"]["serverName"], "cdn.example.com");
        assert_eq!(stream["wsSettings"]["path"], "/ws");
        assert_eq!(stream["wsSettings"]["headers"]["Host"], "h");
    }

    #[test]
    fn test_config_serializes_engine_field_names() {
        let plans = synthesize_batches(entries(1), &SynthesisOptions::default()).unwrap();
        let text = serde_json::to_string(&plans[0].config).unwrap();
        assert!(text.contains("\"inboundTag\""));
        assert!(text.contains("\"outboundTag\""));
        assert!(text.contains("\"type\":\"field\""));
    }
}
