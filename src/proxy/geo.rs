//! Exit-point enrichment via third-party services
//!
//! This module provides functionality for:
//! - Discovering the exit IPv4 of a tunnel from plain-text echo services
//! - Resolving the exit country code from a geolocation endpoint
//! - Checking regional reachability through an async submit/poll service
//!
//! Every request goes through the proxy under test, never directly; the
//! caller hands in a client already bound to the tunnel's local port. All
//! failures degrade to defaults (no IP, unknown country, inconclusive),
//! never to errors.

use crate::proxy::models::{Reachability, UNKNOWN_COUNTRY};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::time;

/// Plain-text IP echo services, tried in order
const IP_ECHO_URLS: &[&str] = &["https://api.ipify.org", "https://icanhazip.com"];

/// Geolocation endpoint answering with a `country` field
const GEO_URL: &str = "https://ipinfo.io/json";

/// Base URL of the multi-node reachability service
const REGION_CHECK_BASE: &str = "https://check-host.net";

static IPV4_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}(\.\d{1,3}){3}$").expect("Invalid IPv4 regex"));

/// Fetch the tunnel's public IPv4; first syntactically valid answer wins
pub async fn discover_exit_ip(client: &Client) -> Option<String> {
    for url in IP_ECHO_URLS {
        match client.get(*url).header("Connection", "close").send().await {
            Ok(response) if response.status().is_success() => {
                if let Ok(text) = response.text().await {
                    let ip = text.trim().to_string();
                    if IPV4_REGEX.is_match(&ip) {
                        debug!("exit ip {} from {}", ip, url);
                        return Some(ip);
                    }
                }
            }
            Ok(response) => debug!("ip echo {} answered {}", url, response.status()),
            Err(e) => debug!("ip echo {} failed: {}", url, e),
        }
    }
    warn!("failed to discover exit ip from all echo services");
    None
}

/// Resolve the exit country code; sentinel `XX` on any failure
pub async fn fetch_country_code(client: &Client) -> String {
    #[derive(Deserialize)]
    struct GeoResponse {
        country: Option<String>,
    }

    let response = match client.get(GEO_URL).send().await {
        Ok(r) => r,
        Err(e) => {
            warn!("geolocation lookup failed: {}", e);
            return UNKNOWN_COUNTRY.to_string();
        }
    };
    match response.json::<GeoResponse>().await {
        Ok(geo) => geo.country.unwrap_or_else(|| UNKNOWN_COUNTRY.to_string()),
        Err(e) => {
            warn!("geolocation response unreadable: {}", e);
            UNKNOWN_COUNTRY.to_string()
        }
    }
}

/// Knobs for the regional reachability check
#[derive(Debug, Clone)]
pub struct RegionCheckOptions {
    /// Vantage nodes of the reachability service
    pub nodes: Vec<String>,
    /// Grace period before the first result poll
    pub initial_wait: Duration,
    /// Pause between result polls
    pub poll_interval: Duration,
    /// Overall budget for the submit/poll exchange
    pub deadline: Duration,
}

impl Default for RegionCheckOptions {
    fn default() -> Self {
        Self {
            nodes: vec![
                "ir1.node.check-host.net".to_string(),
                "ir2.node.check-host.net".to_string(),
                "ir3.node.check-host.net".to_string(),
            ],
            initial_wait: Duration::from_secs(5),
            poll_interval: Duration::from_secs(3),
            deadline: Duration::from_secs(25),
        }
    }
}

#[derive(Deserialize)]
struct SubmitResponse {
    request_id: Option<String>,
}

/// Ask the service whether `ip` answers pings from the configured nodes
///
/// Any node reporting a round-trip time means reachable; all nodes
/// answering without one means unreachable. A rate-limited, erroring, or
/// never-completing exchange is inconclusive.
pub async fn check_region_reachability(
    client: &Client,
    ip: &str,
    options: &RegionCheckOptions,
) -> Reachability {
    let submit_url = format!(
        "{}/check-ping?host={}&node={}",
        REGION_CHECK_BASE,
        ip,
        options.nodes.join(",")
    );

    let request_id = match submit_check(client, &submit_url).await {
        Some(id) => id,
        None => return Reachability::Inconclusive,
    };
    let result_url = format!("{}/check-result/{}", REGION_CHECK_BASE, request_id);

    let deadline = time::Instant::now() + options.deadline;
    time::sleep(options.initial_wait).await;

    loop {
        match poll_results(client, &result_url, &options.nodes).await {
            PollState::Reachable => return Reachability::Reachable,
            PollState::Unreachable => return Reachability::Unreachable,
            PollState::Error => return Reachability::Inconclusive,
            PollState::Pending => {
                if time::Instant::now() + options.poll_interval > deadline {
                    debug!("reachability check for {} never completed", ip);
                    return Reachability::Inconclusive;
                }
                time::sleep(options.poll_interval).await;
            }
        }
    }
}

async fn submit_check(client: &Client, url: &str) -> Option<String> {
    let response = client
        .get(url)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| debug!("reachability submit failed: {}", e))
        .ok()?;
    match response.json::<SubmitResponse>().await {
        Ok(submit) => submit.request_id,
        Err(e) => {
            debug!("reachability submit unreadable: {}", e);
            None
        }
    }
}

enum PollState {
    Reachable,
    Unreachable,
    Pending,
    Error,
}

async fn poll_results(client: &Client, url: &str, nodes: &[String]) -> PollState {
    let response = match client
        .get(url)
        .header("Accept", "application/json")
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            debug!("reachability poll failed: {}", e);
            return PollState::Error;
        }
    };
    let data = match response.json::<serde_json::Value>().await {
        Ok(v) => v,
        Err(e) => {
            debug!("reachability poll unreadable: {}", e);
            return PollState::Error;
        }
    };

    interpret_results(&data, nodes)
}

/// A node counts as answered once its entry is non-null; an answered node
/// whose first result renders with an `ms` round-trip marker is reachable
fn interpret_results(data: &serde_json::Value, nodes: &[String]) -> PollState {
    if !data.is_object() {
        return PollState::Error;
    }

    let mut answered = 0;
    for node in nodes {
        match data.get(node.as_str()) {
            Some(serde_json::Value::Null) | None => continue,
            Some(result) => {
                answered += 1;
                let first = result.get(0).cloned().unwrap_or(serde_json::Value::Null);
                if first.to_string().contains("ms") {
                    return PollState::Reachable;
                }
            }
        }
    }

    if answered == nodes.len() {
        PollState::Unreachable
    } else {
        PollState::Pending
    }
}
