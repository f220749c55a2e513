//! Proxy prober module for checking tunnels through their local listeners
//!
//! Each ready entry gets an independent probe through its allocated SOCKS
//! port: a latency check against a low-payload URL, exit-IP discovery,
//! an optional regional-reachability check, and an optional geolocation
//! lookup. Probes run in a bounded-concurrency pool; one entry's failure
//! never affects another entry or the pool.

use crate::engine::config::PortAssignment;
use crate::proxy::filter::CheckPolicy;
use crate::proxy::geo::{self, RegionCheckOptions};
use crate::proxy::models::{ProbeResult, ProbeStatus, Reachability, UNKNOWN_COUNTRY};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, info};
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Default timeout for each probe request in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default number of concurrent probes
const DEFAULT_CONCURRENCY: usize = 10;

/// Default low-payload URL fetched for the connectivity check
const DEFAULT_TEST_URL: &str = "http://www.google.com/generate_204";

/// Default user agent for probe requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";

/// Configuration for the prober
#[derive(Debug, Clone)]
pub struct ProberConfig {
    /// Timeout for each request through the tunnel
    pub timeout: Duration,
    /// URL to test connectivity against
    pub test_url: String,
    /// Regional reachability service knobs
    pub region: RegionCheckOptions,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            test_url: DEFAULT_TEST_URL.to_string(),
            region: RegionCheckOptions::default(),
        }
    }
}

impl ProberConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.test_url = url;
        self
    }

    pub fn with_region(mut self, region: RegionCheckOptions) -> Self {
        self.region = region;
        self
    }
}

/// Probes one entry through its local listener
///
/// A trait so the pipeline can run against a scripted prober in tests.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, assignment: &PortAssignment, policy: &CheckPolicy) -> ProbeResult;
}

/// Prober issuing real HTTP requests through the engine's SOCKS listeners
pub struct HttpProber {
    config: ProberConfig,
}

impl HttpProber {
    pub fn new(config: ProberConfig) -> Self {
        Self { config }
    }

    /// Create a client bound to the entry's local SOCKS port
    ///
    /// `socks5h` so DNS resolution also happens behind the tunnel.
    fn client_for(&self, local_port: u16) -> crate::Result<Client> {
        let proxy = reqwest::Proxy::all(format!("socks5h://127.0.0.1:{}", local_port))?;
        let client = Client::builder()
            .proxy(proxy)
            .timeout(self.config.timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;
        Ok(client)
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, assignment: &PortAssignment, policy: &CheckPolicy) -> ProbeResult {
        let entry = assignment.entry.clone();
        let client = match self.client_for(assignment.local_port) {
            Ok(client) => client,
            Err(e) => return ProbeResult::connect_failed(entry, e.to_string()),
        };

        let start = Instant::now();
        match client.get(&self.config.test_url).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                return ProbeResult::connect_failed(
                    entry,
                    format!("HTTP status: {}", response.status()),
                )
            }
            Err(e) => return ProbeResult::connect_failed(entry, e.to_string()),
        }
        let latency_ms = start.elapsed().as_millis() as u64;
        debug!("{} answered in {}ms", entry.params.display_tag, latency_ms);

        let exit_ip = if policy.region_filter || policy.tag_location {
            geo::discover_exit_ip(&client).await
        } else {
            None
        };

        let reachability = if policy.region_filter {
            match &exit_ip {
                Some(ip) => geo::check_region_reachability(&client, ip, &self.config.region).await,
                // No exit IP to hand the service; same bucket as a failed call
                None => Reachability::Inconclusive,
            }
        } else {
            Reachability::NotChecked
        };

        let country = if policy.tag_location {
            geo::fetch_country_code(&client).await
        } else {
            UNKNOWN_COUNTRY.to_string()
        };

        ProbeResult {
            entry,
            status: ProbeStatus::Success,
            latency_ms: Some(latency_ms),
            exit_ip,
            country,
            reachability,
        }
    }
}

/// Probe a batch's ready entries in a bounded-concurrency pool
///
/// Results arrive in completion order, not input order.
pub async fn probe_assignments(
    prober: &dyn Prober,
    assignments: &[PortAssignment],
    policy: &CheckPolicy,
    concurrency: usize,
) -> Vec<ProbeResult> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    info!("probing {} entries", assignments.len());

    stream::iter(assignments)
        .map(|assignment| {
            let sem = Arc::clone(&semaphore);
            async move {
                // Semaphore acquire only fails if the semaphore is closed,
                // which won't happen here since we own the Arc and keep it
                // alive for the duration of the probe run.
                let _permit = sem
                    .acquire()
                    .await
                    .expect("Semaphore closed unexpectedly");
                prober.probe(assignment, policy).await
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await
}
