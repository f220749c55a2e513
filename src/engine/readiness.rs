//! Listener readiness polling
//!
//! After the engine starts it needs a moment to bind the batch's local
//! listeners. The poller TCP-connects to every not-yet-ready port under a
//! bounded iteration budget, stopping early when all ports accept or when
//! the engine is observed dead. Partial readiness is allowed: ports that
//! never accept are reported back and their entries skipped, not retried.

use crate::engine::process::EngineHandle;
use futures::future::join_all;
use log::{debug, warn};
use std::collections::HashSet;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;

#[derive(Debug, Clone)]
pub struct ReadinessOptions {
    /// Polling rounds before giving up
    pub attempts: u32,
    /// Pause between rounds
    pub interval: Duration,
    /// Per-port connect timeout within a round
    pub connect_timeout: Duration,
}

impl Default for ReadinessOptions {
    fn default() -> Self {
        Self {
            attempts: 20,
            interval: Duration::from_millis(500),
            connect_timeout: Duration::from_millis(250),
        }
    }
}

#[derive(Debug)]
pub struct ReadinessOutcome {
    pub ready: HashSet<u16>,
    /// The engine was observed not running before all ports became ready
    pub engine_crashed: bool,
}

/// Poll the batch's local ports until all accept, the engine dies, or the
/// iteration budget runs out
pub async fn await_listeners(
    handle: &mut dyn EngineHandle,
    ports: &[u16],
    options: &ReadinessOptions,
) -> ReadinessOutcome {
    let mut pending: Vec<u16> = ports.to_vec();
    let mut ready = HashSet::new();

    for attempt in 0..options.attempts {
        if pending.is_empty() {
            break;
        }
        if !handle.is_running() {
            warn!(
                "engine exited with {} of {} listeners still pending",
                pending.len(),
                ports.len()
            );
            return ReadinessOutcome {
                ready,
                engine_crashed: true,
            };
        }

        let checks = pending
            .iter()
            .map(|&port| async move { (port, accepts(port, options.connect_timeout).await) });
        let mut still_pending = Vec::new();
        for (port, ok) in join_all(checks).await {
            if ok {
                ready.insert(port);
            } else {
                still_pending.push(port);
            }
        }
        pending = still_pending;

        if !pending.is_empty() && attempt + 1 < options.attempts {
            time::sleep(options.interval).await;
        }
    }

    if !pending.is_empty() {
        debug!("{} listeners never became ready: {:?}", pending.len(), pending);
    }
    ReadinessOutcome {
        ready,
        engine_crashed: false,
    }
}

async fn accepts(port: u16, timeout: Duration) -> bool {
    matches!(
        time::timeout(timeout, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}
