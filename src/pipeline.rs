//! End-to-end validation pipeline
//!
//! Parse → dedup → batch synthesis → engine start → readiness poll →
//! concurrent probe → filter/retag → collect. Batches run sequentially so
//! only one engine instance is alive at a time; a batch-fatal error
//! (engine start failure or crash) abandons that batch only and the run
//! continues with the next one.

use crate::engine::config::{synthesize_batches, BatchPlan, PortAssignment, SynthesisOptions};
use crate::engine::process::EngineLauncher;
use crate::engine::readiness::{await_listeners, ReadinessOptions};
use crate::proxy::checker::{probe_assignments, Prober};
use crate::proxy::filter::{self, CheckPolicy};
use crate::proxy::models::{ProbeResult, ProbeStatus};
use crate::proxy::parser::{deduplicate, DescriptorParser};
use log::{info, warn};

/// Knobs for one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub synthesis: SynthesisOptions,
    pub readiness: ReadinessOptions,
    pub policy: CheckPolicy,
    /// Concurrent probes per batch
    pub concurrency: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            synthesis: SynthesisOptions::default(),
            readiness: ReadinessOptions::default(),
            policy: CheckPolicy::default(),
            concurrency: 10,
        }
    }
}

/// Summary of one pipeline run
#[derive(Debug, Default)]
pub struct PipelineReport {
    /// Candidate lines (blank lines and comments excluded)
    pub input: usize,
    /// Lines that parsed into a catalog entry
    pub parsed: usize,
    /// Entries left after identity dedup
    pub unique: usize,
    /// Entries the engine could not express
    pub skipped_build: usize,
    /// Entries whose listener never became ready (or whose batch died)
    pub not_ready: usize,
    /// Entries that failed the connectivity probe
    pub connect_failed: usize,
    /// Successful probes discarded by the regional filter
    pub region_filtered: usize,
    /// Surviving descriptors in probe arrival order
    pub survivors: Vec<String>,
}

impl PipelineReport {
    pub fn surviving(&self) -> usize {
        self.survivors.len()
    }
}

/// Validate a descriptor list and return the surviving descriptors
pub async fn run(
    content: &str,
    launcher: &dyn EngineLauncher,
    prober: &dyn Prober,
    options: &PipelineOptions,
) -> crate::Result<PipelineReport> {
    let mut report = PipelineReport {
        input: content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .count(),
        ..Default::default()
    };

    let entries = DescriptorParser::parse_list(content);
    report.parsed = entries.len();

    let unique = deduplicate(entries);
    report.unique = unique.len();
    info!("{} candidates, {} unique", report.input, report.unique);

    let plans = synthesize_batches(unique, &options.synthesis)?;
    for plan in &plans {
        report.skipped_build += plan.skipped.len();
        let results = run_batch(plan, launcher, prober, options).await;
        account(&mut report, &results, &options.policy);
    }

    info!(
        "{} of {} unique entries survived",
        report.surviving(),
        report.unique
    );
    Ok(report)
}

/// Probe one batch under its own engine instance
///
/// The engine handle is stopped on every exit path of this function; an
/// unwind is backstopped by the handle's kill-on-drop.
async fn run_batch(
    plan: &BatchPlan,
    launcher: &dyn EngineLauncher,
    prober: &dyn Prober,
    options: &PipelineOptions,
) -> Vec<ProbeResult> {
    if plan.assignments.is_empty() {
        return Vec::new();
    }
    info!(
        "batch {}: starting engine for {} entries",
        plan.index,
        plan.assignments.len()
    );

    let mut handle = match launcher.start(plan).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!("batch {}: engine failed to start: {}", plan.index, e);
            return plan
                .assignments
                .iter()
                .map(|a| ProbeResult::not_ready(a.entry.clone()))
                .collect();
        }
    };

    let ports: Vec<u16> = plan.assignments.iter().map(|a| a.local_port).collect();
    let readiness = await_listeners(handle.as_mut(), &ports, &options.readiness).await;
    if readiness.engine_crashed {
        warn!(
            "batch {}: engine crashed, probing the {} listeners that were ready",
            plan.index,
            readiness.ready.len()
        );
    }

    let (ready, unready): (Vec<&PortAssignment>, Vec<&PortAssignment>) = plan
        .assignments
        .iter()
        .partition(|a| readiness.ready.contains(&a.local_port));

    let ready: Vec<PortAssignment> = ready.into_iter().cloned().collect();
    let mut results = probe_assignments(prober, &ready, &options.policy, options.concurrency).await;
    results.extend(
        unready
            .into_iter()
            .map(|a| ProbeResult::not_ready(a.entry.clone())),
    );

    handle.stop().await;
    results
}

fn account(report: &mut PipelineReport, results: &[ProbeResult], policy: &CheckPolicy) {
    for result in results {
        match &result.status {
            ProbeStatus::NotReady => report.not_ready += 1,
            ProbeStatus::ConnectFailed(_) => report.connect_failed += 1,
            ProbeStatus::Success => {}
        }
    }
    let outcome = filter::apply(results, policy);
    report.region_filtered += outcome.region_discards;
    report.survivors.extend(outcome.survivors);
}
