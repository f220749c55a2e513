//! Keep/discard decisions for probed entries

use crate::proxy::models::{ProbeResult, Reachability};
use crate::proxy::retag::retag_with_country;
use log::info;

/// Toggles threaded through the prober and the filter
///
/// Explicit parameters instead of ambient state, so a run's behavior is
/// reproducible under concurrent tests.
#[derive(Debug, Clone)]
pub struct CheckPolicy {
    /// Rewrite surviving tags with the exit country code
    pub tag_location: bool,
    /// Discard entries not reachable from the target region
    pub region_filter: bool,
    /// Whether an inconclusive regional check keeps the entry (fail open)
    pub keep_inconclusive: bool,
}

impl Default for CheckPolicy {
    fn default() -> Self {
        Self {
            tag_location: false,
            region_filter: false,
            keep_inconclusive: true,
        }
    }
}

/// Decision for one probed entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Keep { retag: Option<String> },
    Discard,
}

/// Apply the decision table to one probe result
pub fn decide(result: &ProbeResult, policy: &CheckPolicy) -> Verdict {
    if !result.is_success() {
        return Verdict::Discard;
    }

    if policy.region_filter {
        let discard = match result.reachability {
            Reachability::Unreachable => true,
            Reachability::Reachable => false,
            Reachability::Inconclusive | Reachability::NotChecked => !policy.keep_inconclusive,
        };
        if discard {
            return Verdict::Discard;
        }
    }

    if policy.tag_location {
        Verdict::Keep {
            retag: Some(result.country.clone()),
        }
    } else {
        Verdict::Keep { retag: None }
    }
}

/// Survivors of one batch plus accounting for the summary
#[derive(Debug, Default)]
pub struct FilterOutcome {
    /// Kept descriptors in probe arrival order, retagged where requested
    pub survivors: Vec<String>,
    /// Successful probes discarded by the regional filter
    pub region_discards: usize,
}

/// Filter a batch's probe results and retag the survivors
pub fn apply(results: &[ProbeResult], policy: &CheckPolicy) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();
    for result in results {
        match decide(result, policy) {
            Verdict::Keep { retag: None } => outcome.survivors.push(result.entry.raw.clone()),
            Verdict::Keep { retag: Some(country) } => {
                outcome
                    .survivors
                    .push(retag_with_country(&result.entry.raw, &country));
            }
            Verdict::Discard => {
                if result.is_success() {
                    info!(
                        "{} discarded by regional filter",
                        result.entry.params.display_tag
                    );
                    outcome.region_discards += 1;
                }
            }
        }
    }
    outcome
}
