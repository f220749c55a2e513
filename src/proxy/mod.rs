//! Proxy descriptor handling
//!
//! This module provides functionality for:
//! - Parsing descriptor URIs into structured parameters
//! - Deduplicating entries by endpoint identity
//! - Probing proxies through the engine's local listeners
//! - Filtering probe results and retagging survivors

pub mod checker;
pub mod filter;
pub mod geo;
pub mod models;
pub mod parser;
pub mod retag;

pub use checker::{probe_assignments, HttpProber, Prober, ProberConfig};
pub use filter::{CheckPolicy, FilterOutcome, Verdict};
pub use geo::RegionCheckOptions;
pub use models::{
    CatalogEntry, IdentityKey, ParseError, ProbeResult, ProbeStatus, Protocol, ProxyParams,
    Reachability,
};
pub use parser::{deduplicate, DescriptorParser};
pub use retag::retag_with_country;
