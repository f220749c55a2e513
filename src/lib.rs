//! Proxy Sift - Proxy Descriptor Validator
//!
//! Validates a list of proxy descriptor URIs by driving an external
//! xray-compatible engine: descriptors are parsed and deduplicated, local
//! listeners are synthesized per batch, each proxy is probed concurrently
//! for reachability and latency, survivors are enriched with exit-point
//! geolocation, and the cleaned, retagged list is written back out.

pub mod engine;
pub mod pipeline;
pub mod proxy;

pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
