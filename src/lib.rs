//! Estimate connection quality with timed HTTP probes.
//!
//! A run measures ping, download and upload against configurable endpoints,
//! reduces each metric to the median of its samples and scores it on a
//! gauge and a quality tier. See [`orchestrator::Orchestrator`] for the
//! entry point.

pub mod aggregator;
pub mod config;
pub mod endpoints;
pub mod errors;
pub mod http;
pub mod measurements;
pub mod metric;
pub mod orchestrator;
pub mod presenter;
pub mod results;
pub mod sampler;
pub mod scoring;
pub mod stats;
