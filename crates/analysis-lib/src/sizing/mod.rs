//! Resource right-sizing
//!
//! Recommends container requests and limits from usage percentiles:
//! the request percentile (p50 by default) becomes the request and the
//! limit percentile (p95 by default) the limit.

mod calculator;
mod output;
mod percentiles;


pub use calculator::{
    EntityUsage, LimitsRequests, PercentileRow, PercentileSizingCalculator, Resource,
    SizingConfig, Unit, CPU_RESOURCE, MEMORY_RESOURCE,
};
pub use output::{merge_sizings, to_ini};
pub use percentiles::{percentile_label, Distribution, Quantile};
