//! In-memory representation of the input table
//!
//! - `EntityKeyedSeries`: entity key -> ordered per-entity observations
//! - label text parsing for Prometheus-style series identifiers

mod keyed;
mod labels;

pub use keyed::{EntityKeyedSeries, EntityPoints, Row};
pub use labels::{matrix_to_samples, parse_group_labels, parse_labels, LabelledColumn};
