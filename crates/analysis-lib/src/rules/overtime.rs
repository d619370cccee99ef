//! Longest continuous violation per entity
//!
//! Violation flags of every entity are aligned to one shared timestamp axis.
//! An entity without a sample at some axis timestamp is "not violating"
//! there, so gaps break runs instead of being bridged.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{AnalysisError, Result};
use crate::models::EntityKey;

/// Per-sample violation flags aligned to a shared timestamp axis
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViolationSeries {
    axis: Vec<DateTime<Utc>>,
    flags: BTreeMap<EntityKey, Vec<bool>>,
}

impl ViolationSeries {
    /// Create an empty series over `axis`, which is sorted and de-duplicated
    pub fn new(axis: impl IntoIterator<Item = DateTime<Utc>>) -> Self {
        let axis: Vec<DateTime<Utc>> = axis
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Self {
            axis,
            flags: BTreeMap::new(),
        }
    }

    /// Record the violating timestamps of an entity
    ///
    /// Timestamps outside the axis are ignored.
    pub fn insert(&mut self, entity: EntityKey, violating: &BTreeSet<DateTime<Utc>>) {
        let flags = self.axis.iter().map(|ts| violating.contains(ts)).collect();
        self.flags.insert(entity, flags);
    }

    /// Record already aligned flags of an entity
    pub fn insert_flags(&mut self, entity: EntityKey, flags: Vec<bool>) -> Result<()> {
        if flags.len() != self.axis.len() {
            return Err(AnalysisError::InvalidConfig(format!(
                "entity {entity} has {} flags for an axis of {} timestamps",
                flags.len(),
                self.axis.len()
            )));
        }
        self.flags.insert(entity, flags);
        Ok(())
    }

    pub fn axis(&self) -> &[DateTime<Utc>] {
        &self.axis
    }

    pub fn flags(&self, entity: &EntityKey) -> Option<&[bool]> {
        self.flags.get(entity).map(Vec::as_slice)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityKey> {
        self.flags.keys()
    }

    pub fn violation_count(&self, entity: &EntityKey) -> usize {
        self.flags(entity)
            .map(|f| f.iter().filter(|v| **v).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

/// Finds the longest wall-clock span an entity continuously violated a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OvertimeDetector {
    /// Minimum number of consecutive violating samples for a run to count
    pub min_run_length: usize,
    /// Report entities whose longest qualifying run spans 0 seconds
    pub include_zero_spans: bool,
}

impl OvertimeDetector {
    pub fn new(min_run_length: usize) -> Self {
        Self {
            min_run_length: min_run_length.max(1),
            include_zero_spans: false,
        }
    }

    pub fn with_zero_spans(mut self, include: bool) -> Self {
        self.include_zero_spans = include;
        self
    }

    /// Longest violation span in seconds per entity
    ///
    /// The span of a run is `last - first` timestamp of its violating
    /// samples, so a run of one sample spans 0 seconds. Entities without a
    /// qualifying run are omitted.
    pub fn longest_violation_span(&self, series: &ViolationSeries) -> BTreeMap<EntityKey, f64> {
        series
            .flags
            .iter()
            .filter_map(|(entity, flags)| {
                self.longest_run_secs(&series.axis, flags)
                    .filter(|secs| *secs > 0.0 || self.include_zero_spans)
                    .map(|secs| (entity.clone(), secs))
            })
            .collect()
    }

    fn longest_run_secs(&self, axis: &[DateTime<Utc>], flags: &[bool]) -> Option<f64> {
        violation_runs(flags)
            .filter(|(first, last)| last - first + 1 >= self.min_run_length)
            .map(|(first, last)| (axis[last] - axis[first]).num_milliseconds() as f64 / 1000.0)
            .reduce(f64::max)
    }
}

impl Default for OvertimeDetector {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Inclusive index ranges of maximal runs of `true`
fn violation_runs(flags: &[bool]) -> impl Iterator<Item = (usize, usize)> + '_ {
    let mut idx = 0;
    std::iter::from_fn(move || {
        while idx < flags.len() && !flags[idx] {
            idx += 1;
        }
        if idx >= flags.len() {
            return None;
        }
        let first = idx;
        while idx < flags.len() && flags[idx] {
            idx += 1;
        }
        Some((first, idx - 1))
    })
}
