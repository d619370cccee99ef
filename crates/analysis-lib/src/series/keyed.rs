//! Entity-keyed time series
//!
//! The input table is reshaped once into a map from entity key to an ordered
//! per-entity series. Every later step reads from this shape, so the
//! duplicate check lives here: a (timestamp, entity) pair may appear once.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{AnalysisError, Result};
use crate::models::{EntityKey, MetricSample};

/// Column values of one (timestamp, entity) observation, aligned to
/// [`EntityKeyedSeries::columns`]
pub type Row = Vec<Option<f64>>;

/// Ordered observations of one entity
pub type EntityPoints = BTreeMap<DateTime<Utc>, Row>;

/// Time-indexed multi-entity dataset
#[derive(Debug, Clone, PartialEq)]
pub struct EntityKeyedSeries {
    dimensions: Vec<String>,
    columns: Vec<String>,
    entities: BTreeMap<EntityKey, EntityPoints>,
}

impl EntityKeyedSeries {
    /// Build the series from input samples keyed by `dimensions`
    ///
    /// Columns are the union of all value names. NaN is treated as missing.
    pub fn from_samples<I>(dimensions: &[String], samples: I) -> Result<Self>
    where
        I: IntoIterator<Item = MetricSample>,
    {
        let samples: Vec<MetricSample> = samples.into_iter().collect();
        let columns: Vec<String> = samples
            .iter()
            .flat_map(|s| s.values.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut entities: BTreeMap<EntityKey, EntityPoints> = BTreeMap::new();
        for sample in samples {
            let mut parts = Vec::with_capacity(dimensions.len());
            for dimension in dimensions {
                match sample.labels.get(dimension) {
                    Some(value) => parts.push(value.clone()),
                    None => {
                        return Err(AnalysisError::MissingColumn {
                            column: dimension.clone(),
                            available: sample.labels.keys().cloned().collect(),
                        })
                    }
                }
            }
            let row: Row = columns
                .iter()
                .map(|c| sample.values.get(c).copied().flatten().filter(|v| !v.is_nan()))
                .collect();

            let key = EntityKey(parts);
            let points = entities.entry(key.clone()).or_default();
            if points.insert(sample.timestamp, row).is_some() {
                return Err(AnalysisError::DuplicateSample {
                    entity: key.to_string(),
                    timestamp: sample.timestamp,
                });
            }
        }

        Ok(Self {
            dimensions: dimensions.to_vec(),
            columns,
            entities,
        })
    }

    pub fn dimensions(&self) -> &[String] {
        &self.dimensions
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Total number of (timestamp, entity) observations
    pub fn sample_count(&self) -> usize {
        self.entities.values().map(BTreeMap::len).sum()
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityKey> {
        self.entities.keys()
    }

    /// Position of a column in every [`Row`]
    pub fn column_index(&self, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| AnalysisError::MissingColumn {
                column: column.to_string(),
                available: self.columns.clone(),
            })
    }

    fn dimension_index(&self, dimension: &str) -> Result<usize> {
        self.dimensions
            .iter()
            .position(|d| d == dimension)
            .ok_or_else(|| AnalysisError::MissingColumn {
                column: dimension.to_string(),
                available: self.dimensions.clone(),
            })
    }

    /// Union of all timestamps, ascending
    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.entities
            .values()
            .flat_map(|points| points.keys().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// One column of one entity, in timestamp order
    pub fn column_values<'a>(
        &'a self,
        entity: &EntityKey,
        column_idx: usize,
    ) -> impl Iterator<Item = (DateTime<Utc>, Option<f64>)> + 'a {
        self.entities
            .get(entity)
            .into_iter()
            .flat_map(move |points| points.iter().map(move |(ts, row)| (*ts, row[column_idx])))
    }

    /// Member entities of every group formed by a subset of the dimensions
    ///
    /// Group keys follow the order of `keys`. Keys naming every dimension
    /// give one single-member group per entity.
    pub fn group_members(&self, keys: &[String]) -> Result<BTreeMap<EntityKey, Vec<EntityKey>>> {
        let positions = keys
            .iter()
            .map(|k| self.dimension_index(k))
            .collect::<Result<Vec<_>>>()?;

        let mut groups: BTreeMap<EntityKey, Vec<EntityKey>> = BTreeMap::new();
        for key in self.entities.keys() {
            let group = EntityKey(positions.iter().map(|p| key.0[*p].clone()).collect());
            groups.entry(group).or_default().push(key.clone());
        }
        Ok(groups)
    }

    /// Split into one series per distinct value of `dimension`
    ///
    /// The split dimension is removed from the resulting keys.
    pub fn split_by(&self, dimension: &str) -> Result<BTreeMap<String, Self>> {
        let idx = self.dimension_index(dimension)?;
        let dimensions: Vec<String> = self
            .dimensions
            .iter()
            .filter(|d| *d != dimension)
            .cloned()
            .collect();

        let mut parts: BTreeMap<String, BTreeMap<EntityKey, EntityPoints>> = BTreeMap::new();
        for (key, points) in &self.entities {
            let mut rest = key.0.clone();
            let value = rest.remove(idx);
            parts
                .entry(value)
                .or_default()
                .insert(EntityKey(rest), points.clone());
        }

        Ok(parts
            .into_iter()
            .map(|(value, entities)| {
                let series = Self {
                    dimensions: dimensions.clone(),
                    columns: self.columns.clone(),
                    entities,
                };
                (value, series)
            })
            .collect())
    }

    /// Keep only entities whose `dimension` equals `value`
    pub fn filter(&self, dimension: &str, value: &str) -> Result<Self> {
        let idx = self.dimension_index(dimension)?;
        let entities = self
            .entities
            .iter()
            .filter(|(key, _)| key.0[idx] == value)
            .map(|(key, points)| (key.clone(), points.clone()))
            .collect();
        Ok(Self {
            dimensions: self.dimensions.clone(),
            columns: self.columns.clone(),
            entities,
        })
    }
}
