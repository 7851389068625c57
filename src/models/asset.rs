use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ClusteringError;

/// How the observation values of every asset in a run are interpreted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SeriesKind {
    /// Price levels; returns are derived as simple percentage changes.
    #[default]
    Price,
    /// Periodic returns; a price index is rebuilt as the cumulative product of `1 + r`.
    Return,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// One tradable asset and its aligned, gap-free series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub observations: Vec<Observation>,
}

impl Asset {
    pub fn new(id: impl Into<String>, observations: Vec<Observation>) -> Self {
        Self {
            id: id.into(),
            observations,
        }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.value).collect()
    }

    /// Return series under the given interpretation.
    pub fn returns(&self, kind: SeriesKind) -> Vec<f64> {
        match kind {
            SeriesKind::Return => self.values(),
            SeriesKind::Price => self
                .observations
                .windows(2)
                .map(|w| (w[1].value - w[0].value) / w[0].value)
                .collect(),
        }
    }

    /// Price levels under the given interpretation.
    pub fn price_index(&self, kind: SeriesKind) -> Vec<f64> {
        match kind {
            SeriesKind::Price => self.values(),
            SeriesKind::Return => self
                .observations
                .iter()
                .scan(1.0_f64, |level, o| {
                    *level *= 1.0 + o.value;
                    Some(*level)
                })
                .collect(),
        }
    }

    /// Rejects non-finite values and, for prices, non-positive levels.
    pub fn validate(&self, kind: SeriesKind) -> Result<(), ClusteringError> {
        if let Some(pos) = self.observations.iter().position(|o| !o.value.is_finite()) {
            return Err(ClusteringError::InvalidSeries {
                asset: self.id.clone(),
                reason: format!("non-finite value at index {}", pos),
            });
        }
        if kind == SeriesKind::Price {
            if let Some(pos) = self.observations.iter().position(|o| o.value <= 0.0) {
                return Err(ClusteringError::InvalidSeries {
                    asset: self.id.clone(),
                    reason: format!("non-positive price at index {}", pos),
                });
            }
        }
        if self
            .observations
            .windows(2)
            .any(|w| w[1].timestamp <= w[0].timestamp)
        {
            return Err(ClusteringError::InvalidSeries {
                asset: self.id.clone(),
                reason: "timestamps are not strictly increasing".to_string(),
            });
        }
        Ok(())
    }
}

/// The full set of assets considered in one analysis run, ordered by identifier.
#[derive(Debug, Clone, Default)]
pub struct Universe {
    assets: Vec<Asset>,
}

impl Universe {
    pub fn new(mut assets: Vec<Asset>) -> Result<Self, ClusteringError> {
        assets.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(dup) = assets.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(ClusteringError::InvalidConfig(format!(
                "duplicate asset identifier {}",
                dup[0].id
            )));
        }
        Ok(Self { assets })
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.assets.iter().map(|a| a.id.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Asset> {
        self.assets
            .binary_search_by(|a| a.id.as_str().cmp(id))
            .ok()
            .map(|idx| &self.assets[idx])
    }
}
