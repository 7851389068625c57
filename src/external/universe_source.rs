use async_trait::async_trait;

use crate::errors::ClusteringError;
use crate::models::asset::Universe;

/// Where the asset series of a run come from.
///
/// Implementations deliver aligned series; the engine does not resample or
/// fill gaps.
#[async_trait]
pub trait UniverseSource: Send + Sync {
    async fn load_universe(&self) -> Result<Universe, ClusteringError>;

    /// Short label used in logs.
    fn describe(&self) -> String;
}

/// A universe already held in memory.
pub struct StaticUniverse {
    universe: Universe,
}

impl StaticUniverse {
    pub fn new(universe: Universe) -> Self {
        Self { universe }
    }
}

#[async_trait]
impl UniverseSource for StaticUniverse {
    async fn load_universe(&self) -> Result<Universe, ClusteringError> {
        Ok(self.universe.clone())
    }

    fn describe(&self) -> String {
        format!("in-memory universe ({} assets)", self.universe.len())
    }
}
