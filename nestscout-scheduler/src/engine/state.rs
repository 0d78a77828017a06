//! Entity catalog and proximity index owned by the engine.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use nestscout_core::{
    ProfileId, Property, PropertyId, ProximityIndex, ProximitySnapshot, SearchProfile,
    SignalSnapshot,
};

use crate::source::{ScoringSource, SourceError};

#[derive(Debug, Default)]
pub(crate) struct Catalog {
    pub(crate) properties: BTreeMap<PropertyId, Property>,
    pub(crate) profiles: BTreeMap<ProfileId, SearchProfile>,
    pub(crate) signals: HashMap<PropertyId, SignalSnapshot>,
}

/// Shared state read by workers and written by event handlers.
///
/// The two locks are never held together.
#[derive(Debug)]
pub(crate) struct EngineState {
    catalog: RwLock<Catalog>,
    index: RwLock<ProximityIndex>,
}

impl EngineState {
    pub(crate) fn new(index: ProximityIndex) -> Self {
        Self {
            catalog: RwLock::new(Catalog::default()),
            index: RwLock::new(index),
        }
    }

    pub(crate) fn catalog(&self) -> RwLockReadGuard<'_, Catalog> {
        self.catalog.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn catalog_mut(&self) -> RwLockWriteGuard<'_, Catalog> {
        self.catalog.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn index(&self) -> RwLockReadGuard<'_, ProximityIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn index_mut(&self) -> RwLockWriteGuard<'_, ProximityIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ScoringSource for EngineState {
    async fn property(&self, id: PropertyId) -> Result<Option<Property>, SourceError> {
        Ok(self.catalog().properties.get(&id).cloned())
    }

    async fn profile(&self, id: ProfileId) -> Result<Option<SearchProfile>, SourceError> {
        Ok(self.catalog().profiles.get(&id).cloned())
    }

    async fn proximity(&self, property: PropertyId) -> Result<ProximitySnapshot, SourceError> {
        Ok(self.index().snapshot(property))
    }

    async fn signals(&self, property: PropertyId) -> Result<SignalSnapshot, SourceError> {
        Ok(self
            .catalog()
            .signals
            .get(&property)
            .cloned()
            .unwrap_or_default())
    }
}
