//! Replicated entity collections
//!
//! [`ServerWorld`] owns the authoritative entities and hands out net ids.
//! [`ReplicatedWorld`] is the client mirror, filled by scopes and updated by
//! sim commits.

use replica_core::{IdGenerator, NetError, NetId, Result};
use replica_protocol::{Replicated, Scope, SimCommit};
use std::collections::{BTreeMap, BTreeSet};

/// Authoritative entities on the server
#[derive(Default)]
pub struct ServerWorld {
    entities: BTreeMap<NetId, Box<dyn Replicated>>,
    ids: IdGenerator,
    /// Net ids removed since the last [`take_despawned`](Self::take_despawned)
    despawned: Vec<NetId>,
}

impl ServerWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entity with a fresh net id
    ///
    /// # Arguments
    /// * `build` - Constructs the entity for the assigned net id
    ///
    /// # Returns
    /// The assigned net id. On error the id goes back to the pool.
    pub fn spawn<E, F>(&mut self, build: F) -> Result<NetId>
    where
        E: Replicated + 'static,
        F: FnOnce(NetId) -> Result<E>,
    {
        let net_id = NetId(self.ids.acquire());
        match build(net_id) {
            Ok(entity) => {
                tracing::debug!("Spawned entity {} (type {})", net_id.get(), entity.entity_type());
                self.entities.insert(net_id, Box::new(entity));
                Ok(net_id)
            }
            Err(e) => {
                self.ids.release(net_id.get());
                Err(e)
            }
        }
    }

    /// Remove an entity and recycle its net id
    pub fn despawn(&mut self, net_id: NetId) -> Option<Box<dyn Replicated>> {
        let entity = self.entities.remove(&net_id)?;
        self.ids.release(net_id.get());
        self.despawned.push(net_id);
        tracing::debug!("Despawned entity {}", net_id.get());
        Some(entity)
    }

    pub fn get(&self, net_id: NetId) -> Option<&dyn Replicated> {
        self.entities.get(&net_id).map(|e| e.as_ref())
    }

    pub fn get_mut(&mut self, net_id: NetId) -> Option<&mut (dyn Replicated + 'static)> {
        self.entities.get_mut(&net_id).map(|e| e.as_mut())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn net_ids(&self) -> impl Iterator<Item = NetId> + '_ {
        self.entities.keys().copied()
    }

    /// Scope of every entity a loading peer must receive
    pub fn initial_scope(&self) -> Scope<'_> {
        let mut scope = Scope::new();
        for entity in self.entities.values() {
            if entity.in_initial_scope() {
                scope.add(entity.as_ref());
            }
        }
        scope
    }

    /// Net ids of the entities every active peer should hold
    pub fn scoped_ids(&self) -> BTreeSet<NetId> {
        self.entities
            .iter()
            .filter(|(_, entity)| entity.in_initial_scope())
            .map(|(net_id, _)| *net_id)
            .collect()
    }

    /// Scope of the listed entities; unknown net ids are skipped
    pub fn scope_of<'a>(&'a self, net_ids: impl IntoIterator<Item = &'a NetId>) -> Scope<'a> {
        let mut scope = Scope::new();
        for net_id in net_ids {
            if let Some(entity) = self.entities.get(net_id) {
                scope.add(entity.as_ref());
            }
        }
        scope
    }

    /// Net ids despawned since the last call
    ///
    /// A recycled id shows up here even when it is already live again, so
    /// peers drop the old entity before the new one is scoped.
    pub fn take_despawned(&mut self) -> Vec<NetId> {
        std::mem::take(&mut self.despawned)
    }

    /// Collect the deltas of every dirty entity, clearing their dirty sets
    pub fn collect_deltas(&mut self, tick: u32) -> SimCommit {
        let mut commit = SimCommit::new(tick);
        for entity in self.entities.values_mut() {
            commit.add(entity.as_mut());
        }
        commit
    }
}

impl std::fmt::Debug for ServerWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerWorld")
            .field("entities", &self.entities.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Client-side mirror of the server's entities
#[derive(Default)]
pub struct ReplicatedWorld {
    entities: BTreeMap<NetId, Box<dyn Replicated>>,
}

impl ReplicatedWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scoped entity, replacing an older copy with the same net id
    pub fn insert(&mut self, entity: Box<dyn Replicated>) {
        self.entities.insert(entity.net_id(), entity);
    }

    pub fn remove(&mut self, net_id: NetId) -> Option<Box<dyn Replicated>> {
        self.entities.remove(&net_id)
    }

    pub fn get(&self, net_id: NetId) -> Option<&dyn Replicated> {
        self.entities.get(&net_id).map(|e| e.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }

    /// Apply the deltas of a sim commit
    ///
    /// Every net id and every snapshot is checked before anything is applied,
    /// so a rejected commit leaves the mirror untouched.
    ///
    /// # Errors
    /// `UnknownEntity` for a net id that was never scoped, or the first
    /// property error reported by an entity.
    pub fn apply_commit(&mut self, commit: &SimCommit) -> Result<()> {
        let mut validated = Vec::with_capacity(commit.deltas().len());
        for (net_id, snapshot) in commit.deltas() {
            let entity = self
                .entities
                .get(net_id)
                .ok_or(NetError::UnknownEntity(net_id.get()))?;
            validated.push(entity.properties().validate(snapshot)?);
        }

        for ((net_id, snapshot), indices) in commit.deltas().iter().zip(validated) {
            if let Some(entity) = self.entities.get_mut(net_id) {
                entity.properties_mut().apply_validated(&indices, snapshot);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ReplicatedWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedWorld")
            .field("entities", &self.entities.keys().collect::<Vec<_>>())
            .finish()
    }
}
