//! Entity constructors keyed by type id

use crate::bitstream::BitStream;
use crate::persistable::Replicated;
use replica_core::{NetError, NetId, Result};
use std::collections::HashMap;

/// Builds a replicated entity from its net id and its full property snapshot
pub type EntityConstructor =
    Box<dyn Fn(NetId, &mut BitStream<'_>) -> Result<Box<dyn Replicated>> + Send + Sync>;

/// Maps entity type ids to constructors
///
/// The receiving side of a scope uses this to turn `(type, net id, snapshot)`
/// entries back into objects. Owned by the session, never global.
#[derive(Default)]
pub struct EntityTypeRegistry {
    constructors: HashMap<u32, EntityConstructor>,
}

impl EntityTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for `entity_type`, replacing any previous one
    pub fn register<F>(&mut self, entity_type: u32, constructor: F)
    where
        F: Fn(NetId, &mut BitStream<'_>) -> Result<Box<dyn Replicated>> + Send + Sync + 'static,
    {
        self.constructors.insert(entity_type, Box::new(constructor));
    }

    pub fn contains(&self, entity_type: u32) -> bool {
        self.constructors.contains_key(&entity_type)
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }

    /// Construct an entity of `entity_type`, consuming its snapshot from `input`
    ///
    /// # Errors
    /// `UnknownEntityType` if no constructor is registered
    pub fn construct(
        &self,
        entity_type: u32,
        net_id: NetId,
        input: &mut BitStream<'_>,
    ) -> Result<Box<dyn Replicated>> {
        let constructor = self
            .constructors
            .get(&entity_type)
            .ok_or(NetError::UnknownEntityType(entity_type))?;
        constructor(net_id, input)
    }
}

impl std::fmt::Debug for EntityTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.constructors.keys().collect();
        types.sort();
        f.debug_struct("EntityTypeRegistry").field("types", &types).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistable::{NetworkPersistable, NetworkedEntity};

    #[test]
    fn test_construct_registered_type() {
        let mut registry = EntityTypeRegistry::new();
        registry.register(3, |net_id, input| {
            let mut entity = NetworkedEntity::new(net_id, 3);
            entity.register_property("health", 0u32)?;
            entity.unpack(input)?;
            Ok(Box::new(entity))
        });

        let mut source = NetworkedEntity::new(NetId(1), 3);
        source.register_property("health", 40u32).unwrap();
        let mut stream = BitStream::new();
        source.pack_all(&mut stream).unwrap();

        let entity = registry.construct(3, NetId(1), &mut stream).unwrap();
        assert_eq!(entity.net_id(), NetId(1));
        assert_eq!(*entity.properties().get_property::<u32>("health").unwrap(), 40);
    }

    #[test]
    fn test_unknown_type() {
        let registry = EntityTypeRegistry::new();
        let mut stream = BitStream::new();
        assert!(matches!(
            registry.construct(9, NetId(1), &mut stream),
            Err(NetError::UnknownEntityType(9))
        ));
    }
}
