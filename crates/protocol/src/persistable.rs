//! Property registry with delta replication
//!
//! A [`PropertyTable`] owns the networked values of one object. Properties are
//! keyed by the FNV-1a hash of their name, so two peers that register the same
//! names in different orders still agree on the wire.
//!
//! # Snapshot format
//! `[count: u32]` followed by `count` triples of `[key: u64][tag: u8][value]`.
//! A full snapshot lists every property in registration order; a delta lists
//! only the properties changed since the last delta.

use crate::bitstream::{BitStream, Serializable};
use crate::property::{expect_type, NetworkedValue, PropertySlot, PropertyType, PropertyValue};
use replica_core::{name_hash, NetError, NetId, Result};
use std::collections::{BTreeSet, HashMap};
use std::ops::BitOr;

/// Size of the `[count: u32]` snapshot prefix
const COUNT_LEN: usize = 4;
/// Size of the `[key: u64][tag: u8]` prefix of each property
const ENTRY_PREFIX_LEN: usize = 9;

/// One registered property
#[derive(Debug, Clone)]
pub struct PropertyEntry {
    name: String,
    key: u64,
    value: PropertyValue,
}

impl PropertyEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn property_type(&self) -> PropertyType {
        self.value.property_type()
    }

    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    fn encoded_len(&self) -> usize {
        ENTRY_PREFIX_LEN + self.value.encoded_len()
    }

    fn pack(&self, out: &mut BitStream<'_>) -> Result<()> {
        out.write(self.key)?;
        out.write(self.property_type().tag())?;
        self.value.write_to(out)
    }
}

/// Networked properties of one object
#[derive(Debug)]
pub struct PropertyTable {
    entries: Vec<PropertyEntry>,
    by_key: HashMap<u64, usize>,
    dirty: BTreeSet<usize>,
}

impl PropertyTable {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_key: HashMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// Register a new property
    ///
    /// # Arguments
    /// * `name` - Property name, unique within this table
    /// * `initial` - Starting value; also fixes the property's type
    ///
    /// # Returns
    /// A typed slot for fast access
    ///
    /// # Errors
    /// `DuplicateProperty` if the name (or its hash) is already registered
    pub fn register_property<T: NetworkedValue>(
        &mut self,
        name: &str,
        initial: T,
    ) -> Result<PropertySlot<T>> {
        let index = self.register_value(name, initial.into_value())?;
        Ok(PropertySlot::new(index, self.entries[index].key))
    }

    /// Register a property from an untyped value
    ///
    /// Used by owners that build their property set at runtime.
    ///
    /// # Returns
    /// The registration index of the new property
    pub fn register_value(&mut self, name: &str, initial: PropertyValue) -> Result<usize> {
        let key = name_hash(name);
        if self.by_key.contains_key(&key) {
            return Err(NetError::DuplicateProperty(name.to_string()));
        }

        let index = self.entries.len();
        self.entries.push(PropertyEntry {
            name: name.to_string(),
            key,
            value: initial,
        });
        self.by_key.insert(key, index);
        Ok(index)
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.by_key
            .get(&name_hash(name))
            .copied()
            .ok_or_else(|| NetError::UnknownProperty(name.to_string()))
    }

    fn slot_index<T>(&self, slot: &PropertySlot<T>) -> Result<usize> {
        match self.entries.get(slot.index) {
            Some(entry) if entry.key == slot.key => Ok(slot.index),
            _ => Err(NetError::UnknownProperty(format!("slot {}", slot.index))),
        }
    }

    fn store<T: NetworkedValue>(&mut self, index: usize, value: T) -> Result<()> {
        let entry = &mut self.entries[index];
        if entry.property_type() != T::TYPE {
            return Err(NetError::TypeMismatch {
                property: entry.name.clone(),
                expected: entry.property_type().name(),
                found: T::TYPE.name(),
            });
        }
        entry.value = value.into_value();
        self.dirty.insert(index);
        Ok(())
    }

    /// Set a property by name and mark it dirty
    ///
    /// # Errors
    /// `UnknownProperty` if `name` was never registered, `TypeMismatch` if it was
    /// registered with another type. The stored value is untouched on error.
    pub fn set_property<T: NetworkedValue>(&mut self, name: &str, value: T) -> Result<()> {
        let index = self.index_of(name)?;
        self.store(index, value)
    }

    /// Get a property by name
    pub fn get_property<T: NetworkedValue>(&self, name: &str) -> Result<&T> {
        let entry = &self.entries[self.index_of(name)?];
        expect_type(&entry.name, &entry.value)
    }

    /// Set a property through its slot and mark it dirty
    pub fn set<T: NetworkedValue>(&mut self, slot: PropertySlot<T>, value: T) -> Result<()> {
        let index = self.slot_index(&slot)?;
        self.store(index, value)
    }

    /// Get a property through its slot
    pub fn get<T: NetworkedValue>(&self, slot: PropertySlot<T>) -> Result<&T> {
        let entry = &self.entries[self.slot_index(&slot)?];
        expect_type(&entry.name, &entry.value)
    }

    /// Untyped lookup by name
    pub fn value(&self, name: &str) -> Option<&PropertyValue> {
        self.index_of(name).ok().map(|i| &self.entries[i].value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_key.contains_key(&name_hash(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in registration order
    pub fn entries(&self) -> impl Iterator<Item = &PropertyEntry> {
        self.entries.iter()
    }

    /// Whether any property changed since the last delta
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Mark every property dirty, so the next delta carries the full state
    pub fn mark_all_dirty(&mut self) {
        self.dirty = (0..self.entries.len()).collect();
    }

    /// Bytes written by [`pack_all`](Self::pack_all)
    pub fn snapshot_len(&self) -> usize {
        COUNT_LEN + self.entries.iter().map(PropertyEntry::encoded_len).sum::<usize>()
    }

    /// Bytes written by [`pack_deltas`](Self::pack_deltas)
    pub fn delta_len(&self) -> usize {
        COUNT_LEN
            + self
                .dirty
                .iter()
                .map(|&i| self.entries[i].encoded_len())
                .sum::<usize>()
    }

    /// Write every property in registration order
    pub fn pack_all(&self, out: &mut BitStream<'_>) -> Result<()> {
        out.write(self.entries.len() as u32)?;
        for entry in &self.entries {
            entry.pack(out)?;
        }
        Ok(())
    }

    /// Write only the properties changed since the last delta, then clear the dirty set
    ///
    /// The dirty set survives a failed pack.
    pub fn pack_deltas(&mut self, out: &mut BitStream<'_>) -> Result<()> {
        out.write(self.dirty.len() as u32)?;
        for &index in &self.dirty {
            self.entries[index].pack(out)?;
        }
        self.dirty.clear();
        Ok(())
    }

    /// Read a snapshot (full or delta) and apply it
    ///
    /// Every key and tag is validated before any value is applied, so a
    /// malformed snapshot leaves the table unchanged. Applied values are not
    /// marked dirty.
    ///
    /// # Errors
    /// `UnknownProperty` for an unregistered key, `InvalidTypeTag` for a tag
    /// outside the enum, `TypeMismatch` if the tag disagrees with the registered
    /// type, and any stream error from a truncated block.
    pub fn unpack(&mut self, input: &mut BitStream<'_>) -> Result<()> {
        let count = input.read::<u32>()?;

        // No preallocation from an untrusted count
        let mut updates = Vec::new();
        for _ in 0..count {
            let key = input.read::<u64>()?;
            let tag = input.read::<u8>()?;
            let ty = PropertyType::from_u8(tag).ok_or(NetError::InvalidTypeTag(tag))?;

            let index = self.resolve(key, ty)?;
            updates.push((index, PropertyValue::read_from(ty, input)?));
        }

        for (index, value) in updates {
            self.entries[index].value = value;
        }
        Ok(())
    }

    /// Check that every value of `snapshot` matches a registered property
    ///
    /// # Returns
    /// The registration index of each entry, in snapshot order
    pub fn validate(&self, snapshot: &Snapshot) -> Result<Vec<usize>> {
        snapshot
            .entries
            .iter()
            .map(|(key, value)| self.resolve(*key, value.property_type()))
            .collect()
    }

    /// Apply a decoded snapshot with the same all-or-nothing validation as [`unpack`](Self::unpack)
    pub fn apply(&mut self, snapshot: &Snapshot) -> Result<()> {
        let indices = self.validate(snapshot)?;
        self.apply_validated(&indices, snapshot);
        Ok(())
    }

    /// Store the values of a snapshot already checked by [`validate`](Self::validate)
    pub fn apply_validated(&mut self, indices: &[usize], snapshot: &Snapshot) {
        for (&index, (_, value)) in indices.iter().zip(&snapshot.entries) {
            self.entries[index].value = value.clone();
        }
    }

    /// Take the changed values as a snapshot and clear the dirty set
    pub fn take_deltas(&mut self) -> Snapshot {
        let entries = std::mem::take(&mut self.dirty)
            .into_iter()
            .map(|i| (self.entries[i].key, self.entries[i].value.clone()))
            .collect();
        Snapshot { entries }
    }

    /// Snapshot of every property in registration order
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            entries: self.entries.iter().map(|e| (e.key, e.value.clone())).collect(),
        }
    }

    /// Registration index for a received key, checking its type
    fn resolve(&self, key: u64, ty: PropertyType) -> Result<usize> {
        let index = *self
            .by_key
            .get(&key)
            .ok_or_else(|| NetError::UnknownProperty(format!("{:#018x}", key)))?;
        let entry = &self.entries[index];
        if entry.property_type() != ty {
            return Err(NetError::TypeMismatch {
                property: entry.name.clone(),
                expected: entry.property_type().name(),
                found: ty.name(),
            });
        }
        Ok(index)
    }
}

/// Decoded property block, detached from any table
///
/// Snapshots are self-describing (every value carries its tag), so they can be
/// decoded before the receiving table is known and applied later.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    entries: Vec<(u64, PropertyValue)>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value under the key of `name`
    pub fn push(&mut self, name: &str, value: PropertyValue) {
        self.entries.push((name_hash(name), value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(u64, PropertyValue)] {
        &self.entries
    }

    pub fn encoded_len(&self) -> usize {
        COUNT_LEN
            + self
                .entries
                .iter()
                .map(|(_, v)| ENTRY_PREFIX_LEN + v.encoded_len())
                .sum::<usize>()
    }

    pub fn pack(&self, out: &mut BitStream<'_>) -> Result<()> {
        out.write(self.entries.len() as u32)?;
        for (key, value) in &self.entries {
            out.write(*key)?;
            out.write(value.property_type().tag())?;
            value.write_to(out)?;
        }
        Ok(())
    }

    pub fn unpack(input: &mut BitStream<'_>) -> Result<Self> {
        let count = input.read::<u32>()?;
        let mut entries = Vec::new();
        for _ in 0..count {
            let key = input.read::<u64>()?;
            let tag = input.read::<u8>()?;
            let ty = PropertyType::from_u8(tag).ok_or(NetError::InvalidTypeTag(tag))?;
            entries.push((key, PropertyValue::read_from(ty, input)?));
        }
        Ok(Self { entries })
    }
}

impl Default for PropertyTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializable for PropertyTable {
    fn pack(&self, out: &mut BitStream<'_>) -> Result<()> {
        self.pack_all(out)
    }

    fn required_memory(&self) -> usize {
        self.snapshot_len()
    }
}

/// Objects whose state is replicated through a [`PropertyTable`]
pub trait NetworkPersistable {
    fn properties(&self) -> &PropertyTable;

    fn properties_mut(&mut self) -> &mut PropertyTable;

    fn pack_all(&self, out: &mut BitStream<'_>) -> Result<()> {
        self.properties().pack_all(out)
    }

    fn pack_deltas(&mut self, out: &mut BitStream<'_>) -> Result<()> {
        self.properties_mut().pack_deltas(out)
    }

    fn unpack(&mut self, input: &mut BitStream<'_>) -> Result<()> {
        self.properties_mut().unpack(input)
    }

    fn is_dirty(&self) -> bool {
        self.properties().is_dirty()
    }

    fn set_property<T: NetworkedValue>(&mut self, name: &str, value: T) -> Result<()>
    where
        Self: Sized,
    {
        self.properties_mut().set_property(name, value)
    }

    fn get_property<T: NetworkedValue>(&self, name: &str) -> Result<&T>
    where
        Self: Sized,
    {
        self.properties().get_property(name)
    }
}

/// Replication flags of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScopeFlags(u8);

impl ScopeFlags {
    pub const NONE: ScopeFlags = ScopeFlags(0);
    /// Sent to every peer regardless of relevance
    pub const ALWAYS_SCOPED: ScopeFlags = ScopeFlags(1);
    /// Never changes after spawn; part of every initial scope
    pub const STATIC: ScopeFlags = ScopeFlags(1 << 1);

    pub fn contains(self, other: ScopeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: ScopeFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for ScopeFlags {
    type Output = ScopeFlags;

    fn bitor(self, rhs: ScopeFlags) -> ScopeFlags {
        ScopeFlags(self.0 | rhs.0)
    }
}

/// A networked entity that can be placed in a scope
pub trait Replicated: NetworkPersistable {
    fn net_id(&self) -> NetId;

    /// Type id used to pick a constructor on the receiving side
    fn entity_type(&self) -> u32;

    fn scope_flags(&self) -> ScopeFlags {
        ScopeFlags::NONE
    }

    /// Whether this entity belongs in the initial scope sent to a loading peer
    fn in_initial_scope(&self) -> bool {
        self.scope_flags()
            .intersects(ScopeFlags::ALWAYS_SCOPED | ScopeFlags::STATIC)
    }
}

/// General-purpose replicated object with a dynamically built property set
#[derive(Debug)]
pub struct NetworkedEntity {
    net_id: NetId,
    entity_type: u32,
    flags: ScopeFlags,
    properties: PropertyTable,
}

impl NetworkedEntity {
    pub fn new(net_id: NetId, entity_type: u32) -> Self {
        Self {
            net_id,
            entity_type,
            flags: ScopeFlags::NONE,
            properties: PropertyTable::new(),
        }
    }

    pub fn with_flags(mut self, flags: ScopeFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn set_flags(&mut self, flags: ScopeFlags) {
        self.flags = flags;
    }

    /// Register a property on the entity
    pub fn register_property<T: NetworkedValue>(
        &mut self,
        name: &str,
        initial: T,
    ) -> Result<PropertySlot<T>> {
        self.properties.register_property(name, initial)
    }
}

impl NetworkPersistable for NetworkedEntity {
    fn properties(&self) -> &PropertyTable {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut PropertyTable {
        &mut self.properties
    }
}

impl Replicated for NetworkedEntity {
    fn net_id(&self) -> NetId {
        self.net_id
    }

    fn entity_type(&self) -> u32 {
        self.entity_type
    }

    fn scope_flags(&self) -> ScopeFlags {
        self.flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use replica_core::{Dimension2, Vector3};

    fn ogre_table() -> PropertyTable {
        let mut table = PropertyTable::new();
        table.register_property("health", 100u32).unwrap();
        table.register_property("name", String::from("Ogre")).unwrap();
        table
    }

    #[test]
    fn test_register_and_get() {
        let mut table = PropertyTable::new();
        let health = table.register_property("health", 100u32).unwrap();
        assert_eq!(*table.get(health).unwrap(), 100);
        assert_eq!(*table.get_property::<u32>("health").unwrap(), 100);
        assert!(!table.is_dirty());
    }

    #[test]
    fn test_duplicate_registration() {
        let mut table = ogre_table();
        assert!(matches!(
            table.register_property("health", 1.0f32),
            Err(NetError::DuplicateProperty(name)) if name == "health"
        ));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_type_mismatch_does_not_mutate() {
        let mut table = ogre_table();
        let err = table.set_property("health", 5.0f32).unwrap_err();
        assert!(matches!(err, NetError::TypeMismatch { expected: "u32", found: "f32", .. }));
        assert_eq!(*table.get_property::<u32>("health").unwrap(), 100);
        assert!(!table.is_dirty());

        assert!(matches!(
            table.get_property::<String>("health"),
            Err(NetError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_name() {
        let mut table = ogre_table();
        assert!(matches!(
            table.set_property("mana", 1u32),
            Err(NetError::UnknownProperty(name)) if name == "mana"
        ));
        assert!(matches!(table.get_property::<u32>("mana"), Err(NetError::UnknownProperty(_))));
    }

    #[test]
    fn test_slot_must_match_table_layout() {
        let mut a = PropertyTable::new();
        let slot = a.register_property("health", 1u32).unwrap();

        let mut b = PropertyTable::new();
        b.register_property("mana", 1u32).unwrap();
        b.register_property("health", 1u32).unwrap();
        assert!(matches!(b.set(slot, 2), Err(NetError::UnknownProperty(_))));
        assert!(matches!(PropertyTable::new().get(slot), Err(NetError::UnknownProperty(_))));

        // Same property at the same index resolves
        let mut c = PropertyTable::new();
        c.register_property("health", 1u32).unwrap();
        assert!(c.set(slot, 2).is_ok());
        assert!(a.set(slot, 3).is_ok());
    }

    #[test]
    fn test_full_snapshot_layout() {
        let table = ogre_table();
        let mut stream = BitStream::new();
        table.pack_all(&mut stream).unwrap();
        assert_eq!(stream.written_len(), table.snapshot_len());

        assert_eq!(stream.read::<u32>().unwrap(), 2);
        assert_eq!(stream.read::<u64>().unwrap(), name_hash("health"));
        assert_eq!(stream.read::<u8>().unwrap(), PropertyType::U32.tag());
        assert_eq!(stream.read::<u32>().unwrap(), 100);
        assert_eq!(stream.read::<u64>().unwrap(), name_hash("name"));
        assert_eq!(stream.read::<u8>().unwrap(), PropertyType::String.tag());
        assert_eq!(stream.read_string().unwrap(), "Ogre");
        assert!(stream.is_empty());
    }

    #[test]
    fn test_deltas_carry_only_changes() {
        let mut sender = ogre_table();
        let mut receiver = ogre_table();

        sender.set_property("health", 85u32).unwrap();
        assert_eq!(sender.dirty_count(), 1);

        let mut stream = BitStream::new();
        sender.pack_deltas(&mut stream).unwrap();
        assert!(!sender.is_dirty());
        assert_eq!(stream.written_len(), 4 + 9 + 4);

        receiver.unpack(&mut stream).unwrap();
        assert_eq!(*receiver.get_property::<u32>("health").unwrap(), 85);
        assert_eq!(receiver.get_property::<String>("name").unwrap(), "Ogre");
        assert!(!receiver.is_dirty());

        let mut empty = BitStream::new();
        sender.pack_deltas(&mut empty).unwrap();
        assert_eq!(empty.as_bytes(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_failed_delta_pack_keeps_dirty_set() {
        let mut table = ogre_table();
        table.set_property("name", String::from("Ogre King")).unwrap();

        let mut memory = [0u8; 8];
        let mut stream = BitStream::wrap(&mut memory);
        assert!(table.pack_deltas(&mut stream).is_err());
        assert!(table.is_dirty());
    }

    #[test]
    fn test_registration_order_independence() {
        let mut sender = PropertyTable::new();
        sender.register_property("a", 1u8).unwrap();
        sender.register_property("b", 2u16).unwrap();
        sender.register_property("c", 3u64).unwrap();

        let mut receiver = PropertyTable::new();
        receiver.register_property("c", 0u64).unwrap();
        receiver.register_property("a", 0u8).unwrap();
        receiver.register_property("b", 0u16).unwrap();

        let mut stream = BitStream::from_serializable(&sender).unwrap();
        receiver.unpack(&mut stream).unwrap();
        assert_eq!(*receiver.get_property::<u8>("a").unwrap(), 1);
        assert_eq!(*receiver.get_property::<u16>("b").unwrap(), 2);
        assert_eq!(*receiver.get_property::<u64>("c").unwrap(), 3);
    }

    #[test]
    fn test_malformed_snapshot_is_atomic() {
        let mut receiver = ogre_table();

        // Valid health update followed by an unknown key
        let mut stream = BitStream::new();
        stream.write(2u32).unwrap();
        stream.write(name_hash("health")).unwrap();
        stream.write(PropertyType::U32.tag()).unwrap();
        stream.write(1u32).unwrap();
        stream.write(name_hash("mana")).unwrap();
        stream.write(PropertyType::U32.tag()).unwrap();
        stream.write(1u32).unwrap();

        assert!(matches!(receiver.unpack(&mut stream), Err(NetError::UnknownProperty(_))));
        assert_eq!(*receiver.get_property::<u32>("health").unwrap(), 100);
    }

    #[test]
    fn test_wire_tag_validation() {
        let mut receiver = ogre_table();

        let mut bad_tag = BitStream::new();
        bad_tag.write(1u32).unwrap();
        bad_tag.write(name_hash("health")).unwrap();
        bad_tag.write(42u8).unwrap();
        assert!(matches!(receiver.unpack(&mut bad_tag), Err(NetError::InvalidTypeTag(42))));

        let mut wrong_tag = BitStream::new();
        wrong_tag.write(1u32).unwrap();
        wrong_tag.write(name_hash("health")).unwrap();
        wrong_tag.write(PropertyType::F32.tag()).unwrap();
        wrong_tag.write(1.0f32).unwrap();
        assert!(matches!(
            receiver.unpack(&mut wrong_tag),
            Err(NetError::TypeMismatch { expected: "u32", found: "f32", .. })
        ));
    }

    #[test]
    fn test_detached_snapshot_matches_stream_delta() {
        let mut a = ogre_table();
        let mut b = ogre_table();
        a.set_property("health", 85u32).unwrap();
        b.set_property("health", 85u32).unwrap();

        let mut streamed = BitStream::new();
        a.pack_deltas(&mut streamed).unwrap();

        let snapshot = b.take_deltas();
        assert!(!b.is_dirty());
        let mut detached = BitStream::new();
        snapshot.pack(&mut detached).unwrap();

        assert_eq!(streamed.as_bytes(), detached.as_bytes());
        assert_eq!(snapshot.encoded_len(), detached.written_len());

        let mut receiver = ogre_table();
        receiver.apply(&Snapshot::unpack(&mut detached).unwrap()).unwrap();
        assert_eq!(*receiver.get_property::<u32>("health").unwrap(), 85);
    }

    #[test]
    fn test_apply_is_atomic() {
        let mut receiver = ogre_table();
        let mut snapshot = Snapshot::new();
        snapshot.push("health", PropertyValue::U32(1));
        snapshot.push("name", PropertyValue::Bool(true));

        assert!(matches!(receiver.apply(&snapshot), Err(NetError::TypeMismatch { .. })));
        assert_eq!(*receiver.get_property::<u32>("health").unwrap(), 100);
    }

    #[test]
    fn test_huge_count_underflows() {
        let mut receiver = ogre_table();
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF];
        let mut stream = BitStream::from_received(&bytes);
        assert!(matches!(receiver.unpack(&mut stream), Err(NetError::BufferUnderflow { .. })));
    }

    #[test]
    fn test_initial_scope_flags() {
        let plain = NetworkedEntity::new(NetId(1), 7);
        let always = NetworkedEntity::new(NetId(2), 7).with_flags(ScopeFlags::ALWAYS_SCOPED);
        let fixed = NetworkedEntity::new(NetId(3), 7).with_flags(ScopeFlags::STATIC);
        assert!(!plain.in_initial_scope());
        assert!(always.in_initial_scope());
        assert!(fixed.in_initial_scope());
        assert!((ScopeFlags::ALWAYS_SCOPED | ScopeFlags::STATIC).contains(ScopeFlags::STATIC));
    }

    fn property_value_strategy() -> impl Strategy<Value = PropertyValue> {
        prop_oneof![
            any::<f32>()
                .prop_filter("NaN never compares equal", |v| !v.is_nan())
                .prop_map(PropertyValue::F32),
            any::<f64>()
                .prop_filter("NaN never compares equal", |v| !v.is_nan())
                .prop_map(PropertyValue::F64),
            any::<u32>().prop_map(PropertyValue::U32),
            any::<u64>().prop_map(PropertyValue::U64),
            any::<u8>().prop_map(PropertyValue::U8),
            any::<bool>().prop_map(PropertyValue::Bool),
            ".{0,32}".prop_map(PropertyValue::String),
            any::<u16>().prop_map(PropertyValue::U16),
            (any::<u32>(), any::<u32>())
                .prop_map(|(w, h)| PropertyValue::Dimension2(Dimension2::new(w, h))),
            (-1.0e6f32..1.0e6, -1.0e6f32..1.0e6, -1.0e6f32..1.0e6)
                .prop_map(|(x, y, z)| PropertyValue::Vector3(Vector3::new(x, y, z))),
        ]
    }

    /// A default value of the same type as `value`
    fn zero_like(value: &PropertyValue) -> PropertyValue {
        match value {
            PropertyValue::F32(_) => PropertyValue::F32(0.0),
            PropertyValue::F64(_) => PropertyValue::F64(0.0),
            PropertyValue::U32(_) => PropertyValue::U32(0),
            PropertyValue::U64(_) => PropertyValue::U64(0),
            PropertyValue::U8(_) => PropertyValue::U8(0),
            PropertyValue::Bool(_) => PropertyValue::Bool(false),
            PropertyValue::String(_) => PropertyValue::String(String::new()),
            PropertyValue::U16(_) => PropertyValue::U16(0),
            PropertyValue::Dimension2(_) => PropertyValue::Dimension2(Dimension2::default()),
            PropertyValue::Vector3(_) => PropertyValue::Vector3(Vector3::ZERO),
        }
    }

    proptest! {
        /// Every supported type survives a full snapshot unchanged
        #[test]
        fn prop_snapshot_round_trip(values in prop::collection::vec(property_value_strategy(), 1..12)) {
            let mut sender = PropertyTable::new();
            let mut receiver = PropertyTable::new();
            for (i, value) in values.iter().enumerate() {
                let name = format!("prop{}", i);
                sender.register_value(&name, value.clone()).unwrap();
                receiver.register_value(&name, zero_like(value)).unwrap();
            }

            let mut stream = BitStream::new();
            sender.pack_all(&mut stream).unwrap();
            prop_assert_eq!(stream.written_len(), sender.snapshot_len());

            let bytes = stream.into_bytes();
            let mut received = BitStream::from_received(&bytes);
            receiver.unpack(&mut received).unwrap();
            prop_assert!(received.is_empty());

            for (i, value) in values.iter().enumerate() {
                prop_assert_eq!(receiver.value(&format!("prop{}", i)), Some(value));
            }
        }
    }
}
