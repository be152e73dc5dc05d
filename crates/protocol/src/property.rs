//! Networked property values
//!
//! The set of types that may be replicated is closed. Each one has a stable
//! one-byte tag on the wire and a [`NetworkedValue`] impl that maps it to and
//! from the type-erased [`PropertyValue`] stored in a property table.

use crate::bitstream::BitStream;
use replica_core::{Dimension2, NetError, Result, Vector3};
use std::marker::PhantomData;

/// Wire tag of a replicated property
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    F32 = 1,
    F64 = 2,
    U32 = 3,
    U64 = 4,
    U8 = 5,
    Bool = 6,
    String = 7,
    U16 = 8,
    Dimension2 = 9,
    Vector3 = 10,
}

impl PropertyType {
    /// Convert a wire tag back to a type
    ///
    /// # Returns
    /// `None` for bytes outside the enum
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::F32),
            2 => Some(Self::F64),
            3 => Some(Self::U32),
            4 => Some(Self::U64),
            5 => Some(Self::U8),
            6 => Some(Self::Bool),
            7 => Some(Self::String),
            8 => Some(Self::U16),
            9 => Some(Self::Dimension2),
            10 => Some(Self::Vector3),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Human readable name used in error messages
    pub fn name(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::U8 => "u8",
            Self::Bool => "bool",
            Self::String => "string",
            Self::U16 => "u16",
            Self::Dimension2 => "dimension2",
            Self::Vector3 => "vector3",
        }
    }
}

/// Current value of a property, tagged with its type
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    F32(f32),
    F64(f64),
    U32(u32),
    U64(u64),
    U8(u8),
    Bool(bool),
    String(String),
    U16(u16),
    Dimension2(Dimension2),
    Vector3(Vector3),
}

impl PropertyValue {
    pub fn property_type(&self) -> PropertyType {
        match self {
            Self::F32(_) => PropertyType::F32,
            Self::F64(_) => PropertyType::F64,
            Self::U32(_) => PropertyType::U32,
            Self::U64(_) => PropertyType::U64,
            Self::U8(_) => PropertyType::U8,
            Self::Bool(_) => PropertyType::Bool,
            Self::String(_) => PropertyType::String,
            Self::U16(_) => PropertyType::U16,
            Self::Dimension2(_) => PropertyType::Dimension2,
            Self::Vector3(_) => PropertyType::Vector3,
        }
    }

    /// Bytes the value occupies on the wire (tag excluded)
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::F32(_) | Self::U32(_) => 4,
            Self::F64(_) | Self::U64(_) | Self::Dimension2(_) => 8,
            Self::U8(_) | Self::Bool(_) => 1,
            Self::U16(_) => 2,
            Self::Vector3(_) => 12,
            Self::String(s) => crate::bitstream::LENGTH_PREFIX + s.len(),
        }
    }

    /// Write the value (no tag)
    pub fn write_to(&self, out: &mut BitStream<'_>) -> Result<()> {
        match self {
            Self::F32(v) => out.write(*v),
            Self::F64(v) => out.write(*v),
            Self::U32(v) => out.write(*v),
            Self::U64(v) => out.write(*v),
            Self::U8(v) => out.write(*v),
            Self::Bool(v) => out.write(*v),
            Self::String(v) => out.write_string(v),
            Self::U16(v) => out.write(*v),
            Self::Dimension2(v) => out.write(*v),
            Self::Vector3(v) => out.write(*v),
        }
    }

    /// Read a value of type `ty` (tag already consumed)
    pub fn read_from(ty: PropertyType, input: &mut BitStream<'_>) -> Result<Self> {
        Ok(match ty {
            PropertyType::F32 => Self::F32(input.read()?),
            PropertyType::F64 => Self::F64(input.read()?),
            PropertyType::U32 => Self::U32(input.read()?),
            PropertyType::U64 => Self::U64(input.read()?),
            PropertyType::U8 => Self::U8(input.read()?),
            PropertyType::Bool => Self::Bool(input.read()?),
            PropertyType::String => Self::String(input.read_string()?),
            PropertyType::U16 => Self::U16(input.read()?),
            PropertyType::Dimension2 => Self::Dimension2(input.read()?),
            PropertyType::Vector3 => Self::Vector3(input.read()?),
        })
    }
}

/// Rust types that may be registered as networked properties
///
/// Only the wire types implement this, so registering anything else (a
/// reference, a pointer, an arbitrary struct) does not compile.
pub trait NetworkedValue: Sized + 'static {
    const TYPE: PropertyType;

    fn into_value(self) -> PropertyValue;

    /// Borrow the concrete value out of `value`, or `None` on a type mismatch
    fn from_value(value: &PropertyValue) -> Option<&Self>;
}

macro_rules! impl_networked_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl NetworkedValue for $ty {
                const TYPE: PropertyType = PropertyType::$variant;

                fn into_value(self) -> PropertyValue {
                    PropertyValue::$variant(self)
                }

                fn from_value(value: &PropertyValue) -> Option<&Self> {
                    match value {
                        PropertyValue::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_networked_value!(
    f32 => F32,
    f64 => F64,
    u32 => U32,
    u64 => U64,
    u8 => U8,
    bool => Bool,
    String => String,
    u16 => U16,
    Dimension2 => Dimension2,
    Vector3 => Vector3,
);

/// Typed handle to a registered property
///
/// Returned by registration and used for fast, type-safe access without a name
/// lookup. A handle carries the key of its property, so it only resolves on a
/// table holding that same property at the same registration index.
#[derive(Debug)]
pub struct PropertySlot<T> {
    pub(crate) index: usize,
    pub(crate) key: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PropertySlot<T> {
    pub(crate) fn new(index: usize, key: u64) -> Self {
        Self {
            index,
            key,
            _marker: PhantomData,
        }
    }

    /// Registration index of the property
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> Clone for PropertySlot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PropertySlot<T> {}

/// Fail with `TypeMismatch` unless `value` holds a `T`
pub(crate) fn expect_type<'v, T: NetworkedValue>(
    property: &str,
    value: &'v PropertyValue,
) -> Result<&'v T> {
    T::from_value(value).ok_or_else(|| NetError::TypeMismatch {
        property: property.to_string(),
        expected: value.property_type().name(),
        found: T::TYPE.name(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        for tag in 1..=10u8 {
            let ty = PropertyType::from_u8(tag).unwrap();
            assert_eq!(ty.tag(), tag);
        }
        assert_eq!(PropertyType::from_u8(0), None);
        assert_eq!(PropertyType::from_u8(11), None);
    }

    #[test]
    fn test_encoded_len_matches_written_bytes() {
        let values = [
            PropertyValue::F32(1.0),
            PropertyValue::F64(2.0),
            PropertyValue::U32(3),
            PropertyValue::U64(4),
            PropertyValue::U8(5),
            PropertyValue::Bool(true),
            PropertyValue::String("Ogre".into()),
            PropertyValue::U16(8),
            PropertyValue::Dimension2(Dimension2::new(9, 9)),
            PropertyValue::Vector3(Vector3::new(1.0, 0.0, 1.0)),
        ];

        for value in values {
            let mut stream = BitStream::new();
            value.write_to(&mut stream).unwrap();
            assert_eq!(stream.written_len(), value.encoded_len(), "{:?}", value);

            let back = PropertyValue::read_from(value.property_type(), &mut stream).unwrap();
            assert_eq!(back, value);
        }
    }

    #[test]
    fn test_expect_type() {
        let value = PropertyValue::U32(100);
        assert_eq!(*expect_type::<u32>("health", &value).unwrap(), 100);

        let err = expect_type::<f32>("health", &value).unwrap_err();
        assert!(matches!(
            err,
            NetError::TypeMismatch { expected: "u32", found: "f32", .. }
        ));
    }
}
