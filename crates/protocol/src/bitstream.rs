//! Bounds-checked binary stream
//!
//! A [`BitStream`] is a block of bytes with two cursors: a write cursor
//! (`written`, the length of valid data) and a read cursor (`position`).
//! Writes append at the write cursor, reads consume forward from the read
//! cursor, so fields come back out in the order they went in.
//!
//! Invariant: `0 <= position <= written <= capacity`.
//!
//! # Wire format
//! - Scalars: little-endian, fixed width
//! - `bool`: one byte, `0` or `1`
//! - Strings and byte blobs: `[len: u32][bytes]`, no terminator
//!
//! Every bounds violation is a [`NetError`], never a panic. Bounds are checked
//! before `Buf`/`BufMut` is touched, since those panic on short buffers.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use replica_core::{Dimension2, NetError, Result, Vector3};

/// Capacity used by [`BitStream::new`]
pub const DEFAULT_CAPACITY: usize = 256;

/// Width of a length prefix for strings and blobs
pub const LENGTH_PREFIX: usize = std::mem::size_of::<u32>();

/// Fixed-width values that can be written to and read from a [`BitStream`]
pub trait StreamScalar: Copy + Sized {
    /// Encoded width in bytes
    const SIZE: usize;

    /// Encode into `out`, which has at least `SIZE` bytes of room
    fn put<B: BufMut>(self, out: &mut B);

    /// Decode from `src`, which holds at least `SIZE` bytes
    fn get<B: Buf>(src: &mut B) -> Result<Self>;
}

macro_rules! impl_stream_scalar {
    ($($ty:ty => $put:ident, $get:ident;)*) => {
        $(
            impl StreamScalar for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn put<B: BufMut>(self, out: &mut B) {
                    out.$put(self);
                }

                #[inline]
                fn get<B: Buf>(src: &mut B) -> Result<Self> {
                    Ok(src.$get())
                }
            }
        )*
    };
}

impl_stream_scalar! {
    u8 => put_u8, get_u8;
    u16 => put_u16_le, get_u16_le;
    u32 => put_u32_le, get_u32_le;
    u64 => put_u64_le, get_u64_le;
    i8 => put_i8, get_i8;
    i16 => put_i16_le, get_i16_le;
    i32 => put_i32_le, get_i32_le;
    i64 => put_i64_le, get_i64_le;
    f32 => put_f32_le, get_f32_le;
    f64 => put_f64_le, get_f64_le;
}

impl StreamScalar for bool {
    const SIZE: usize = 1;

    #[inline]
    fn put<B: BufMut>(self, out: &mut B) {
        out.put_u8(self as u8);
    }

    #[inline]
    fn get<B: Buf>(src: &mut B) -> Result<Self> {
        match src.get_u8() {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(NetError::InvalidBool(other)),
        }
    }
}

impl StreamScalar for Vector3 {
    const SIZE: usize = 3 * f32::SIZE;

    fn put<B: BufMut>(self, out: &mut B) {
        out.put_f32_le(self.x);
        out.put_f32_le(self.y);
        out.put_f32_le(self.z);
    }

    fn get<B: Buf>(src: &mut B) -> Result<Self> {
        Ok(Vector3::new(src.get_f32_le(), src.get_f32_le(), src.get_f32_le()))
    }
}

impl StreamScalar for Dimension2 {
    const SIZE: usize = 2 * u32::SIZE;

    fn put<B: BufMut>(self, out: &mut B) {
        out.put_u32_le(self.width);
        out.put_u32_le(self.height);
    }

    fn get<B: Buf>(src: &mut B) -> Result<Self> {
        Ok(Dimension2::new(src.get_u32_le(), src.get_u32_le()))
    }
}

/// Objects that know how to pack themselves and how much room that takes
pub trait Serializable {
    /// Write the full state of `self` into `out`
    fn pack(&self, out: &mut BitStream<'_>) -> Result<()>;

    /// Number of bytes `pack` will write
    fn required_memory(&self) -> usize;
}

/// Backing memory of a stream
#[derive(Debug)]
enum Block<'a> {
    /// Owned and growable; `data` holds exactly the written bytes
    Owned { data: BytesMut, capacity: usize },
    /// Borrowed writable region; never grows
    Fixed(&'a mut [u8]),
    /// Borrowed bytes received from a peer; read only
    Received(&'a [u8]),
}

/// Position-tracked byte stream with bounds-checked typed access
#[derive(Debug)]
pub struct BitStream<'a> {
    block: Block<'a>,
    written: usize,
    position: usize,
}

impl BitStream<'static> {
    /// Create an empty, growable stream with [`DEFAULT_CAPACITY`]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an empty, growable stream that owns `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            block: Block::Owned {
                data: BytesMut::with_capacity(capacity),
                capacity,
            },
            written: 0,
            position: 0,
        }
    }

    /// Create a stream sized to `object.required_memory()` and pack `object` into it
    pub fn from_serializable<S: Serializable + ?Sized>(object: &S) -> Result<Self> {
        let mut stream = Self::with_capacity(object.required_memory());
        object.pack(&mut stream)?;
        Ok(stream)
    }
}

impl Default for BitStream<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> BitStream<'a> {
    /// Wrap an external writable region
    ///
    /// The stream starts empty and can never hold more than `region.len()` bytes.
    pub fn wrap(region: &'a mut [u8]) -> Self {
        Self {
            block: Block::Fixed(region),
            written: 0,
            position: 0,
        }
    }

    /// Wrap bytes received from the transport
    ///
    /// All of `bytes` is readable immediately; the stream is full, so writes fail.
    pub fn from_received(bytes: &'a [u8]) -> Self {
        Self {
            written: bytes.len(),
            block: Block::Received(bytes),
            position: 0,
        }
    }

    /// The written bytes
    pub fn as_bytes(&self) -> &[u8] {
        match &self.block {
            Block::Owned { data, .. } => &data[..],
            Block::Fixed(data) => &data[..self.written],
            Block::Received(data) => &data[..],
        }
    }

    /// Total bytes the block can hold right now
    pub fn capacity(&self) -> usize {
        match &self.block {
            Block::Owned { capacity, .. } => *capacity,
            Block::Fixed(data) => data.len(),
            Block::Received(data) => data.len(),
        }
    }

    /// Whether the stream owns (and may grow) its memory
    pub fn owns_memory(&self) -> bool {
        matches!(self.block, Block::Owned { .. })
    }

    /// Length of the valid data written so far
    pub fn written_len(&self) -> usize {
        self.written
    }

    /// Read cursor
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.written - self.position
    }

    /// Nothing left to read
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// No room left to write without growing
    pub fn is_full(&self) -> bool {
        self.written == self.capacity()
    }

    /// Move the read cursor
    ///
    /// # Errors
    /// `OutOfRange` if `position` is past the written data.
    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position > self.written {
            return Err(NetError::OutOfRange {
                position,
                limit: self.written,
            });
        }
        self.position = position;
        Ok(())
    }

    /// Move the read cursor back to the start
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Fail with `PayloadTooShort` unless `required` bytes are left to read
    pub fn ensure_remaining(&self, message: &'static str, required: usize) -> Result<()> {
        let available = self.remaining();
        if available < required {
            return Err(NetError::PayloadTooShort {
                message,
                required,
                available,
            });
        }
        Ok(())
    }

    /// Reallocate an owned block to `new_capacity` bytes
    ///
    /// The lesser of the old and new capacity is preserved; cursors past the new
    /// end are clamped to it.
    ///
    /// # Errors
    /// `NotResizable` for wrapped memory.
    pub fn resize(&mut self, new_capacity: usize) -> Result<()> {
        match &mut self.block {
            Block::Owned { data, capacity } => {
                data.truncate(new_capacity);
                data.reserve(new_capacity - data.len());
                *capacity = new_capacity;
                self.written = data.len();
                self.position = self.position.min(self.written);
                Ok(())
            }
            Block::Fixed(_) | Block::Received(_) => Err(NetError::NotResizable),
        }
    }

    /// Make room for `additional` bytes past the write cursor
    fn reserve(&mut self, additional: usize) -> Result<()> {
        let available = self.capacity() - self.written;
        if available >= additional {
            return Ok(());
        }

        match &mut self.block {
            Block::Owned { data, capacity } => {
                let needed = self.written + additional;
                let grown = (*capacity * 2).max(needed).max(DEFAULT_CAPACITY);
                data.reserve(grown - data.len());
                *capacity = grown;
                Ok(())
            }
            Block::Fixed(_) | Block::Received(_) => Err(NetError::BufferOverflow {
                requested: additional,
                available,
            }),
        }
    }

    /// Append a scalar
    ///
    /// # Errors
    /// `BufferOverflow` when a fixed block lacks room. Nothing is written in that case.
    pub fn write<T: StreamScalar>(&mut self, value: T) -> Result<()> {
        self.reserve(T::SIZE)?;
        match &mut self.block {
            Block::Owned { data, .. } => value.put(data),
            Block::Fixed(region) => {
                let mut tail = &mut region[self.written..];
                value.put(&mut tail);
            }
            Block::Received(_) => unreachable_write(T::SIZE)?,
        }
        self.written += T::SIZE;
        Ok(())
    }

    /// Append raw bytes without a length prefix
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.reserve(bytes.len())?;
        match &mut self.block {
            Block::Owned { data, .. } => data.put_slice(bytes),
            Block::Fixed(region) => {
                let mut tail = &mut region[self.written..];
                tail.put_slice(bytes);
            }
            Block::Received(_) => unreachable_write(bytes.len())?,
        }
        self.written += bytes.len();
        Ok(())
    }

    /// Append a length-prefixed byte blob
    ///
    /// # Format
    /// `[len: u32][bytes]`
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| NetError::BufferOverflow {
            requested: bytes.len(),
            available: u32::MAX as usize,
        })?;
        // Prefix and body are reserved together so a failure leaves no dangling prefix
        self.reserve(LENGTH_PREFIX + bytes.len())?;
        self.write(len)?;
        self.write_raw(bytes)
    }

    /// Append a length-prefixed UTF-8 string
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Pack a serializable object at the write cursor
    pub fn write_serializable<S: Serializable + ?Sized>(&mut self, object: &S) -> Result<()> {
        self.reserve(object.required_memory())?;
        object.pack(self)
    }

    fn check_readable(&self, len: usize) -> Result<()> {
        let available = self.remaining();
        if available < len {
            return Err(NetError::BufferUnderflow {
                requested: len,
                available,
            });
        }
        Ok(())
    }

    /// Unread bytes
    fn unread(&self) -> &[u8] {
        &self.as_bytes()[self.position..]
    }

    /// Read the next scalar without consuming it
    pub fn peek<T: StreamScalar>(&self) -> Result<T> {
        self.check_readable(T::SIZE)?;
        let mut view = self.unread();
        T::get(&mut view)
    }

    /// Consume the next scalar
    ///
    /// # Errors
    /// `BufferUnderflow` if fewer than `T::SIZE` bytes remain; the cursor does not move.
    pub fn read<T: StreamScalar>(&mut self) -> Result<T> {
        let value = self.peek::<T>()?;
        self.position += T::SIZE;
        Ok(value)
    }

    /// Consume `len` raw bytes
    pub fn read_raw(&mut self, len: usize) -> Result<&[u8]> {
        self.check_readable(len)?;
        let start = self.position;
        self.position += len;
        Ok(&self.as_bytes()[start..start + len])
    }

    /// Consume a length-prefixed byte blob
    ///
    /// The declared length is checked against the remaining bytes before anything
    /// past the prefix is touched.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.peek::<u32>()? as usize;
        self.check_readable(LENGTH_PREFIX + len)?;
        self.position += LENGTH_PREFIX;
        Ok(self.read_raw(len)?.to_vec())
    }

    /// Consume a length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String> {
        let start = self.position;
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|e| {
            self.position = start;
            NetError::InvalidString(e.to_string())
        })
    }

    /// Hand the written bytes over, e.g. to the transport
    pub fn into_bytes(self) -> Bytes {
        match self.block {
            Block::Owned { data, .. } => data.freeze(),
            Block::Fixed(data) => Bytes::copy_from_slice(&data[..self.written]),
            Block::Received(data) => Bytes::copy_from_slice(data),
        }
    }
}

/// Received blocks are always full, so `reserve` rejects any non-empty write first
fn unreachable_write(len: usize) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    Err(NetError::BufferOverflow {
        requested: len,
        available: 0,
    })
}
