//! Vector types carried as networked properties

/// Three component float vector (positions, velocities, scales)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Unsigned 2D extent (terrain sizes, texture dimensions)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimension2 {
    pub width: u32,
    pub height: u32,
}

impl Dimension2 {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}
