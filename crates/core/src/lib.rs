//! Replica Core - Fundamental types and utilities

mod error;
mod hash;
mod idgen;
mod types;
mod vectors;

pub use error::*;
pub use hash::*;
pub use idgen::*;
pub use types::*;
pub use vectors::*;
