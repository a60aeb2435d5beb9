//! Integer and binary-buffer primitives for the Pactum session engine.
//!
//! This crate provides:
//! - `Long`, a 64-bit integer carried as low/high 32-bit halves
//! - `ByteBuffer`, a fixed-capacity byte region with cursor semantics
//! - `Primitives`, the capability injected into the engine adapter

pub mod buffer;
pub mod error;
pub mod long;
pub mod primitives;

pub use buffer::{BufferSource, ByteBuffer, Encoding};
pub use error::CompatError;
pub use long::Long;
pub use primitives::{NativePrimitives, Primitives};
