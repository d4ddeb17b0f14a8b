//! Cross-cutting domain primitives.

pub mod error;
