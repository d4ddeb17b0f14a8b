//! Conflict detection between findings

pub mod detector;
pub mod entities;
