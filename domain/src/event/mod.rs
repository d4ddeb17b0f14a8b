//! Session events published on the progress bus

pub mod entities;
