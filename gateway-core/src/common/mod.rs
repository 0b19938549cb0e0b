//! Small helpers shared across the crate that don't belong to any one subsystem.

pub mod duration_serde;
pub mod fnv;
