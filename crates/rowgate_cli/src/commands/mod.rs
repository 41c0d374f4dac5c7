//! CLI command implementations.

pub mod plan;
pub mod rehearse;
pub mod schedule;
