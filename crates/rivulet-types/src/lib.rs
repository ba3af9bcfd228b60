//! Shared domain types for rivulet.
//!
//! Values produced by steps, the type tags attached to step inputs and
//! outputs, and engine configuration.
//!
//! Zero infrastructure dependencies -- only serde and serde_json.

pub mod config;
pub mod value;
