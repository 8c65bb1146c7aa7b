//! Shared type definitions
//!
//! Launch parameters, model identities and exported artifacts used across the dashboard.

pub mod launch;
pub mod model;
