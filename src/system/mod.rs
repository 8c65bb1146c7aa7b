//! Serving-process integration
//!
//! Probing llama-swap, reconciling model identities, periodic polling and
//! container maintenance hints.

pub mod commands;
pub mod prober;
pub mod reconcile;
pub mod scheduler;
