//! SwapDeck Library
//!
//! Headless core of a management dashboard for a llama-swap server: model
//! launch configuration, status probing and operator actions.

pub mod actions;
pub mod activity;
pub mod app;
pub mod command;
pub mod config;
pub mod storage;
pub mod system;
pub mod types;
