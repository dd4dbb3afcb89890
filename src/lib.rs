//! gitdock: plugin runtime for a desktop git client.
//!
//! [`plugin`] holds the runtime itself, [`events`] the agent and lifecycle
//! event buses, [`git`] the repository host and [`app`] the wiring used by
//! the `gitdock` binary.

pub mod app;
pub mod cli;
pub mod config;
pub mod display;
pub mod events;
pub mod git;
pub mod logging;
pub mod plugin;
