//! Gauntlet API Library Crate
//!
//! This library contains all the service logic for the challenge game:
//! configuration, the I/O bridge and session registry, the per-session
//! worker, both transports (WebSocket and terminal), and routing. The
//! binaries are thin wrappers around this library.

pub mod bridge;
pub mod config;
pub mod handlers;
pub mod models;
pub mod registry;
pub mod router;
pub mod state;
pub mod terminal;
pub mod transport;
pub mod worker;
pub mod ws;
