//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources: the loaded guide, the session registry, and the
//! collaborator dependencies handed to every session worker.

use std::sync::Arc;

use gauntlet_core::guide::Guide;

use crate::config::Config;
use crate::registry::SessionRegistry;
use crate::worker::SessionDeps;

/// The shared application state, created once at startup and passed to all
/// handlers. All fields are public to be accessible from other modules.
#[derive(Clone)]
pub struct AppState {
    pub guide: Arc<Guide>,
    pub registry: Arc<SessionRegistry>,
    pub deps: Arc<SessionDeps>,
    pub config: Arc<Config>,
}
