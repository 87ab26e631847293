use std::sync::Arc;

use transmute_core::Intake;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub intake: Intake,
    pub config: Arc<ServerConfig>,
}
