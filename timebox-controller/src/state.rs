//! Shared state for the HTTP API

use crate::controller::LifecycleController;
use crate::health::HealthChecker;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<LifecycleController>,
    pub health: Arc<HealthChecker>,
    /// Bearer token required on non-health routes, if set
    pub api_token: Option<String>,
}

impl AppState {
    pub fn new(controller: Arc<LifecycleController>, api_token: Option<String>) -> Self {
        Self {
            controller,
            health: Arc::new(HealthChecker::new(env!("CARGO_PKG_VERSION"))),
            api_token: api_token.filter(|t| !t.is_empty()),
        }
    }
}
