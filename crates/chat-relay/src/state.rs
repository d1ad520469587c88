use axum::extract::FromRef;
use std::sync::Arc;

use crate::database::Repository;

/// Shared state of the history web surface
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<Repository>,
}

impl FromRef<AppState> for Arc<Repository> {
    fn from_ref(state: &AppState) -> Self {
        state.repository.clone()
    }
}
