use axum::extract::FromRef;
use std::sync::Arc;

use crate::services::card_engine::CardEngine;
use crate::store::CardStore;

/// Application state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CardEngine>,
    pub cards: Arc<dyn CardStore>,
}

impl FromRef<AppState> for Arc<CardEngine> {
    fn from_ref(state: &AppState) -> Arc<CardEngine> {
        state.engine.clone()
    }
}
