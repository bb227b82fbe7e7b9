use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use cortex_provider::ModelManager;
use cortex_search::SemanticSearchClient;

/// Shared state for the health endpoint.
pub struct HealthState {
    pub models: Arc<ModelManager>,
    pub brain: Option<Arc<SemanticSearchClient>>,
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health — liveness plus dependency health.
async fn health_handler(State(state): State<Arc<HealthState>>) -> Json<Value> {
    let mut providers = Vec::new();
    for id in state.models.provider_ids() {
        if let Some(provider) = state.models.get(&id) {
            providers.push(json!({
                "id": id,
                "healthy": provider.health_check().await,
            }));
        }
    }

    let search_healthy = match &state.brain {
        Some(brain) => Some(brain.health_check().await),
        None => None,
    };

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "providers": providers,
        "search": search_healthy,
    }))
}
