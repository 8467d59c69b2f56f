use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn detailed_health(State(state): State<AppState>) -> Json<Value> {
    let (ledger, rankings) = tokio::join!(state.store.ping(), state.rankings.ping());
    let ledger_healthy = ledger.is_ok();
    let rankings_healthy = rankings.is_ok();

    if let Err(e) = &ledger {
        tracing::warn!(error = %e, "Ledger store health check failed");
    }
    if let Err(e) = &rankings {
        tracing::warn!(error = %e, "Ranking store health check failed");
    }

    Json(json!({
        "status": if ledger_healthy && rankings_healthy { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "open_sessions": state.sessions.open_sessions(),
        "components": {
            "ledger": if ledger_healthy { "healthy" } else { "unhealthy" },
            "rankings": if rankings_healthy { "healthy" } else { "unhealthy" },
        }
    }))
}
