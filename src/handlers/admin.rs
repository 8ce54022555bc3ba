// Admin JSON endpoints for endpoint configs and system settings.
//
// A thin layer over `EndpointStore` and `SettingsManager`; every reply is a
// `{success, message}` object so an admin UI can show the outcome directly.
use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::endpoints::{EndpointDraft, EndpointTable};
use crate::handlers::ApiError;
use crate::settings::SystemSettings;
use crate::AppState;

fn outcome(success: bool, message: &str) -> Json<Value> {
    Json(json!({ "success": success, "message": message }))
}

// Handles `GET /api/configs`.
pub async fn handle_list_configs(State(state): State<AppState>) -> Json<EndpointTable> {
    Json(state.endpoints.list())
}

// Handles `POST /config/add`.
pub async fn handle_add_config(
    State(state): State<AppState>,
    Json(draft): Json<EndpointDraft>,
) -> Result<Json<Value>, ApiError> {
    let name = draft.name.clone();
    if state.endpoints.add(draft)? {
        info!("Endpoint {} added", name);
        Ok(outcome(true, "Endpoint added"))
    } else {
        Ok(outcome(false, "Endpoint name is empty or already exists"))
    }
}

// Handles `POST /config/edit/{name}`.
pub async fn handle_edit_config(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(draft): Json<EndpointDraft>,
) -> Result<Json<Value>, ApiError> {
    if state.endpoints.update(&name, draft)? {
        info!("Endpoint {} updated", name);
        Ok(outcome(true, "Endpoint updated"))
    } else {
        Ok(outcome(false, "Endpoint does not exist"))
    }
}

// Handles `POST /config/delete/{name}`.
pub async fn handle_delete_config(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.endpoints.delete(&name)?;
    info!("Endpoint {} deleted", name);
    Ok(outcome(true, "Endpoint deleted"))
}

// Handles `GET /api/system-config`.
pub async fn handle_get_settings(State(state): State<AppState>) -> Json<SystemSettings> {
    Json(state.settings.current())
}

// Handles `POST /system-config/update`.
//
// Persists the merged record, then applies it to the completion client and
// the log sink before replying.
pub async fn handle_update_settings(
    State(state): State<AppState>,
    Json(patch): Json<Value>,
) -> Json<Value> {
    let settings = match state.settings.update(&patch) {
        Ok(settings) => settings,
        Err(e) => {
            warn!("System settings update rejected: {}", e);
            return outcome(false, &format!("Update failed: {}", e));
        }
    };

    match state.apply_settings(&settings).await {
        Ok(log_connected) => Json(json!({
            "success": true,
            "message": "System settings updated",
            "log_connected": log_connected,
        })),
        Err(e) => {
            warn!("System settings saved but not applied: {}", e);
            outcome(false, &format!("Settings saved but could not be applied: {}", e))
        }
    }
}
