use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use super::internal;
use crate::profiles::repo::{self, InventoryItem};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/users/:id/inventory",
            get(list_items).post(add_item),
        )
        .route("/users/:id/inventory/:item_id", delete(remove_item))
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub item_name: String,
    pub quantity: f64,
    pub unit: String,
    pub category: Option<String>,
    pub notes: Option<String>,
}

#[instrument(skip(state))]
async fn list_items(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<InventoryItem>>, (StatusCode, String)> {
    let items = repo::list_inventory(&state.db, user_id)
        .await
        .map_err(internal)?;
    Ok(Json(items))
}

#[instrument(skip(state, body))]
async fn add_item(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(body): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), (StatusCode, String)> {
    if body.item_name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "item_name must be non-empty".into()));
    }

    let inventory_id = repo::add_inventory_item(
        &state.db,
        user_id,
        body.item_name.trim(),
        body.quantity,
        &body.unit,
        body.category.as_deref(),
        body.notes.as_deref(),
    )
    .await
    .map_err(internal)?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "inventory_id": inventory_id })),
    ))
}

#[instrument(skip(state))]
async fn remove_item(
    State(state): State<AppState>,
    Path((user_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, (StatusCode, String)> {
    let removed = repo::delete_inventory_item(&state.db, user_id, item_id)
        .await
        .map_err(internal)?;

    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, "Inventory item not found".into()))
    }
}
