//! The stock service's HTTP surface.

use axum::{
    extract::{
        Path,
        State,
    },
    http::{
        header,
        StatusCode,
    },
    response::{
        IntoResponse,
        Response,
    },
    routing::{
        delete,
        get,
        post,
    },
    Json,
    Router,
};
use serde::Serialize;
use telemetry::PrometheusHandle;
use tracing::error;

use crate::{
    handler::ItemIds,
    metrics::Metrics,
    storage::{
        BulkUpdate,
        Error,
        Item,
        StockStore,
    },
};

#[derive(Clone)]
struct AppState {
    store: StockStore,
    metrics: &'static Metrics,
    prometheus: PrometheusHandle,
}

pub(crate) fn router(
    store: StockStore,
    metrics: &'static Metrics,
    prometheus: PrometheusHandle,
) -> Router {
    Router::new()
        .route("/item/create/:price", post(create_item))
        .route("/find/:item_id", get(find_item))
        .route("/add/:item_id/:amount", post(add_stock))
        .route("/subtract/:item_id/:amount", post(subtract_stock))
        .route("/subtractItems/", post(subtract_items))
        .route("/increaseItems/", post(increase_items))
        .route("/clear_tables", delete(clear_tables))
        .route("/metrics", get(metrics_exposition))
        .with_state(AppState {
            store,
            metrics,
            prometheus,
        })
}

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            Error::NotFound => (StatusCode::NOT_FOUND, self.0.to_string()).into_response(),
            Error::NotEnoughStock | Error::MissingItems => {
                (StatusCode::BAD_REQUEST, self.0.to_string()).into_response()
            }
            Error::Database(error) => {
                error!(%error, "database error while serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            }
        }
    }
}

#[derive(Serialize)]
struct CreatedItem {
    item_id: String,
}

async fn create_item(
    State(state): State<AppState>,
    Path(price): Path<f64>,
) -> Result<Json<CreatedItem>, ApiError> {
    let item_id = state.store.create_item(price).await?;
    state.metrics.increment_items_created();
    Ok(Json(CreatedItem {
        item_id,
    }))
}

async fn find_item(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> Result<Json<Item>, ApiError> {
    Ok(Json(state.store.find_item(&item_id).await?))
}

async fn add_stock(
    State(state): State<AppState>,
    Path((item_id, amount)): Path<(String, i32)>,
) -> Result<&'static str, ApiError> {
    state
        .store
        .bulk_adjust(&[item_id], amount)
        .await
        // A single-item add that matches no row means the item does not
        // exist.
        .map_err(|error| match error {
            Error::MissingItems => Error::NotFound,
            other => other,
        })?;
    Ok("Stock added")
}

async fn subtract_stock(
    State(state): State<AppState>,
    Path((item_id, amount)): Path<(String, i32)>,
) -> Result<&'static str, ApiError> {
    state.store.bulk_adjust(&[item_id], -amount).await?;
    Ok("stock subtracted")
}

async fn subtract_items(
    State(state): State<AppState>,
    Json(request): Json<ItemIds>,
) -> Result<&'static str, ApiError> {
    bulk(&state, &request.item_ids, -1, "stock subtracted").await
}

async fn increase_items(
    State(state): State<AppState>,
    Json(request): Json<ItemIds>,
) -> Result<&'static str, ApiError> {
    bulk(&state, &request.item_ids, 1, "stock increased").await
}

async fn bulk(
    state: &AppState,
    item_ids: &[String],
    delta: i32,
    applied_message: &'static str,
) -> Result<&'static str, ApiError> {
    let started = std::time::Instant::now();
    let outcome = state.store.bulk_adjust(item_ids, delta).await;
    state.metrics.record_bulk_update_latency(started.elapsed());
    match outcome {
        Ok(BulkUpdate::Applied) => Ok(applied_message),
        Ok(BulkUpdate::NoItems) => Ok("No items in request"),
        Err(error) => {
            if matches!(error, Error::NotEnoughStock | Error::MissingItems) {
                state.metrics.increment_bulk_updates_rejected();
            }
            Err(error.into())
        }
    }
}

async fn clear_tables(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    state.store.clear_tables().await?;
    Ok("tables cleared")
}

async fn metrics_exposition(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus.render(),
    )
}
