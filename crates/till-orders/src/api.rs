//! The orders service's HTTP surface.

use std::sync::Arc;

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
    checkout::{
        Error,
        Orchestrator,
    },
    storage::Order,
};

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
    prometheus: PrometheusHandle,
}

pub(crate) fn router(orchestrator: Arc<Orchestrator>, prometheus: PrometheusHandle) -> Router {
    Router::new()
        .route("/create/:user_id", post(create_order))
        .route("/remove/:order_id", delete(remove_order))
        .route("/addItem/:order_id/:item_id", post(add_item))
        .route("/removeItem/:order_id/:item_id", delete(remove_item))
        .route("/find/:order_id", get(find_order))
        .route("/checkout/:order_id", post(checkout))
        .route("/clear_tables", delete(clear_tables))
        .route("/metrics", get(metrics_exposition))
        .with_state(AppState {
            orchestrator,
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
            Error::OrderNotFound | Error::ItemNotFound | Error::ItemNotInOrder => {
                (StatusCode::NOT_FOUND, self.0.to_string()).into_response()
            }
            Error::AlreadyPaid | Error::Rejected(_) => {
                (StatusCode::BAD_REQUEST, self.0.to_string()).into_response()
            }
            Error::Database(error) => {
                error!(%error, "database error while serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            }
            Error::Broker(error) => {
                error!(%error, "broker error while serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            }
            Error::Codec(error) => {
                error!(%error, "codec error while serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            }
        }
    }
}

#[derive(Serialize)]
struct CreatedOrder {
    order_id: String,
}

async fn create_order(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<CreatedOrder>, ApiError> {
    let order_id = state.orchestrator.create_order(&user_id).await?;
    Ok(Json(CreatedOrder {
        order_id,
    }))
}

async fn remove_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<&'static str, ApiError> {
    state.orchestrator.remove_order(&order_id).await?;
    Ok("Order removed")
}

async fn add_item(
    State(state): State<AppState>,
    Path((order_id, item_id)): Path<(String, String)>,
) -> Result<&'static str, ApiError> {
    state.orchestrator.add_item(&order_id, &item_id).await?;
    Ok("Item added to order")
}

async fn remove_item(
    State(state): State<AppState>,
    Path((order_id, item_id)): Path<(String, String)>,
) -> Result<&'static str, ApiError> {
    state.orchestrator.remove_item(&order_id, &item_id).await?;
    Ok("Item removed from order")
}

async fn find_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.orchestrator.find_order(&order_id).await?))
}

async fn checkout(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<&'static str, ApiError> {
    state.orchestrator.checkout(&order_id).await?;
    Ok("Order successful")
}

async fn clear_tables(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    state.orchestrator.clear_tables().await?;
    Ok("tables cleared")
}

async fn metrics_exposition(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus.render(),
    )
}
