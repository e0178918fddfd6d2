//! The payment service's HTTP surface.

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
    metrics::Metrics,
    storage::{
        Error,
        PaymentStore,
        User,
    },
};

#[derive(Clone)]
struct AppState {
    store: PaymentStore,
    metrics: &'static Metrics,
    prometheus: PrometheusHandle,
}

pub(crate) fn router(
    store: PaymentStore,
    metrics: &'static Metrics,
    prometheus: PrometheusHandle,
) -> Router {
    Router::new()
        .route("/create_user", post(create_user))
        .route("/find_user/:user_id", get(find_user))
        .route("/add_funds/:user_id/:amount", post(add_funds))
        .route("/pay/:user_id/:order_id/:amount", post(pay))
        .route("/cancel/:user_id/:order_id", post(cancel))
        .route("/status/:user_id/:order_id", post(status))
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
            Error::UserNotFound | Error::PaymentNotFound => {
                (StatusCode::NOT_FOUND, self.0.to_string()).into_response()
            }
            Error::NotEnoughCredit => {
                (StatusCode::FORBIDDEN, self.0.to_string()).into_response()
            }
            Error::Database(error) => {
                error!(%error, "database error while serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            }
        }
    }
}

#[derive(Serialize)]
struct CreatedUser {
    user_id: String,
}

#[derive(Serialize)]
struct Done {
    done: bool,
}

#[derive(Serialize)]
struct PaymentStatus {
    paid: bool,
}

async fn create_user(State(state): State<AppState>) -> Result<Json<CreatedUser>, ApiError> {
    let user_id = state.store.create_user().await?;
    Ok(Json(CreatedUser {
        user_id,
    }))
}

async fn find_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.store.find_user(&user_id).await?))
}

async fn add_funds(
    State(state): State<AppState>,
    Path((user_id, amount)): Path<(String, f64)>,
) -> Result<Json<Done>, ApiError> {
    state.store.add_funds(&user_id, amount).await?;
    Ok(Json(Done {
        done: true,
    }))
}

async fn pay(
    State(state): State<AppState>,
    Path((user_id, order_id, amount)): Path<(String, String, f64)>,
) -> Result<&'static str, ApiError> {
    match state.store.debit(&user_id, &order_id, amount).await {
        Ok(()) => {
            state.metrics.increment_payments_recorded();
            Ok("Credit removed")
        }
        Err(error) => {
            if matches!(error, Error::NotEnoughCredit) {
                state.metrics.increment_payments_rejected();
            }
            Err(error.into())
        }
    }
}

async fn cancel(
    State(state): State<AppState>,
    Path((user_id, order_id)): Path<(String, String)>,
) -> Result<&'static str, ApiError> {
    state.store.cancel(&user_id, &order_id).await?;
    state.metrics.increment_payments_refunded();
    Ok("payment reset")
}

async fn status(
    State(state): State<AppState>,
    Path((user_id, order_id)): Path<(String, String)>,
) -> Result<Json<PaymentStatus>, ApiError> {
    let paid = state.store.status(&user_id, &order_id).await?;
    Ok(Json(PaymentStatus {
        paid,
    }))
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
