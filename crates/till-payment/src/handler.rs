//! Task dispatch for the `payment` work queue.

use async_trait::async_trait;
use serde::Deserialize;
use till_broker::{
    Response,
    TaskHandler,
    TaskKind,
};

use crate::{
    metrics::Metrics,
    storage::{
        Error,
        PaymentStore,
    },
};

/// Body of `pay` requests.
#[derive(Debug, Deserialize)]
pub(crate) struct PayRequest {
    pub(crate) user_id: String,
    pub(crate) order_id: String,
    pub(crate) total_cost: f64,
}

/// Body of `cancel` requests. `total_cost` is allowed but ignored so the
/// orchestrator can reuse its `pay` body for the compensation.
#[derive(Debug, Deserialize)]
pub(crate) struct CancelRequest {
    pub(crate) user_id: String,
    pub(crate) order_id: String,
}

pub(crate) struct PaymentHandler {
    store: PaymentStore,
    metrics: &'static Metrics,
}

impl PaymentHandler {
    pub(crate) fn new(store: PaymentStore, metrics: &'static Metrics) -> Self {
        Self {
            store,
            metrics,
        }
    }

    async fn pay(&self, body: &[u8]) -> eyre::Result<Response> {
        let Ok(request) = serde_json::from_slice::<PayRequest>(body) else {
            return Ok(Response::new(400, "malformed pay request"));
        };
        match self
            .store
            .debit(&request.user_id, &request.order_id, request.total_cost)
            .await
        {
            Ok(()) => {
                self.metrics.increment_payments_recorded();
                Ok(Response::ok("Credit removed"))
            }
            Err(error @ Error::NotEnoughCredit) => {
                self.metrics.increment_payments_rejected();
                Ok(Response::new(403, error.to_string()))
            }
            Err(error @ Error::UserNotFound) => Ok(Response::new(404, error.to_string())),
            Err(error) => Err(error.into()),
        }
    }

    async fn cancel(&self, body: &[u8]) -> eyre::Result<Response> {
        let Ok(request) = serde_json::from_slice::<CancelRequest>(body) else {
            return Ok(Response::new(400, "malformed cancel request"));
        };
        match self.store.cancel(&request.user_id, &request.order_id).await {
            Ok(()) => {
                self.metrics.increment_payments_refunded();
                Ok(Response::ok("payment reset"))
            }
            Err(error @ (Error::UserNotFound | Error::PaymentNotFound)) => {
                Ok(Response::new(404, error.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }
}

#[async_trait]
impl TaskHandler for PaymentHandler {
    async fn handle(&self, task: TaskKind, body: &[u8]) -> eyre::Result<Option<Response>> {
        let response = match task {
            TaskKind::Pay => self.pay(body).await?,
            TaskKind::Cancel => self.cancel(body).await?,
            // Stock tasks landing on the payment queue are misrouted;
            // ack them without a reply like any unknown task.
            TaskKind::SubtractItems | TaskKind::IncreaseItems | TaskKind::GetPrice => {
                return Ok(None);
            }
        };
        Ok(Some(response))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CancelRequest,
        PayRequest,
    };

    #[test]
    fn pay_request_decodes_the_checkout_body() {
        let request: PayRequest = serde_json::from_slice(
            br#"{"user_id": "u", "order_id": "o", "total_cost": 12.5}"#,
        )
        .unwrap();
        assert_eq!("u", request.user_id);
        assert_eq!("o", request.order_id);
        assert!((request.total_cost - 12.5).abs() < f64::EPSILON);
    }

    #[test]
    fn cancel_request_tolerates_the_full_pay_body() {
        // The orchestrator reuses its pay body for the compensation.
        let request: CancelRequest = serde_json::from_slice(
            br#"{"user_id": "u", "order_id": "o", "total_cost": 12.5}"#,
        )
        .unwrap();
        assert_eq!("u", request.user_id);
        assert_eq!("o", request.order_id);
    }
}
