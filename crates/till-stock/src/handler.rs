//! Task dispatch for the `stock` work queue.

use std::time::Instant;

use async_trait::async_trait;
use serde::{
    Deserialize,
    Serialize,
};
use till_broker::{
    Response,
    TaskHandler,
    TaskKind,
};

use crate::{
    metrics::Metrics,
    storage::{
        BulkUpdate,
        Error,
        StockStore,
    },
};

/// Body of `getPrice` requests.
#[derive(Debug, Deserialize)]
pub(crate) struct PriceQuery {
    pub(crate) item_id: String,
}

/// Body of `getPrice` replies.
#[derive(Debug, Serialize)]
pub(crate) struct PriceQuote {
    pub(crate) price: f64,
}

/// Body of `subtractItems`/`increaseItems` requests; order and
/// duplicates are the caller's, collapsing happens in storage.
#[derive(Debug, Deserialize)]
pub(crate) struct ItemIds {
    pub(crate) item_ids: Vec<String>,
}

pub(crate) struct StockHandler {
    store: StockStore,
    metrics: &'static Metrics,
}

impl StockHandler {
    pub(crate) fn new(store: StockStore, metrics: &'static Metrics) -> Self {
        Self {
            store,
            metrics,
        }
    }

    async fn get_price(&self, body: &[u8]) -> eyre::Result<Response> {
        let Ok(query) = serde_json::from_slice::<PriceQuery>(body) else {
            return Ok(Response::new(400, "malformed getPrice request"));
        };
        match self.store.find_item(&query.item_id).await {
            Ok(item) => Ok(Response::ok(serde_json::to_vec(&PriceQuote {
                price: item.price,
            })?)),
            Err(Error::NotFound) => Ok(Response::new(404, Error::NotFound.to_string())),
            Err(error) => Err(error.into()),
        }
    }

    async fn adjust(&self, body: &[u8], delta: i32) -> eyre::Result<Response> {
        let Ok(request) = serde_json::from_slice::<ItemIds>(body) else {
            return Ok(Response::new(400, "malformed item list"));
        };
        let started = Instant::now();
        let outcome = self.store.bulk_adjust(&request.item_ids, delta).await;
        self.metrics.record_bulk_update_latency(started.elapsed());
        match outcome {
            Ok(BulkUpdate::Applied) if delta < 0 => Ok(Response::ok("stock subtracted")),
            Ok(BulkUpdate::Applied) => Ok(Response::ok("stock increased")),
            Ok(BulkUpdate::NoItems) => Ok(Response::ok("No items in request")),
            Err(error @ (Error::NotEnoughStock | Error::MissingItems)) => {
                self.metrics.increment_bulk_updates_rejected();
                Ok(Response::new(400, error.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }
}

#[async_trait]
impl TaskHandler for StockHandler {
    async fn handle(&self, task: TaskKind, body: &[u8]) -> eyre::Result<Option<Response>> {
        let response = match task {
            TaskKind::GetPrice => self.get_price(body).await?,
            TaskKind::SubtractItems => self.adjust(body, -1).await?,
            TaskKind::IncreaseItems => self.adjust(body, 1).await?,
            // Payment tasks landing on the stock queue are misrouted;
            // ack them without a reply like any unknown task.
            TaskKind::Pay | TaskKind::Cancel => return Ok(None),
        };
        Ok(Some(response))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ItemIds,
        PriceQuery,
    };

    #[test]
    fn item_ids_decode_preserves_order_and_duplicates() {
        let request: ItemIds =
            serde_json::from_slice(br#"{"item_ids": ["b", "a", "b"]}"#).unwrap();
        assert_eq!(vec!["b", "a", "b"], request.item_ids);
    }

    #[test]
    fn price_query_requires_item_id() {
        assert!(serde_json::from_slice::<PriceQuery>(br#"{}"#).is_err());
        let query: PriceQuery = serde_json::from_slice(br#"{"item_id": "x"}"#).unwrap();
        assert_eq!("x", query.item_id);
    }
}
