//! The checkout orchestrator.
//!
//! A checkout is a two-step SAGA: debit the user's credit (`pay` on the
//! payment queue) and reserve stock (`subtractItems` on the stock
//! queue). Both RPCs are issued concurrently over separate channels of
//! the shared broker connection and BOTH are always awaited; a single
//! fast failure must not skip the other side, because the surviving
//! side's status decides which compensation to fire:
//!
//! | payment | stock | action |
//! |---------|-------|--------|
//! | ok      | ok    | mark the order paid |
//! | fail    | ok    | `increaseItems` undoes the reservation |
//! | ok      | fail  | `cancel` refunds the debit |
//! | fail    | fail  | nothing to undo |
//!
//! Compensations are fire-and-forget publishes; a reply timeout counts
//! as failure, while a hard broker error aborts the checkout without
//! compensation (the order stays unpaid).

use std::{
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};

use serde::{
    Deserialize,
    Serialize,
};
use till_broker::{
    Broker,
    Reply,
    RpcClient,
    TaskKind,
};
use tracing::{
    info,
    instrument,
    warn,
};

use crate::{
    metrics::Metrics,
    storage::{
        self,
        Order,
        OrderStore,
    },
    PAYMENT_QUEUE,
    STOCK_QUEUE,
};

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("Order not found")]
    OrderNotFound,
    #[error("Item not found")]
    ItemNotFound,
    #[error("Item not in order")]
    ItemNotInOrder,
    #[error("Order already paid")]
    AlreadyPaid,
    /// The checkout (or a price lookup) was refused by a sibling
    /// service; the payload is the reason carried in its reply.
    #[error("{0}")]
    Rejected(String),
    #[error("database query failed")]
    Database(#[source] sqlx::Error),
    #[error("broker rpc failed")]
    Broker(#[from] till_broker::Error),
    #[error("failed encoding or decoding an rpc body")]
    Codec(#[from] serde_json::Error),
}

impl From<storage::Error> for Error {
    fn from(error: storage::Error) -> Self {
        match error {
            storage::Error::NotFound => Self::OrderNotFound,
            storage::Error::Database(error) => Self::Database(error),
        }
    }
}

#[derive(Serialize)]
struct ItemIds<'a> {
    item_ids: &'a [String],
}

#[derive(Serialize)]
struct PayBody<'a> {
    user_id: &'a str,
    order_id: &'a str,
    total_cost: f64,
}

#[derive(Serialize)]
struct PriceQuery<'a> {
    item_id: &'a str,
}

#[derive(Deserialize)]
struct PriceQuote {
    price: f64,
}

struct Producers {
    stock: RpcClient,
    payment: RpcClient,
}

/// Owns the order store and the two RPC producers and drives every
/// order-scoped operation.
pub(crate) struct Orchestrator {
    store: OrderStore,
    broker: Broker,
    reply_timeout: Duration,
    producers: tokio::sync::Mutex<Option<Arc<Producers>>>,
    metrics: &'static Metrics,
}

impl Orchestrator {
    pub(crate) fn new(
        store: OrderStore,
        broker: Broker,
        reply_timeout: Duration,
        metrics: &'static Metrics,
    ) -> Self {
        Self {
            store,
            broker,
            reply_timeout,
            producers: tokio::sync::Mutex::new(None),
            metrics,
        }
    }

    /// Hands out the shared producers, rebinding both on a fresh
    /// connection first if the old channels or the connection died.
    async fn producers(&self) -> Result<Arc<Producers>, till_broker::Error> {
        let mut slot = self.producers.lock().await;
        let rebind = match slot.as_ref() {
            Some(producers) => {
                !producers.stock.is_open()
                    || !producers.payment.is_open()
                    || !self.broker.is_connected().await
            }
            None => true,
        };
        if rebind {
            self.broker.ensure_connected().await?;
            let stock = RpcClient::bind(&self.broker, STOCK_QUEUE, self.reply_timeout).await?;
            let payment = RpcClient::bind(&self.broker, PAYMENT_QUEUE, self.reply_timeout).await?;
            *slot = Some(Arc::new(Producers {
                stock,
                payment,
            }));
            info!("bound rpc producers for the stock and payment queues");
        }
        Ok(slot
            .as_ref()
            .expect("the producer slot was just filled above")
            .clone())
    }

    /// Looks up an item's unit price in the stock service.
    async fn fetch_price(&self, item_id: &str) -> Result<f64, Error> {
        let producers = self.producers().await?;
        let body = serde_json::to_vec(&PriceQuery {
            item_id,
        })?;
        let reply = producers.stock.call(&body, TaskKind::GetPrice).await?;
        match reply.status {
            200 => {
                let quote: PriceQuote = serde_json::from_slice(&reply.body)?;
                Ok(quote.price)
            }
            404 => Err(Error::ItemNotFound),
            _ => Err(Error::Rejected(reply.message())),
        }
    }

    /// Appends one unit of `item_id` to the order and adds its current
    /// unit price to the running total.
    #[instrument(skip(self))]
    pub(crate) async fn add_item(&self, order_id: &str, item_id: &str) -> Result<(), Error> {
        let mut order = self.store.find_order(order_id).await?;
        let price = self.fetch_price(item_id).await?;
        order.items.push(item_id.to_string());
        order.total_cost += price;
        self.store.update_line_items(&order).await?;
        Ok(())
    }

    /// Removes one unit of `item_id` from the order and subtracts its
    /// current unit price from the running total.
    #[instrument(skip(self))]
    pub(crate) async fn remove_item(&self, order_id: &str, item_id: &str) -> Result<(), Error> {
        let mut order = self.store.find_order(order_id).await?;
        if !order.remove_first(item_id) {
            return Err(Error::ItemNotInOrder);
        }
        let price = self.fetch_price(item_id).await?;
        order.total_cost -= price;
        self.store.update_line_items(&order).await?;
        Ok(())
    }

    /// Runs the checkout SAGA for the order.
    #[instrument(skip(self), err)]
    pub(crate) async fn checkout(&self, order_id: &str) -> Result<(), Error> {
        let order = self.store.find_order(order_id).await?;
        if order.paid {
            return Err(Error::AlreadyPaid);
        }

        let started = Instant::now();
        let producers = self.producers().await?;

        let stock_body = serde_json::to_vec(&ItemIds {
            item_ids: &order.items,
        })?;
        let payment_body = serde_json::to_vec(&PayBody {
            user_id: &order.user_id,
            order_id: &order.id,
            total_cost: order.total_cost,
        })?;

        let (payment, stock) = tokio::join!(
            producers.payment.call(&payment_body, TaskKind::Pay),
            producers.stock.call(&stock_body, TaskKind::SubtractItems),
        );
        let payment = SideOutcome::from_call(payment, "payment")?;
        let stock = SideOutcome::from_call(stock, "stock")?;
        self.metrics.record_checkout_latency(started.elapsed());

        match Outcome::classify(&payment, &stock) {
            Outcome::Paid => {
                self.store.mark_paid(&order.id).await?;
                self.metrics.increment_checkouts_succeeded();
                info!(total_cost = order.total_cost, "order paid");
                Ok(())
            }
            Outcome::CompensateStock(reason) => {
                self.metrics.increment_checkouts_rejected();
                self.metrics.increment_compensations_sent();
                self.fire_compensation(&producers.stock, &stock_body, TaskKind::IncreaseItems)
                    .await;
                Err(Error::Rejected(reason))
            }
            Outcome::CompensatePayment(reason) => {
                self.metrics.increment_checkouts_rejected();
                self.metrics.increment_compensations_sent();
                self.fire_compensation(&producers.payment, &payment_body, TaskKind::Cancel)
                    .await;
                Err(Error::Rejected(reason))
            }
            Outcome::Rejected(reason) => {
                self.metrics.increment_checkouts_rejected();
                Err(Error::Rejected(reason))
            }
        }
    }

    /// Fire-and-forget; the SAGA does not retry compensations, so a
    /// publish failure is only logged.
    async fn fire_compensation(&self, producer: &RpcClient, body: &[u8], task: TaskKind) {
        info!(%task, "compensating");
        if let Err(error) = producer.cast(body, task).await {
            warn!(%error, %task, "failed publishing compensation");
        }
    }

    pub(crate) async fn create_order(&self, user_id: &str) -> Result<String, Error> {
        Ok(self.store.create_order(user_id).await?)
    }

    pub(crate) async fn find_order(&self, order_id: &str) -> Result<Order, Error> {
        Ok(self.store.find_order(order_id).await?)
    }

    pub(crate) async fn remove_order(&self, order_id: &str) -> Result<(), Error> {
        Ok(self.store.remove_order(order_id).await?)
    }

    pub(crate) async fn clear_tables(&self) -> Result<(), Error> {
        Ok(self.store.clear_tables().await?)
    }
}

/// One side of the SAGA reduced to what classification needs. A reply
/// timeout counts as failure; hard broker errors never get this far.
#[derive(Clone, Debug, PartialEq, Eq)]
struct SideOutcome {
    success: bool,
    message: String,
}

impl SideOutcome {
    fn from_call(
        result: Result<Reply, till_broker::Error>,
        side: &str,
    ) -> Result<Self, Error> {
        match result {
            Ok(reply) => Ok(Self {
                success: reply.is_success(),
                message: reply.message(),
            }),
            Err(till_broker::Error::ReplyTimeout(timeout)) => {
                warn!(side, ?timeout, "no reply within the timeout; treating as failed");
                Ok(Self {
                    success: false,
                    message: format!("{side} did not reply in time"),
                })
            }
            Err(error) => Err(error.into()),
        }
    }
}

/// What the pair of side statuses means for the order. Depends only on
/// the two statuses, never on which reply arrived first.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Outcome {
    Paid,
    CompensateStock(String),
    CompensatePayment(String),
    Rejected(String),
}

impl Outcome {
    fn classify(payment: &SideOutcome, stock: &SideOutcome) -> Self {
        match (payment.success, stock.success) {
            (true, true) => Self::Paid,
            (false, true) => Self::CompensateStock(payment.message.clone()),
            (true, false) => Self::CompensatePayment(stock.message.clone()),
            (false, false) => {
                Self::Rejected(format!("{}; {}", payment.message, stock.message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use till_broker::Reply;

    use super::{
        Error,
        Outcome,
        SideOutcome,
    };

    fn side(success: bool, message: &str) -> SideOutcome {
        SideOutcome {
            success,
            message: message.to_string(),
        }
    }

    #[test]
    fn both_sides_ok_means_paid() {
        assert_eq!(
            Outcome::Paid,
            Outcome::classify(&side(true, "Credit removed"), &side(true, "stock subtracted"))
        );
    }

    #[test]
    fn failed_payment_compensates_stock_with_the_payment_reason() {
        assert_eq!(
            Outcome::CompensateStock("Not enough credit".to_string()),
            Outcome::classify(
                &side(false, "Not enough credit"),
                &side(true, "stock subtracted")
            )
        );
    }

    #[test]
    fn failed_stock_compensates_payment_with_the_stock_reason() {
        assert_eq!(
            Outcome::CompensatePayment("Not enough stock".to_string()),
            Outcome::classify(
                &side(true, "Credit removed"),
                &side(false, "Not enough stock")
            )
        );
    }

    #[test]
    fn two_failures_need_no_compensation_and_carry_both_reasons() {
        assert_eq!(
            Outcome::Rejected("Not enough credit; Not enough stock".to_string()),
            Outcome::classify(
                &side(false, "Not enough credit"),
                &side(false, "Not enough stock")
            )
        );
    }

    #[test]
    fn timed_out_side_counts_as_failed() {
        let outcome = SideOutcome::from_call(
            Err(till_broker::Error::ReplyTimeout(
                std::time::Duration::from_secs(20),
            )),
            "payment",
        )
        .unwrap();
        assert!(!outcome.success);
        assert_eq!("payment did not reply in time", outcome.message);
    }

    #[test]
    fn domain_failure_carries_the_reply_message() {
        let outcome = SideOutcome::from_call(
            Ok(Reply {
                status: 403,
                body: b"Not enough credit".to_vec(),
            }),
            "payment",
        )
        .unwrap();
        assert!(!outcome.success);
        assert_eq!("Not enough credit", outcome.message);
    }

    #[test]
    fn hard_broker_error_aborts_instead_of_classifying() {
        let result = SideOutcome::from_call(
            Err(till_broker::Error::Amqp(lapin::Error::ChannelsLimitReached)),
            "stock",
        );
        assert!(matches!(result, Err(Error::Broker(_))));
    }
}
