//! End-to-end checkout scenarios against a deployed till stack.
//!
//! These drive the three services over HTTP and are ignored by default;
//! point them at a running deployment to run:
//!
//! ```text
//! TILL_TEST_ORDERS_URL=http://localhost:5000 \
//! TILL_TEST_STOCK_URL=http://localhost:5001 \
//! TILL_TEST_PAYMENT_URL=http://localhost:5002 \
//!     cargo test -p till-orders --test smoke -- --ignored
//! ```

use std::time::Duration;

use serde::Deserialize;

fn orders_url() -> String {
    std::env::var("TILL_TEST_ORDERS_URL").expect("set TILL_TEST_ORDERS_URL to run smoke tests")
}

fn stock_url() -> String {
    std::env::var("TILL_TEST_STOCK_URL").expect("set TILL_TEST_STOCK_URL to run smoke tests")
}

fn payment_url() -> String {
    std::env::var("TILL_TEST_PAYMENT_URL").expect("set TILL_TEST_PAYMENT_URL to run smoke tests")
}

#[derive(Deserialize)]
struct CreatedUser {
    user_id: String,
}

#[derive(Deserialize)]
struct CreatedItem {
    item_id: String,
}

#[derive(Deserialize)]
struct CreatedOrder {
    order_id: String,
}

#[derive(Deserialize)]
struct FoundUser {
    credit: f64,
}

#[derive(Deserialize)]
struct FoundItem {
    stock: i32,
}

#[derive(Deserialize)]
struct FoundOrder {
    paid: bool,
    total_cost: f64,
}

#[derive(Deserialize)]
struct PaymentStatus {
    paid: bool,
}

struct Stack {
    http: reqwest::Client,
}

impl Stack {
    fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    async fn user_with_credit(&self, credit: f64) -> String {
        let user: CreatedUser = self
            .http
            .post(format!("{}/create_user", payment_url()))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if credit > 0.0 {
            let response = self
                .http
                .post(format!(
                    "{}/add_funds/{}/{credit}",
                    payment_url(),
                    user.user_id
                ))
                .send()
                .await
                .unwrap();
            assert!(response.status().is_success());
        }
        user.user_id
    }

    async fn item_with_stock(&self, price: f64, stock: i32) -> String {
        let item: CreatedItem = self
            .http
            .post(format!("{}/item/create/{price}", stock_url()))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if stock > 0 {
            let response = self
                .http
                .post(format!("{}/add/{}/{stock}", stock_url(), item.item_id))
                .send()
                .await
                .unwrap();
            assert!(response.status().is_success());
        }
        item.item_id
    }

    async fn order_with_item(&self, user_id: &str, item_id: &str) -> String {
        let order: CreatedOrder = self
            .http
            .post(format!("{}/create/{user_id}", orders_url()))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let response = self
            .http
            .post(format!(
                "{}/addItem/{}/{item_id}",
                orders_url(),
                order.order_id
            ))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        order.order_id
    }

    async fn checkout(&self, order_id: &str) -> (reqwest::StatusCode, String) {
        let response = self
            .http
            .post(format!("{}/checkout/{order_id}", orders_url()))
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.text().await.unwrap())
    }

    async fn credit(&self, user_id: &str) -> f64 {
        let user: FoundUser = self
            .http
            .get(format!("{}/find_user/{user_id}", payment_url()))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        user.credit
    }

    async fn stock(&self, item_id: &str) -> i32 {
        let item: FoundItem = self
            .http
            .get(format!("{}/find/{item_id}", stock_url()))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        item.stock
    }

    async fn order(&self, order_id: &str) -> FoundOrder {
        self.http
            .get(format!("{}/find/{order_id}", orders_url()))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn payment_status(&self, user_id: &str, order_id: &str) -> bool {
        let status: PaymentStatus = self
            .http
            .post(format!("{}/status/{user_id}/{order_id}", payment_url()))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        status.paid
    }
}

/// Compensations are fire-and-forget, so the state they restore shows
/// up a moment after the checkout response.
async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..50 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not reached within 5s");
}

#[tokio::test]
#[ignore = "needs a deployed till stack; set TILL_TEST_*_URL"]
async fn happy_path_debits_credit_and_stock() {
    let stack = Stack::new();
    let user = stack.user_with_credit(100.0).await;
    let item = stack.item_with_stock(10.0, 5).await;
    let order = stack.order_with_item(&user, &item).await;

    let (status, body) = stack.checkout(&order).await;
    assert_eq!(reqwest::StatusCode::OK, status, "{body}");
    assert_eq!("Order successful", body);

    assert!((stack.credit(&user).await - 90.0).abs() < 1e-9);
    assert_eq!(4, stack.stock(&item).await);
    assert!(stack.order(&order).await.paid);
    assert!(stack.payment_status(&user, &order).await);
}

#[tokio::test]
#[ignore = "needs a deployed till stack; set TILL_TEST_*_URL"]
async fn insufficient_credit_restores_the_stock_reservation() {
    let stack = Stack::new();
    let user = stack.user_with_credit(5.0).await;
    let item = stack.item_with_stock(10.0, 5).await;
    let order = stack.order_with_item(&user, &item).await;

    let (status, body) = stack.checkout(&order).await;
    assert_eq!(reqwest::StatusCode::BAD_REQUEST, status);
    assert!(body.contains("Not enough credit"), "{body}");

    assert!((stack.credit(&user).await - 5.0).abs() < 1e-9);
    eventually(|| async { stack.stock(&item).await == 5 }).await;
    assert!(!stack.order(&order).await.paid);
    assert!(!stack.payment_status(&user, &order).await);
}

#[tokio::test]
#[ignore = "needs a deployed till stack; set TILL_TEST_*_URL"]
async fn insufficient_stock_refunds_the_debit() {
    let stack = Stack::new();
    let user = stack.user_with_credit(100.0).await;
    let item = stack.item_with_stock(10.0, 0).await;
    let order = stack.order_with_item(&user, &item).await;

    let (status, body) = stack.checkout(&order).await;
    assert_eq!(reqwest::StatusCode::BAD_REQUEST, status);
    assert!(body.contains("Not enough stock"), "{body}");

    assert_eq!(0, stack.stock(&item).await);
    eventually(|| async { (stack.credit(&user).await - 100.0).abs() < 1e-9 }).await;
    assert!(!stack.order(&order).await.paid);
    assert!(!stack.payment_status(&user, &order).await);
}

#[tokio::test]
#[ignore = "needs a deployed till stack; set TILL_TEST_*_URL"]
async fn double_failure_changes_nothing_and_reports_both_reasons() {
    let stack = Stack::new();
    let user = stack.user_with_credit(5.0).await;
    let item = stack.item_with_stock(10.0, 0).await;
    let order = stack.order_with_item(&user, &item).await;

    let (status, body) = stack.checkout(&order).await;
    assert_eq!(reqwest::StatusCode::BAD_REQUEST, status);
    assert!(body.contains("Not enough credit"), "{body}");
    assert!(body.contains("Not enough stock"), "{body}");

    // Nothing was taken, so nothing needs restoring; give any stray
    // compensation a moment to prove itself absent.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!((stack.credit(&user).await - 5.0).abs() < 1e-9);
    assert_eq!(0, stack.stock(&item).await);
    assert!(!stack.order(&order).await.paid);
}

#[tokio::test]
#[ignore = "needs a deployed till stack; set TILL_TEST_*_URL"]
async fn second_checkout_of_a_paid_order_is_rejected() {
    let stack = Stack::new();
    let user = stack.user_with_credit(100.0).await;
    let item = stack.item_with_stock(10.0, 5).await;
    let order = stack.order_with_item(&user, &item).await;

    let (status, _) = stack.checkout(&order).await;
    assert_eq!(reqwest::StatusCode::OK, status);

    let (status, body) = stack.checkout(&order).await;
    assert_eq!(reqwest::StatusCode::BAD_REQUEST, status);
    assert_eq!("Order already paid", body);

    // The second attempt made no broker calls: balances are untouched.
    assert!((stack.credit(&user).await - 90.0).abs() < 1e-9);
    assert_eq!(4, stack.stock(&item).await);
}

#[tokio::test]
#[ignore = "needs a deployed till stack; set TILL_TEST_*_URL"]
async fn add_then_remove_item_round_trips_the_total() {
    let stack = Stack::new();
    let user = stack.user_with_credit(0.0).await;
    let item = stack.item_with_stock(12.5, 1).await;
    let order = stack.order_with_item(&user, &item).await;

    assert!((stack.order(&order).await.total_cost - 12.5).abs() < 1e-9);

    let response = reqwest::Client::new()
        .delete(format!("{}/removeItem/{order}/{item}", orders_url()))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    assert!(stack.order(&order).await.total_cost.abs() < 1e-9);
}
