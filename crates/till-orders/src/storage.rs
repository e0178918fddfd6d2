//! Postgres-backed order aggregates.

use std::time::Duration;

use serde::Serialize;
use sqlx::{
    postgres::{
        PgPool,
        PgPoolOptions,
    },
    Row as _,
};
use tracing::debug;
use uuid::Uuid;

/// An order under construction or checked out.
///
/// `items` is insertion-ordered and may hold the same item id several
/// times; each occurrence is one unit. `total_cost` mirrors the unit
/// prices at the time each item was added.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Order {
    pub id: String,
    pub paid: bool,
    pub user_id: String,
    pub items: Vec<String>,
    pub total_cost: f64,
}

impl Order {
    /// Removes the first occurrence of `item_id` from the line items,
    /// returning whether one was present.
    pub fn remove_first(&mut self, item_id: &str) -> bool {
        match self.items.iter().position(|id| id == item_id) {
            Some(index) => {
                self.items.remove(index);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Order not found")]
    NotFound,
    #[error("database query failed")]
    Database(#[from] sqlx::Error),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    id TEXT PRIMARY KEY,
    paid BOOLEAN NOT NULL,
    user_id TEXT NOT NULL,
    items TEXT[] NOT NULL,
    total_cost DOUBLE PRECISION NOT NULL
)
"#;

#[derive(Clone)]
pub struct OrderStore {
    pool: PgPool,
}

impl OrderStore {
    /// Connects the pool and bootstraps the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable or the schema
    /// statement fails.
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self {
            pool,
        })
    }

    /// Creates an empty unpaid order for the user, returning its id.
    pub async fn create_order(&self, user_id: &str) -> Result<String, Error> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO orders (id, paid, user_id, items, total_cost) \
             VALUES ($1, FALSE, $2, '{}', 0)",
        )
        .bind(&id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        debug!(order_id = %id, user_id, "created order");
        Ok(id)
    }

    pub async fn find_order(&self, order_id: &str) -> Result<Order, Error> {
        let row = sqlx::query(
            "SELECT id, paid, user_id, items, total_cost FROM orders WHERE id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::NotFound)?;
        Ok(Order {
            id: row.get("id"),
            paid: row.get("paid"),
            user_id: row.get("user_id"),
            items: row.get("items"),
            total_cost: row.get("total_cost"),
        })
    }

    /// Deletes the order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such order exists.
    pub async fn remove_order(&self, order_id: &str) -> Result<(), Error> {
        let done = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Persists the order's line items and running total.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the order vanished in between.
    pub async fn update_line_items(&self, order: &Order) -> Result<(), Error> {
        let done = sqlx::query("UPDATE orders SET items = $2, total_cost = $3 WHERE id = $1")
            .bind(&order.id)
            .bind(&order.items)
            .bind(order.total_cost)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Marks the order paid after a fully successful checkout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the order vanished in between.
    pub async fn mark_paid(&self, order_id: &str) -> Result<(), Error> {
        let done = sqlx::query("UPDATE orders SET paid = TRUE WHERE id = $1")
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Empties the orders table.
    ///
    /// # Errors
    ///
    /// Returns an error if the truncate fails.
    pub async fn clear_tables(&self) -> Result<(), Error> {
        sqlx::query("TRUNCATE orders").execute(&self.pool).await?;
        Ok(())
    }
}
