//! Postgres-backed item inventory.

use std::time::Duration;

use serde::Serialize;
use sqlx::{
    postgres::{
        PgPool,
        PgPoolOptions,
    },
    Row as _,
};
use tracing::{
    debug,
    instrument,
    warn,
};
use uuid::Uuid;

/// An inventory row: unit price and units on hand.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Item {
    pub id: String,
    pub price: f64,
    pub stock: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Item not found")]
    NotFound,
    #[error("Not enough stock")]
    NotEnoughStock,
    #[error("Stock subtracting failed for at least 1 item")]
    MissingItems,
    #[error("database query failed")]
    Database(#[from] sqlx::Error),
}

/// What a bulk adjustment did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BulkUpdate {
    /// Every requested item was adjusted.
    Applied,
    /// The request named no items; nothing was touched.
    NoItems,
}

/// The stock table is guarded by `check_stock_positive`, so the
/// non-negative invariant holds for any interleaving of concurrent
/// updates without application-level locking.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id TEXT PRIMARY KEY,
    price DOUBLE PRECISION NOT NULL,
    stock INTEGER NOT NULL,
    CONSTRAINT check_stock_positive CHECK (stock >= 0)
)
"#;

#[derive(Clone)]
pub struct StockStore {
    pool: PgPool,
}

impl StockStore {
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

    /// Creates an item with the given unit price and zero stock,
    /// returning its fresh id.
    #[instrument(skip(self))]
    pub async fn create_item(&self, price: f64) -> Result<String, Error> {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO items (id, price, stock) VALUES ($1, $2, 0)")
            .bind(&id)
            .bind(price)
            .execute(&self.pool)
            .await?;
        debug!(item_id = %id, price, "created item");
        Ok(id)
    }

    pub async fn find_item(&self, item_id: &str) -> Result<Item, Error> {
        let row = sqlx::query("SELECT id, price, stock FROM items WHERE id = $1")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::NotFound)?;
        Ok(Item {
            id: row.get("id"),
            price: row.get("price"),
            stock: row.get("stock"),
        })
    }

    /// Applies `delta` to the stock of every distinct id in `item_ids`
    /// as one transactional statement.
    ///
    /// Duplicate ids collapse to a single application of `delta`, like
    /// the id-keyed mapping this update is built from. Two deliberate
    /// consequences of the single-statement discipline:
    ///
    /// - a `check_stock_positive` violation anywhere rolls back the
    ///   whole statement and surfaces as [`Error::NotEnoughStock`];
    /// - ids that match no row do NOT roll back the rest: the present
    ///   rows stay updated and the call reports
    ///   [`Error::MissingItems`].
    #[instrument(skip(self, item_ids), fields(items = item_ids.len()))]
    pub async fn bulk_adjust(&self, item_ids: &[String], delta: i32) -> Result<BulkUpdate, Error> {
        let ids = distinct_preserving_order(item_ids);
        if ids.is_empty() {
            warn!("bulk stock adjustment with no items");
            return Ok(BulkUpdate::NoItems);
        }
        let deltas = vec![delta; ids.len()];

        let result = sqlx::query(
            r#"
            UPDATE items AS i
            SET stock = i.stock + u.delta
            FROM UNNEST($1::text[], $2::int[]) AS u(id, delta)
            WHERE i.id = u.id
            "#,
        )
        .bind(&ids)
        .bind(&deltas)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == ids.len() as u64 => Ok(BulkUpdate::Applied),
            Ok(done) => {
                warn!(
                    rows_affected = done.rows_affected(),
                    distinct_items = ids.len(),
                    "bulk stock adjustment matched fewer rows than requested",
                );
                Err(Error::MissingItems)
            }
            Err(error) if is_check_violation(&error) => {
                debug!("stock check constraint violated");
                Err(Error::NotEnoughStock)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Empties the items table.
    ///
    /// # Errors
    ///
    /// Returns an error if the truncate fails.
    pub async fn clear_tables(&self) -> Result<(), Error> {
        sqlx::query("TRUNCATE items").execute(&self.pool).await?;
        Ok(())
    }
}

fn is_check_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db_error) if db_error.is_check_violation())
}

fn distinct_preserving_order(item_ids: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    item_ids
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::distinct_preserving_order;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn duplicates_collapse_to_one_entry() {
        assert_eq!(
            ids(&["a", "b", "c"]),
            distinct_preserving_order(&ids(&["a", "b", "a", "c", "b", "a"]))
        );
    }

    #[test]
    fn order_of_first_occurrence_is_kept() {
        assert_eq!(
            ids(&["z", "a", "m"]),
            distinct_preserving_order(&ids(&["z", "a", "z", "m"]))
        );
    }

    #[test]
    fn empty_input_stays_empty() {
        assert!(distinct_preserving_order(&[]).is_empty());
    }
}
