//! Postgres-backed user balances and payment ledger.

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
};
use uuid::Uuid;

/// A user's credit balance.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct User {
    pub id: String,
    pub credit: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("User not found")]
    UserNotFound,
    #[error("Payment not found")]
    PaymentNotFound,
    #[error("Not enough credit")]
    NotEnoughCredit,
    #[error("database query failed")]
    Database(#[from] sqlx::Error),
}

/// The `id` column of `payments` is the `<user_id>/<order_id>` join key
/// used by `cancel` and `status`.
#[must_use]
pub fn payment_id(user_id: &str, order_id: &str) -> String {
    format!("{user_id}/{order_id}")
}

/// `check_credit_positive` backs the non-negative credit invariant; the
/// conditional debit below normally rejects first, the constraint is
/// the last line of defense under concurrency.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    credit DOUBLE PRECISION NOT NULL,
    CONSTRAINT check_credit_positive CHECK (credit >= 0)
);
CREATE TABLE IF NOT EXISTS payments (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    order_id TEXT NOT NULL,
    amount DOUBLE PRECISION NOT NULL,
    paid BOOLEAN NOT NULL
)
"#;

#[derive(Clone)]
pub struct PaymentStore {
    pool: PgPool,
}

impl PaymentStore {
    /// Connects the pool and bootstraps the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable or the schema
    /// statements fail.
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self {
            pool,
        })
    }

    /// Creates a user with zero credit, returning its fresh id.
    pub async fn create_user(&self) -> Result<String, Error> {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO users (id, credit) VALUES ($1, 0)")
            .bind(&id)
            .execute(&self.pool)
            .await?;
        debug!(user_id = %id, "created user");
        Ok(id)
    }

    pub async fn find_user(&self, user_id: &str) -> Result<User, Error> {
        let row = sqlx::query("SELECT id, credit FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::UserNotFound)?;
        Ok(User {
            id: row.get("id"),
            credit: row.get("credit"),
        })
    }

    /// Adds `amount` to the user's credit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UserNotFound`] if the user does not exist.
    #[instrument(skip(self))]
    pub async fn add_funds(&self, user_id: &str, amount: f64) -> Result<(), Error> {
        let done = sqlx::query("UPDATE users SET credit = credit + $2 WHERE id = $1")
            .bind(user_id)
            .bind(amount)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(Error::UserNotFound);
        }
        Ok(())
    }

    /// Debits the user by `amount` and records the payment, in one
    /// transaction.
    ///
    /// The debit is conditional on sufficient credit, so concurrent
    /// debits of the same user serialize on the row and cannot take the
    /// balance negative. The payment row is only written when the debit
    /// succeeded (it carries `paid = true`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::UserNotFound`] for an unknown user and
    /// [`Error::NotEnoughCredit`] if the balance cannot cover `amount`.
    #[instrument(skip(self))]
    pub async fn debit(&self, user_id: &str, order_id: &str, amount: f64) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT 1 FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(Error::UserNotFound)?;

        let debited =
            sqlx::query("UPDATE users SET credit = credit - $2 WHERE id = $1 AND credit >= $2")
                .bind(user_id)
                .bind(amount)
                .execute(&mut *tx)
                .await;
        match debited {
            Ok(done) if done.rows_affected() == 0 => return Err(Error::NotEnoughCredit),
            Ok(_) => {}
            Err(error) if is_check_violation(&error) => return Err(Error::NotEnoughCredit),
            Err(error) => return Err(error.into()),
        }

        // Re-running a debit for the same (user, order) overwrites the
        // ledger row like the original key-value write did.
        sqlx::query(
            r#"
            INSERT INTO payments (id, user_id, order_id, amount, paid)
            VALUES ($1, $2, $3, $4, TRUE)
            ON CONFLICT (id) DO UPDATE SET amount = EXCLUDED.amount, paid = TRUE
            "#,
        )
        .bind(payment_id(user_id, order_id))
        .bind(user_id)
        .bind(order_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(user_id, order_id, amount, "debited credit and recorded payment");
        Ok(())
    }

    /// Refunds the payment for (user, order): flips `paid` to false and
    /// re-credits the recorded amount, in one transaction.
    ///
    /// Not guarded against being called twice; the checkout SAGA fires
    /// it at most once per order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UserNotFound`] / [`Error::PaymentNotFound`] if
    /// either side of the join key is unknown.
    #[instrument(skip(self))]
    pub async fn cancel(&self, user_id: &str, order_id: &str) -> Result<(), Error> {
        let id = payment_id(user_id, order_id);
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT 1 FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(Error::UserNotFound)?;

        let amount: f64 = sqlx::query("SELECT amount FROM payments WHERE id = $1")
            .bind(&id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(Error::PaymentNotFound)?
            .get("amount");

        sqlx::query("UPDATE payments SET paid = FALSE WHERE id = $1")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE users SET credit = credit + $2 WHERE id = $1")
            .bind(user_id)
            .bind(amount)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(user_id, order_id, amount, "refunded payment");
        Ok(())
    }

    /// Whether a paid payment row exists for (user, order). An absent
    /// row reads as unpaid rather than an error.
    pub async fn status(&self, user_id: &str, order_id: &str) -> Result<bool, Error> {
        let paid = sqlx::query("SELECT paid FROM payments WHERE id = $1")
            .bind(payment_id(user_id, order_id))
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.get("paid"));
        Ok(paid.unwrap_or(false))
    }

    /// Empties the users and payments tables.
    ///
    /// # Errors
    ///
    /// Returns an error if the truncate fails.
    pub async fn clear_tables(&self) -> Result<(), Error> {
        sqlx::query("TRUNCATE users, payments")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn is_check_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db_error) if db_error.is_check_violation())
}

#[cfg(test)]
mod tests {
    use super::payment_id;

    #[test]
    fn payment_id_is_the_slash_joined_key() {
        assert_eq!("user-1/order-2", payment_id("user-1", "order-2"));
    }
}
