//! Convenience macro wrapping [`crate::produce::store_event`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use outbox::{store_event, store::SqlxOutboxStore};
//! use sqlx::PgPool;
//! use uuid::Uuid;
//! use serde_json::json;
//!
//! # async fn example(pool: PgPool, store: SqlxOutboxStore) -> Result<(), Box<dyn std::error::Error>> {
//! let mut tx = pool.begin().await?;
//! let product_id = Uuid::new_v4();
//!
//! sqlx::query!("INSERT INTO products (id, name) VALUES ($1, $2)", product_id, "Widget")
//!     .execute(&mut *tx)
//!     .await?;
//!
//! store_event!(&store, &mut tx, product_id, "product", "ProductCreated", &json!({ "id": product_id })).await?;
//!
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```
#[macro_export]
macro_rules! store_event {
    ($store:expr, $tx:expr, $aggregate_id:expr, $aggregate_type:expr, $event_type:expr, $event_data:expr) => {
        $crate::produce::store_event($store, $tx, $aggregate_id, $aggregate_type, $event_type, $event_data)
    };
}

#[cfg(test)]
mod tests {
    // Macro correctness is a compile-time check; see doctest above.
}
