//! Simulated-fill append sink.

use chrono::Utc;
use diesel::prelude::*;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::info;

use crate::core::db::model::{NewOrderRow, NewTradeRow, OrderRow, TradeRow};
use crate::core::db::schema::{orders, trades};
use crate::core::db::{create_pool, DbPool};
use crate::core::domain::Order;
use crate::error::{Error, Result};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/paper");

/// Helper struct for querying last_insert_rowid().
#[derive(QueryableByName)]
struct LastInsertRowId {
    #[diesel(sql_type = diesel::sql_types::Integer)]
    id: i32,
}

/// Append-only store of accepted paper orders and their simulated fills.
///
/// Order IDs are SQLite rowids and therefore strictly increasing per store.
/// Idempotence across client retries is not guaranteed.
pub struct PaperFillStore {
    pool: DbPool,
}

impl PaperFillStore {
    /// Open (and if necessary create) the paper-trade database at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let pool = create_pool(path)?;
        let mut conn = pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Record the order as immediately filled: one `orders` row plus one
    /// `trades` row, atomically. Returns the new order id.
    ///
    /// The fill price is the limit price when present, otherwise zero; the
    /// store never waits for a tick.
    pub fn execute_order(&self, order: &Order) -> Result<i32> {
        let now = Utc::now().to_rfc3339();

        let order_row = NewOrderRow {
            symbol: order.symbol.clone(),
            qty: order.qty,
            side: order.side.as_str().to_string(),
            order_type: order.order_type.as_str().to_string(),
            limit_price: order.limit_price,
            status: "FILLED".to_string(),
            timestamp: now.clone(),
        };

        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;

        let order_id = conn
            .transaction(|conn| {
                diesel::insert_into(orders::table)
                    .values(&order_row)
                    .execute(conn)?;

                let id: i32 = diesel::sql_query("SELECT last_insert_rowid() AS id")
                    .get_result::<LastInsertRowId>(conn)
                    .map(|row| row.id)?;

                let trade_row = NewTradeRow {
                    order_id: id,
                    symbol: order.symbol.clone(),
                    qty: order.qty,
                    price: order.limit_price.unwrap_or(0.0),
                    timestamp: now.clone(),
                };
                diesel::insert_into(trades::table)
                    .values(&trade_row)
                    .execute(conn)?;

                Ok::<i32, diesel::result::Error>(id)
            })
            .map_err(|e| Error::Database(e.to_string()))?;

        info!(order_id, symbol = %order.symbol, side = order.side.as_str(), "Recorded paper fill");
        Ok(order_id)
    }

    /// All recorded orders, oldest first.
    pub fn orders(&self) -> Result<Vec<OrderRow>> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        orders::table
            .order(orders::id.asc())
            .load(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// All recorded fills, oldest first.
    pub fn fills(&self) -> Result<Vec<TradeRow>> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        trades::table
            .order(trades::id.asc())
            .load(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))
    }
}
