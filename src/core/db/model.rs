//! Database row types for Diesel ORM.

use diesel::prelude::*;

use super::schema::{orders, tokens, trades};

/// The single access-token row (`id` is always 1).
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = tokens)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TokenRow {
    pub id: i32,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: i64,
    pub created_at: i64,
}

/// Database row for a paper order (insertable).
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = orders)]
pub struct NewOrderRow {
    pub symbol: String,
    pub qty: i32,
    pub side: String,
    pub order_type: String,
    pub limit_price: Option<f64>,
    pub status: String,
    pub timestamp: String,
}

/// Database row for a paper order (queryable).
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = orders)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct OrderRow {
    pub id: i32,
    pub symbol: String,
    pub qty: i32,
    pub side: String,
    pub order_type: String,
    pub limit_price: Option<f64>,
    pub status: String,
    pub timestamp: String,
}

/// Database row for a simulated fill (insertable).
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = trades)]
pub struct NewTradeRow {
    pub order_id: i32,
    pub symbol: String,
    pub qty: i32,
    pub price: f64,
    pub timestamp: String,
}

/// Database row for a simulated fill (queryable).
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = trades)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TradeRow {
    pub id: i32,
    pub order_id: i32,
    pub symbol: String,
    pub qty: i32,
    pub price: f64,
    pub timestamp: String,
}
