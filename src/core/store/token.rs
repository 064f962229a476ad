//! Single-row access-token persistence.

use chrono::Utc;
use diesel::prelude::*;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::debug;

use crate::core::db::model::TokenRow;
use crate::core::db::schema::tokens;
use crate::core::db::{create_pool, DbPool};
use crate::error::{Error, Result};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/auth");

/// Default token lifetime when the broker reports no `expires_in`.
const DEFAULT_LIFETIME_SECS: i64 = 24 * 60 * 60;

/// One persisted access token per provider database, keyed by a constant row.
pub struct TokenStore {
    pool: DbPool,
}

impl TokenStore {
    /// Open (and if necessary create) the token database at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let pool = create_pool(path)?;
        let mut conn = pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Write or overwrite the token row.
    ///
    /// `expires_at` wins when given; otherwise it is computed as
    /// `now + expires_in`, defaulting to 24 hours.
    pub fn save(
        &self,
        access_token: &str,
        expires_in: Option<i64>,
        expires_at: Option<i64>,
        refresh_token: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        let expires_at = expires_at.unwrap_or_else(|| {
            now + expires_in.filter(|secs| *secs > 0).unwrap_or(DEFAULT_LIFETIME_SECS)
        });

        let row = TokenRow {
            id: 1,
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
            expires_at,
            created_at: now,
        };

        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        diesel::replace_into(tokens::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;

        debug!(expires_at, "Stored access token");
        Ok(())
    }

    /// Return the stored token, but only while it has not expired.
    pub fn get_valid_token(&self) -> Result<Option<String>> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;

        let row: Option<TokenRow> = tokens::table
            .find(1)
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;

        let now = Utc::now().timestamp();
        Ok(row.filter(|r| r.expires_at > now).map(|r| r.access_token))
    }
}
