mod from_row;
pub mod queries;
mod schema;

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::jwt::AccessTokenSigner;
use crate::verification::PurchaseCodeVerifier;

pub use schema::SCHEMA;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub verifier: Arc<PurchaseCodeVerifier>,
    pub access_tokens: Arc<AccessTokenSigner>,
    /// None disables the admin API entirely
    pub admin_token: Option<String>,
}

/// Build a connection pool over a SQLite file. Every pooled connection gets
/// foreign keys enabled and a busy timeout so IMMEDIATE transactions queue
/// instead of failing.
pub fn create_pool(path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", true)
    });
    Pool::builder().max_size(8).build(manager)
}

pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}
