//! Row mapping for every table, plus the column lists the SELECTs use.
//! Column order in each `*_COLS` constant must match its `FromRow` impl.

use std::str::FromStr;

use rusqlite::{Connection, Row, ToSql, types::Type};

use crate::error::Result;
use crate::models::*;

pub const USER_COLS: &str = "id, email, name, created_at";

pub const PRODUCT_COLS: &str = "id, name, slug, marketplace_item_id, created_at";

pub const LICENSE_COLS: &str = "id, key, product_id, owner_id, status, license_type, max_domains, support_expires_at, license_expires_at, created_at";

pub const DOMAIN_COLS: &str =
    "id, license_id, domain_name, status, last_checked_at, created_at";

pub const KB_CATEGORY_COLS: &str = "id, name, slug, requires_serial, requires_purchase_code, product_id, verification_source, created_at";

pub const KB_ARTICLE_COLS: &str = "id, category_id, title, slug, content, requires_serial, requires_purchase_code, product_id, created_at";

pub const VERIFICATION_LOG_COLS: &str = "id, purchase_code_hash, masked_purchase_code, domain, ip_address, user_agent, is_valid, status, verification_source, response_message, response_data, error_details, verified_at, created_at";

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Parse a TEXT column through `FromStr` (strum enums).
fn parse_col<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_col<T>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

impl FromRow for Product {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Product {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
            marketplace_item_id: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

impl FromRow for License {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(License {
            id: row.get(0)?,
            key: row.get(1)?,
            product_id: row.get(2)?,
            owner_id: row.get(3)?,
            status: parse_col(row, 4)?,
            license_type: parse_col(row, 5)?,
            max_domains: row.get(6)?,
            support_expires_at: row.get(7)?,
            license_expires_at: row.get(8)?,
            created_at: row.get(9)?,
        })
    }
}

impl FromRow for Domain {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Domain {
            id: row.get(0)?,
            license_id: row.get(1)?,
            domain_name: row.get(2)?,
            status: parse_col(row, 3)?,
            last_checked_at: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for KbCategory {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(KbCategory {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
            requires_serial: row.get(3)?,
            requires_purchase_code: row.get(4)?,
            product_id: row.get(5)?,
            verification_source: parse_opt_col(row, 6)?,
            created_at: row.get(7)?,
        })
    }
}

impl FromRow for KbArticle {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(KbArticle {
            id: row.get(0)?,
            category_id: row.get(1)?,
            title: row.get(2)?,
            slug: row.get(3)?,
            content: row.get(4)?,
            requires_serial: row.get(5)?,
            requires_purchase_code: row.get(6)?,
            product_id: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

impl FromRow for VerificationLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let response_data: Option<String> = row.get(10)?;
        let response_data = response_data
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?;

        Ok(VerificationLog {
            id: row.get(0)?,
            purchase_code_hash: row.get(1)?,
            masked_purchase_code: row.get(2)?,
            domain: row.get(3)?,
            ip_address: row.get(4)?,
            user_agent: row.get(5)?,
            is_valid: row.get(6)?,
            status: parse_col(row, 7)?,
            verification_source: parse_col(row, 8)?,
            response_message: row.get(9)?,
            response_data,
            error_details: row.get(11)?,
            verified_at: row.get(12)?,
            created_at: row.get(13)?,
        })
    }
}

pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<Option<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    match rows.next()? {
        Some(row) => Ok(Some(T::from_row(row)?)),
        None => Ok(None),
    }
}

pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| T::from_row(row))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
