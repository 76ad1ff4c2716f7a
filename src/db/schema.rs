pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    api_key_hash TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS products (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    marketplace_item_id TEXT,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS licenses (
    id TEXT PRIMARY KEY,
    key TEXT NOT NULL UNIQUE,
    product_id TEXT NOT NULL REFERENCES products(id),
    owner_id TEXT REFERENCES users(id),
    status TEXT NOT NULL DEFAULT 'active',
    license_type TEXT NOT NULL,
    max_domains INTEGER,
    support_expires_at INTEGER,
    license_expires_at INTEGER,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_licenses_owner ON licenses(owner_id, product_id);

CREATE TABLE IF NOT EXISTS domains (
    id TEXT PRIMARY KEY,
    license_id TEXT NOT NULL REFERENCES licenses(id),
    domain_name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    last_checked_at INTEGER,
    created_at INTEGER NOT NULL,
    UNIQUE(license_id, domain_name)
);

CREATE TABLE IF NOT EXISTS kb_categories (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    requires_serial INTEGER NOT NULL DEFAULT 0,
    requires_purchase_code INTEGER NOT NULL DEFAULT 0,
    product_id TEXT REFERENCES products(id),
    verification_source TEXT,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS kb_articles (
    id TEXT PRIMARY KEY,
    category_id TEXT NOT NULL REFERENCES kb_categories(id),
    title TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    content TEXT NOT NULL,
    requires_serial INTEGER NOT NULL DEFAULT 0,
    requires_purchase_code INTEGER NOT NULL DEFAULT 0,
    product_id TEXT REFERENCES products(id),
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS verification_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    purchase_code_hash TEXT NOT NULL,
    masked_purchase_code TEXT NOT NULL,
    domain TEXT NOT NULL,
    ip_address TEXT,
    user_agent TEXT,
    is_valid INTEGER NOT NULL,
    status TEXT NOT NULL,
    verification_source TEXT NOT NULL,
    response_message TEXT NOT NULL,
    response_data TEXT,
    error_details TEXT,
    verified_at INTEGER,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_verification_logs_created ON verification_logs(created_at DESC, id DESC);
CREATE INDEX IF NOT EXISTS idx_verification_logs_ip ON verification_logs(ip_address, created_at);
CREATE INDEX IF NOT EXISTS idx_verification_logs_hash ON verification_logs(purchase_code_hash);
"#;
