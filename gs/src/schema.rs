//! SQLite schema for the record store

pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    data TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (collection, id)
);

CREATE TABLE IF NOT EXISTS record_indexes (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    field TEXT NOT NULL,
    value_text TEXT,
    value_int INTEGER,
    PRIMARY KEY (collection, id, field),
    FOREIGN KEY (collection, id) REFERENCES records(collection, id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_record_indexes_text ON record_indexes(collection, field, value_text);
CREATE INDEX IF NOT EXISTS idx_record_indexes_int ON record_indexes(collection, field, value_int);
"#;
