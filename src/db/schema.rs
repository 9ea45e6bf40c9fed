/// Schema for the durable store.
///
/// `ops_queue` uses AUTOINCREMENT so ids are never reused after a dequeue.
pub const SCHEMA: &str = r#"
-- Pending mutating requests, replayed in id order
CREATE TABLE IF NOT EXISTS ops_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    body TEXT,
    enqueued_at INTEGER NOT NULL
);

-- Cache generations; at most one is live
CREATE TABLE IF NOT EXISTS cache_namespaces (
    name TEXT PRIMARY KEY,
    live INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

-- Response snapshots keyed by request within a namespace
CREATE TABLE IF NOT EXISTS cache_entries (
    namespace TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (namespace, request_key)
);

-- Opaque collaborator records (reports, audio)
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    data TEXT NOT NULL,
    ts INTEGER NOT NULL,
    PRIMARY KEY (collection, id)
);

CREATE INDEX IF NOT EXISTS idx_records_ts ON records(collection, ts);
"#;
