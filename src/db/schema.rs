/// Schema for the pending-write queue.
pub const SCHEMA: &str = r#"
-- Transactions written while offline, waiting for a bulk push
CREATE TABLE IF NOT EXISTS pending_transactions (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    queue_key TEXT NOT NULL UNIQUE,
    record TEXT NOT NULL,
    enqueued_at TEXT NOT NULL
);
"#;
