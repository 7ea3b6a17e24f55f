//! v001 -- Initial schema creation.
//!
//! Creates the `notes` table.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS notes (
    id         TEXT PRIMARY KEY NOT NULL,   -- client-supplied or UUID v4
    name       TEXT NOT NULL,
    company    TEXT,
    phone      TEXT NOT NULL,
    mail       TEXT NOT NULL,
    birth_date TEXT,
    image_id   TEXT                         -- hex digest of an image blob, unchecked
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
