use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::info;

use crate::db::{init_db, validate_tables};
use crate::error::Result;

/// Shared handle to the single database connection this process owns.
///
/// The destination database is opened read-write; the source database is
/// attached read-only as schema `src` so candidate collection can express
/// `id NOT IN (processed)` inside one statement. All operations are
/// serialized through the mutex; the engines are single-driver loops, so
/// contention is not a concern.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open the destination database, attach the source database, and
    /// initialise + validate the bridge-owned schema.
    pub fn open(dest_path: &str, source_path: &str) -> Result<Self> {
        let conn = Connection::open(dest_path)?;
        conn.execute(
            "ATTACH DATABASE ?1 AS src",
            [format!("file:{source_path}?mode=ro")],
        )?;
        init_db(&conn)?;
        validate_tables(&conn)?;
        info!(dest = %dest_path, source = %source_path, "store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store with an empty in-memory `src` schema. Test harnesses
    /// create source tables through `with_conn`.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("ATTACH DATABASE ':memory:' AS src", [])?;
        init_db(&conn)?;
        validate_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the underlying connection.
    ///
    /// The seam the engine crates use for their own SQL (alert metrics,
    /// evaluation queries) without taking ownership of the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap();
        Ok(f(&conn)?)
    }
}
