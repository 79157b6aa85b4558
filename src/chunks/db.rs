use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;

use super::types::{ChunkInfo, ChunkResult};

/// Embedded metadata log: `ChunkInfo` records keyed by content hash, replica
/// metadata keyed by object key, and one stat row for capacity accounting.
///
/// Calls are short and synchronous; the connection sits behind a mutex and is
/// shared by the async store through `Arc`.
pub struct ChunkDb {
    conn: Mutex<Connection>,
}

impl ChunkDb {
    pub fn open(path: &Path) -> ChunkResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chunks (
                hash BLOB PRIMARY KEY,
                info TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS replicas (
                key BLOB PRIMARY KEY,
                info TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS stat (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                capacity INTEGER NOT NULL,
                occupied INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn get_info(&self, hash: &[u8]) -> ChunkResult<Option<ChunkInfo>> {
        let conn = self.conn.lock().expect("chunk db lock poisoned");
        let row: Option<String> = conn
            .query_row(
                "SELECT info FROM chunks WHERE hash = ?1",
                params![hash],
                |row| row.get(0),
            )
            .optional()?;
        match row {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn put_info(&self, info: &ChunkInfo) -> ChunkResult<()> {
        let json = serde_json::to_string(info)?;
        let conn = self.conn.lock().expect("chunk db lock poisoned");
        conn.execute(
            "INSERT INTO chunks (hash, info) VALUES (?1, ?2)
             ON CONFLICT(hash) DO UPDATE SET info = excluded.info",
            params![info.hash, json],
        )?;
        Ok(())
    }

    pub fn delete_info(&self, hash: &[u8]) -> ChunkResult<()> {
        let conn = self.conn.lock().expect("chunk db lock poisoned");
        conn.execute("DELETE FROM chunks WHERE hash = ?1", params![hash])?;
        Ok(())
    }

    pub fn load_stat(&self) -> ChunkResult<Option<(u64, u64)>> {
        let conn = self.conn.lock().expect("chunk db lock poisoned");
        let row: Option<(i64, i64)> = conn
            .query_row("SELECT capacity, occupied FROM stat WHERE id = 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;
        Ok(row.map(|(capacity, occupied)| (capacity as u64, occupied as u64)))
    }

    pub fn save_stat(&self, capacity: u64, occupied: u64) -> ChunkResult<()> {
        let conn = self.conn.lock().expect("chunk db lock poisoned");
        conn.execute(
            "INSERT INTO stat (id, capacity, occupied) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET capacity = excluded.capacity, occupied = excluded.occupied",
            params![capacity as i64, occupied as i64],
        )?;
        Ok(())
    }

    /// Replica metadata is stored as the caller's serialized form; the engine
    /// treats it as opaque.
    pub fn put_replica_info(&self, key: &[u8], info_json: &str) -> ChunkResult<()> {
        let conn = self.conn.lock().expect("chunk db lock poisoned");
        conn.execute(
            "INSERT INTO replicas (key, info) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET info = excluded.info",
            params![key, info_json],
        )?;
        Ok(())
    }

    pub fn get_replica_info(&self, key: &[u8]) -> ChunkResult<Option<String>> {
        let conn = self.conn.lock().expect("chunk db lock poisoned");
        let row: Option<String> = conn
            .query_row(
                "SELECT info FROM replicas WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row)
    }

    pub fn delete_replica_info(&self, key: &[u8]) -> ChunkResult<()> {
        let conn = self.conn.lock().expect("chunk db lock poisoned");
        conn.execute("DELETE FROM replicas WHERE key = ?1", params![key])?;
        Ok(())
    }
}
