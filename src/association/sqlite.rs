//! SQLite-backed association store.
//!
//! Each association is stored once as a JSON record; a key table maps every
//! member copy to the record. Writing a new association supersedes every
//! older record sharing one of its members, together with that record's
//! remaining keys.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::common::error::{AssociationError, AssociationResult};

use super::{AssociationStore, MessageAssociation};

const IN_MEMORY: &str = ":memory:";

pub struct SqliteStore {
    path: String,
    /// `None` until started and after stopped.
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            conn: Mutex::new(None),
        }
    }

    fn open(&self) -> AssociationResult<Connection> {
        let conn = if self.path == IN_MEMORY {
            Connection::open_in_memory()?
        } else {
            let conn = Connection::open(&self.path)?;
            // journal_mode PRAGMA always returns the resulting mode
            let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
            conn
        };
        Self::run_migrations(&conn)?;
        Ok(conn)
    }

    fn run_migrations(conn: &Connection) -> AssociationResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS associations (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                record      TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS association_keys (
                client          TEXT NOT NULL,
                chat_id         TEXT NOT NULL,
                message_id      TEXT NOT NULL,
                association_id  INTEGER NOT NULL REFERENCES associations(id),
                PRIMARY KEY (client, chat_id, message_id)
            );
            CREATE INDEX IF NOT EXISTS idx_association_keys_association
                ON association_keys(association_id);",
        )?;
        Ok(())
    }
}

#[async_trait]
impl AssociationStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn start(&self) -> AssociationResult<()> {
        let mut conn = self.conn.lock().await;
        if conn.is_none() {
            *conn = Some(self.open()?);
            info!(path = %self.path, "Message association store opened");
        }
        Ok(())
    }

    async fn stop(&self) -> AssociationResult<()> {
        let mut conn = self.conn.lock().await;
        if let Some(db) = conn.take() {
            db.close().map_err(|(_, e)| AssociationError::Sqlite(e))?;
            info!(path = %self.path, "Message association store closed");
        }
        Ok(())
    }

    async fn get(
        &self,
        client: &str,
        chat_id: &str,
        message_id: &str,
    ) -> AssociationResult<Option<MessageAssociation>> {
        let conn = self.conn.lock().await;
        let conn = conn.as_ref().ok_or(AssociationError::NotStarted)?;

        let record: Option<String> = conn
            .query_row(
                "SELECT a.record
                 FROM association_keys k
                 JOIN associations a ON a.id = k.association_id
                 WHERE k.client = ?1 AND k.chat_id = ?2 AND k.message_id = ?3",
                params![client.to_lowercase(), chat_id, message_id],
                |row| row.get(0),
            )
            .optional()?;

        match record {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, association: &MessageAssociation) -> AssociationResult<()> {
        if association.is_empty() {
            return Ok(());
        }
        let record = serde_json::to_string(association)?;

        let mut conn = self.conn.lock().await;
        let conn = conn.as_mut().ok_or(AssociationError::NotStarted)?;

        let tx = conn.transaction()?;

        let mut superseded: Vec<i64> = Vec::new();
        for message in &association.messages {
            let previous: Option<i64> = tx
                .query_row(
                    "SELECT association_id FROM association_keys
                     WHERE client = ?1 AND chat_id = ?2 AND message_id = ?3",
                    params![
                        message.client.to_lowercase(),
                        message.chat_id,
                        message.message_id
                    ],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(id) = previous.filter(|id| !superseded.contains(id)) {
                superseded.push(id);
            }
        }

        let mut removed = 0;
        for id in &superseded {
            tx.execute("DELETE FROM association_keys WHERE association_id = ?1", params![id])?;
            removed += tx.execute("DELETE FROM associations WHERE id = ?1", params![id])?;
        }

        tx.execute(
            "INSERT INTO associations (record, created_at) VALUES (?1, ?2)",
            params![record, Utc::now().to_rfc3339()],
        )?;
        let association_id = tx.last_insert_rowid();

        for message in &association.messages {
            tx.execute(
                "INSERT INTO association_keys (client, chat_id, message_id, association_id)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(client, chat_id, message_id)
                 DO UPDATE SET association_id = excluded.association_id",
                params![
                    message.client.to_lowercase(),
                    message.chat_id,
                    message.message_id,
                    association_id
                ],
            )?;
        }
        tx.commit()?;

        debug!(
            association_id,
            copies = association.len(),
            superseded = removed,
            "Stored message association"
        );
        Ok(())
    }
}
