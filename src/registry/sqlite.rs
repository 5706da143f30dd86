use crate::registry::error::RegistryError;
use crate::registry::models::{ChunkSession, Completion, SessionStatus};
use crate::registry::session_store::SessionStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::task;
use tracing::{debug, error, info};

const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

const SESSION_COLUMNS: &str = "booking_id, chunk_id, session_id, original_file_name, total_chunks, \
     chunks_uploaded, checksum, manifest_key, manifest_timestamp, status, last_updated, \
     completed_at, failed_at, final_resource_id, reassembled_url, error_message, claim_token, \
     claimed_at";

/// A SQLite implementation of the SessionStore trait
pub struct SqliteSessionStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteSessionStore {
    /// Create a new SqliteSessionStore with the given database path
    pub fn new(db_path: &str) -> Result<Self, RegistryError> {
        info!("Creating SQLite session registry at path: {db_path}");

        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                fs::create_dir_all(parent).map_err(|e| {
                    error!("Failed to create directory {parent:?}: {e}");
                    RegistryError::OpenError(format!("Failed to create directory: {e}"))
                })?;
            }
        }

        let connection = Connection::open(db_path).map_err(|e| {
            error!("Failed to open SQLite database at {db_path}: {e}");
            RegistryError::OpenError(format!("Failed to open SQLite database: {e}"))
        })?;
        // Sessions and resources share one file
        connection.busy_timeout(BUSY_TIMEOUT).map_err(|e| {
            RegistryError::OpenError(format!("Failed to set busy timeout: {e}"))
        })?;

        connection
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS chunk_sessions (
                    booking_id TEXT NOT NULL,
                    chunk_id TEXT NOT NULL,
                    session_id TEXT NOT NULL,
                    original_file_name TEXT NOT NULL,
                    total_chunks INTEGER NOT NULL,
                    chunks_uploaded INTEGER NOT NULL DEFAULT 0,
                    checksum TEXT,
                    manifest_key TEXT,
                    manifest_timestamp INTEGER,
                    status TEXT NOT NULL,
                    last_updated TEXT NOT NULL,
                    completed_at TEXT,
                    failed_at TEXT,
                    final_resource_id TEXT,
                    reassembled_url TEXT,
                    error_message TEXT,
                    claim_token TEXT,
                    claimed_at TEXT,
                    PRIMARY KEY (booking_id, chunk_id)
                );
                CREATE INDEX IF NOT EXISTS idx_chunk_sessions_status_updated
                    ON chunk_sessions(status, last_updated);
                CREATE INDEX IF NOT EXISTS idx_chunk_sessions_final_resource
                    ON chunk_sessions(booking_id, final_resource_id);",
            )
            .map_err(|e| {
                error!("Failed to create chunk_sessions table: {e}");
                RegistryError::OpenError(format!("Failed to create chunk_sessions table: {e}"))
            })?;

        info!("SQLite session registry initialized successfully at: {db_path}");

        Ok(SqliteSessionStore {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    // Fixed-width RFC 3339 so that text comparison orders like time
    fn datetime_to_string(dt: DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, RegistryError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| RegistryError::OperationError(format!("Failed to parse datetime: {e}")))
    }

    fn optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, RegistryError> {
        s.as_deref().map(Self::string_to_datetime).transpose()
    }

    fn read_session(row: &Row<'_>) -> Result<ChunkSession, RegistryError> {
        let column = |e: rusqlite::Error| {
            RegistryError::OperationError(format!("Failed to read session row: {e}"))
        };

        let status: String = row.get(9).map_err(column)?;
        let last_updated: String = row.get(10).map_err(column)?;

        Ok(ChunkSession {
            booking_id: row.get(0).map_err(column)?,
            chunk_id: row.get(1).map_err(column)?,
            session_id: row.get(2).map_err(column)?,
            original_file_name: row.get(3).map_err(column)?,
            total_chunks: row.get(4).map_err(column)?,
            chunks_uploaded: row.get(5).map_err(column)?,
            checksum: row.get(6).map_err(column)?,
            manifest_key: row.get(7).map_err(column)?,
            timestamp: row.get(8).map_err(column)?,
            status: status.parse().map_err(RegistryError::OperationError)?,
            last_updated: Self::string_to_datetime(&last_updated)?,
            completed_at: Self::optional_datetime(row.get(11).map_err(column)?)?,
            failed_at: Self::optional_datetime(row.get(12).map_err(column)?)?,
            final_resource_id: row.get(13).map_err(column)?,
            reassembled_url: row.get(14).map_err(column)?,
            error_message: row.get(15).map_err(column)?,
            claim_token: row.get(16).map_err(column)?,
            claimed_at: Self::optional_datetime(row.get(17).map_err(column)?)?,
        })
    }

    /// Run `op` against the connection on the blocking pool
    async fn with_connection<T, F>(&self, op: F) -> Result<T, RegistryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, RegistryError> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        task::spawn_blocking(move || {
            let conn = connection.lock().map_err(|_| {
                error!("Failed to acquire database lock");
                RegistryError::Locked
            })?;
            op(&conn)
        })
        .await
        .map_err(|e| {
            error!("Task panic while accessing registry: {e}");
            RegistryError::OperationError(format!("Task panic: {e}"))
        })?
    }

    fn select_one(
        conn: &Connection,
        booking_id: &str,
        chunk_id: &str,
    ) -> Result<Option<ChunkSession>, RegistryError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM chunk_sessions WHERE booking_id = ?1 AND chunk_id = ?2"
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| RegistryError::OperationError(format!("Failed to prepare query: {e}")))?;
        let mut rows = stmt
            .query(params![booking_id, chunk_id])
            .map_err(|e| RegistryError::OperationError(format!("Failed to query session: {e}")))?;
        match rows
            .next()
            .map_err(|e| RegistryError::OperationError(format!("Failed to read session: {e}")))?
        {
            Some(row) => Ok(Some(Self::read_session(row)?)),
            None => Ok(None),
        }
    }

    fn select_many(
        conn: &Connection,
        where_clause: &str,
        bind: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ChunkSession>, RegistryError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM chunk_sessions WHERE {where_clause} ORDER BY last_updated ASC"
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| RegistryError::OperationError(format!("Failed to prepare query: {e}")))?;
        let mut rows = stmt
            .query(bind)
            .map_err(|e| RegistryError::OperationError(format!("Failed to query sessions: {e}")))?;

        let mut sessions = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| RegistryError::OperationError(format!("Failed to read session: {e}")))?
        {
            sessions.push(Self::read_session(row)?);
        }
        Ok(sessions)
    }

    fn insert_sql(on_conflict: &str) -> String {
        format!(
            "INSERT INTO chunk_sessions ({SESSION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
             {on_conflict}"
        )
    }

    fn write_session(
        conn: &Connection,
        sql: &str,
        session: &ChunkSession,
    ) -> Result<(), RegistryError> {
        conn.execute(
            sql,
            params![
                session.booking_id,
                session.chunk_id,
                session.session_id,
                session.original_file_name,
                session.total_chunks,
                session.chunks_uploaded,
                session.checksum,
                session.manifest_key,
                session.timestamp,
                session.status.as_str(),
                Self::datetime_to_string(session.last_updated),
                session.completed_at.map(Self::datetime_to_string),
                session.failed_at.map(Self::datetime_to_string),
                session.final_resource_id,
                session.reassembled_url,
                session.error_message,
                session.claim_token,
                session.claimed_at.map(Self::datetime_to_string),
            ],
        )
        .map_err(|e| {
            error!("Failed to write session record: {e}");
            RegistryError::OperationError(format!("Failed to write session record: {e}"))
        })?;
        Ok(())
    }

    fn stored_after_write(
        conn: &Connection,
        session: &ChunkSession,
    ) -> Result<ChunkSession, RegistryError> {
        Self::select_one(conn, &session.booking_id, &session.chunk_id)?
            .ok_or_else(|| RegistryError::SessionNotFound(session.session_id.clone()))
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get_session(
        &self,
        booking_id: &str,
        session_id: &str,
    ) -> Result<Option<ChunkSession>, RegistryError> {
        let booking_id = booking_id.to_string();
        let chunk_id = ChunkSession::chunk_id_for(session_id);
        self.with_connection(move |conn| Self::select_one(conn, &booking_id, &chunk_id))
            .await
    }

    async fn upsert_from_manifest(
        &self,
        session: ChunkSession,
    ) -> Result<ChunkSession, RegistryError> {
        debug!(
            "Registering session from manifest: booking={}, session={}, total_chunks={}",
            session.booking_id, session.session_id, session.total_chunks
        );
        self.with_connection(move |conn| {
            let sql = Self::insert_sql(
                "ON CONFLICT(booking_id, chunk_id) DO UPDATE SET
                    original_file_name = excluded.original_file_name,
                    total_chunks = excluded.total_chunks,
                    checksum = COALESCE(excluded.checksum, chunk_sessions.checksum),
                    manifest_key = COALESCE(excluded.manifest_key, chunk_sessions.manifest_key),
                    manifest_timestamp = COALESCE(excluded.manifest_timestamp, chunk_sessions.manifest_timestamp)
                 WHERE chunk_sessions.status = 'pending'",
            );
            Self::write_session(conn, &sql, &session)?;
            Self::stored_after_write(conn, &session)
        })
        .await
    }

    async fn insert_if_absent(
        &self,
        session: ChunkSession,
    ) -> Result<ChunkSession, RegistryError> {
        self.with_connection(move |conn| {
            let sql = Self::insert_sql("ON CONFLICT(booking_id, chunk_id) DO NOTHING");
            Self::write_session(conn, &sql, &session)?;
            Self::stored_after_write(conn, &session)
        })
        .await
    }

    async fn record_progress(
        &self,
        booking_id: &str,
        session_id: &str,
        chunks_uploaded: u32,
        at: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        let booking_id = booking_id.to_string();
        let session_id = session_id.to_string();
        self.with_connection(move |conn| {
            let rows_affected = conn
                .execute(
                    "UPDATE chunk_sessions SET chunks_uploaded = ?1, last_updated = ?2
                     WHERE booking_id = ?3 AND chunk_id = ?4 AND status = 'pending'",
                    params![
                        chunks_uploaded,
                        Self::datetime_to_string(at),
                        booking_id,
                        ChunkSession::chunk_id_for(&session_id)
                    ],
                )
                .map_err(|e| {
                    RegistryError::OperationError(format!("Failed to record progress: {e}"))
                })?;
            if rows_affected == 0
                && Self::select_one(conn, &booking_id, &ChunkSession::chunk_id_for(&session_id))?
                    .is_none()
            {
                return Err(RegistryError::SessionNotFound(session_id));
            }
            Ok(())
        })
        .await
    }

    async fn try_claim(
        &self,
        booking_id: &str,
        session_id: &str,
        token: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, RegistryError> {
        let booking_id = booking_id.to_string();
        let chunk_id = ChunkSession::chunk_id_for(session_id);
        let token = token.to_string();
        self.with_connection(move |conn| {
            let rows_affected = conn
                .execute(
                    "UPDATE chunk_sessions SET claim_token = ?1, claimed_at = ?2
                     WHERE booking_id = ?3 AND chunk_id = ?4 AND status = 'pending'
                       AND (claim_token IS NULL OR claimed_at IS NULL OR claimed_at < ?5)",
                    params![
                        token,
                        Self::datetime_to_string(now),
                        booking_id,
                        chunk_id,
                        Self::datetime_to_string(now - lease)
                    ],
                )
                .map_err(|e| RegistryError::OperationError(format!("Failed to claim: {e}")))?;
            Ok(rows_affected == 1)
        })
        .await
    }

    async fn mark_completed(
        &self,
        booking_id: &str,
        session_id: &str,
        token: &str,
        completion: &Completion,
    ) -> Result<bool, RegistryError> {
        let booking_id = booking_id.to_string();
        let chunk_id = ChunkSession::chunk_id_for(session_id);
        let token = token.to_string();
        let completion = completion.clone();
        self.with_connection(move |conn| {
            let completed_at = Self::datetime_to_string(completion.completed_at);
            let rows_affected = conn
                .execute(
                    "UPDATE chunk_sessions SET status = ?1, final_resource_id = ?2,
                        reassembled_url = ?3, completed_at = ?4, last_updated = ?4,
                        claim_token = NULL, claimed_at = NULL
                     WHERE booking_id = ?5 AND chunk_id = ?6 AND status = 'pending'
                       AND claim_token = ?7",
                    params![
                        SessionStatus::Completed.as_str(),
                        completion.final_resource_id,
                        completion.reassembled_url,
                        completed_at,
                        booking_id,
                        chunk_id,
                        token
                    ],
                )
                .map_err(|e| {
                    RegistryError::OperationError(format!("Failed to mark completed: {e}"))
                })?;
            Ok(rows_affected == 1)
        })
        .await
    }

    async fn mark_failed(
        &self,
        booking_id: &str,
        session_id: &str,
        token: &str,
        error_message: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RegistryError> {
        let booking_id = booking_id.to_string();
        let chunk_id = ChunkSession::chunk_id_for(session_id);
        let token = token.to_string();
        let error_message = error_message.to_string();
        self.with_connection(move |conn| {
            let failed_at = Self::datetime_to_string(at);
            let rows_affected = conn
                .execute(
                    "UPDATE chunk_sessions SET status = ?1, error_message = ?2,
                        failed_at = ?3, last_updated = ?3,
                        claim_token = NULL, claimed_at = NULL
                     WHERE booking_id = ?4 AND chunk_id = ?5 AND status = 'pending'
                       AND claim_token = ?6",
                    params![
                        SessionStatus::Failed.as_str(),
                        error_message,
                        failed_at,
                        booking_id,
                        chunk_id,
                        token
                    ],
                )
                .map_err(|e| RegistryError::OperationError(format!("Failed to mark failed: {e}")))?;
            Ok(rows_affected == 1)
        })
        .await
    }

    async fn restart(
        &self,
        booking_id: &str,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RegistryError> {
        let booking_id = booking_id.to_string();
        let chunk_id = ChunkSession::chunk_id_for(session_id);
        self.with_connection(move |conn| {
            let rows_affected = conn
                .execute(
                    "UPDATE chunk_sessions SET status = 'pending', error_message = NULL,
                        failed_at = NULL, last_updated = ?1
                     WHERE booking_id = ?2 AND chunk_id = ?3 AND status = 'failed'",
                    params![Self::datetime_to_string(at), booking_id, chunk_id],
                )
                .map_err(|e| RegistryError::OperationError(format!("Failed to restart: {e}")))?;
            Ok(rows_affected == 1)
        })
        .await
    }

    async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ChunkSession>, RegistryError> {
        let cutoff = Self::datetime_to_string(cutoff);
        self.with_connection(move |conn| {
            Self::select_many(
                conn,
                "status = 'pending' AND last_updated < ?1",
                &[&cutoff as &dyn rusqlite::ToSql],
            )
        })
        .await
    }

    async fn find_pending_for_booking(
        &self,
        booking_id: &str,
    ) -> Result<Vec<ChunkSession>, RegistryError> {
        let booking_id = booking_id.to_string();
        self.with_connection(move |conn| {
            Self::select_many(
                conn,
                "status = 'pending' AND booking_id = ?1",
                &[&booking_id as &dyn rusqlite::ToSql],
            )
        })
        .await
    }

    async fn find_by_final_resource(
        &self,
        booking_id: &str,
        resource_id: &str,
    ) -> Result<Option<ChunkSession>, RegistryError> {
        let booking_id = booking_id.to_string();
        let resource_id = resource_id.to_string();
        self.with_connection(move |conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM chunk_sessions
                 WHERE booking_id = ?1 AND final_resource_id = ?2"
            );
            conn.query_row(&sql, params![booking_id, resource_id], |row| {
                Ok(Self::read_session(row))
            })
            .optional()
            .map_err(|e| RegistryError::OperationError(format!("Failed to query session: {e}")))?
            .transpose()
        })
        .await
    }
}
