use crate::resources::error::ResourceStoreError;
use crate::resources::models::ResourceRecord;
use crate::resources::resource_store::ResourceStore;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::task;
use tracing::{debug, error, info};

const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

const RESOURCE_COLUMNS: &str = "resource_id, booking_id, file_name, content_type, resource_type, \
     blob_key, url, size, created_at, updated_at, status, is_chunked_file, is_complete, \
     session_id, original_resource_id";

/// A SQLite implementation of the ResourceStore trait
pub struct SqliteResourceStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteResourceStore {
    pub fn new(db_path: &str) -> Result<Self, ResourceStoreError> {
        info!("Creating SQLite resource store at path: {db_path}");

        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    ResourceStoreError::OpenError(format!("Failed to create directory: {e}"))
                })?;
            }
        }

        let connection = Connection::open(db_path).map_err(|e| {
            error!("Failed to open SQLite database at {db_path}: {e}");
            ResourceStoreError::OpenError(format!("Failed to open SQLite database: {e}"))
        })?;
        // Sessions and resources share one file
        connection.busy_timeout(BUSY_TIMEOUT).map_err(|e| {
            ResourceStoreError::OpenError(format!("Failed to set busy timeout: {e}"))
        })?;

        connection
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS resources (
                    resource_id TEXT PRIMARY KEY,
                    booking_id TEXT NOT NULL,
                    file_name TEXT NOT NULL,
                    content_type TEXT NOT NULL,
                    resource_type TEXT NOT NULL,
                    blob_key TEXT NOT NULL,
                    url TEXT NOT NULL,
                    size INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    status TEXT NOT NULL,
                    is_chunked_file INTEGER NOT NULL,
                    is_complete INTEGER NOT NULL,
                    session_id TEXT NOT NULL,
                    original_resource_id TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_resources_booking ON resources(booking_id);",
            )
            .map_err(|e| {
                ResourceStoreError::OpenError(format!("Failed to create resources table: {e}"))
            })?;

        Ok(SqliteResourceStore {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    fn datetime_to_string(dt: DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, ResourceStoreError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                ResourceStoreError::OperationError(format!("Failed to parse datetime: {e}"))
            })
    }

    fn read_record(row: &Row<'_>) -> Result<ResourceRecord, ResourceStoreError> {
        let column = |e: rusqlite::Error| {
            ResourceStoreError::OperationError(format!("Failed to read resource row: {e}"))
        };
        let size: i64 = row.get(7).map_err(column)?;
        let created_at: String = row.get(8).map_err(column)?;
        let updated_at: String = row.get(9).map_err(column)?;

        Ok(ResourceRecord {
            resource_id: row.get(0).map_err(column)?,
            booking_id: row.get(1).map_err(column)?,
            file_name: row.get(2).map_err(column)?,
            content_type: row.get(3).map_err(column)?,
            resource_type: row.get(4).map_err(column)?,
            blob_key: row.get(5).map_err(column)?,
            url: row.get(6).map_err(column)?,
            size: size.max(0) as u64,
            created_at: Self::string_to_datetime(&created_at)?,
            updated_at: Self::string_to_datetime(&updated_at)?,
            status: row.get(10).map_err(column)?,
            is_chunked_file: row.get(11).map_err(column)?,
            is_complete: row.get(12).map_err(column)?,
            session_id: row.get(13).map_err(column)?,
            original_resource_id: row.get(14).map_err(column)?,
        })
    }

    async fn with_connection<T, F>(&self, op: F) -> Result<T, ResourceStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, ResourceStoreError> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        task::spawn_blocking(move || {
            let conn = connection
                .lock()
                .map_err(|_| ResourceStoreError::Locked)?;
            op(&conn)
        })
        .await
        .map_err(|e| ResourceStoreError::OperationError(format!("Task panic: {e}")))?
    }

    fn query_records(
        conn: &Connection,
        sql: &str,
        key: &str,
    ) -> Result<Vec<ResourceRecord>, ResourceStoreError> {
        let mut stmt = conn.prepare(sql).map_err(|e| {
            ResourceStoreError::OperationError(format!("Failed to prepare query: {e}"))
        })?;
        let mut rows = stmt.query(params![key]).map_err(|e| {
            ResourceStoreError::OperationError(format!("Failed to query resources: {e}"))
        })?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().map_err(|e| {
            ResourceStoreError::OperationError(format!("Failed to read resource: {e}"))
        })? {
            records.push(Self::read_record(row)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl ResourceStore for SqliteResourceStore {
    async fn put_resource(&self, record: ResourceRecord) -> Result<(), ResourceStoreError> {
        debug!(
            "Writing resource record {} for booking {}",
            record.resource_id, record.booking_id
        );
        self.with_connection(move |conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO resources ({RESOURCE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
                ),
                params![
                    record.resource_id,
                    record.booking_id,
                    record.file_name,
                    record.content_type,
                    record.resource_type,
                    record.blob_key,
                    record.url,
                    i64::try_from(record.size).unwrap_or(i64::MAX),
                    Self::datetime_to_string(record.created_at),
                    Self::datetime_to_string(record.updated_at),
                    record.status,
                    record.is_chunked_file,
                    record.is_complete,
                    record.session_id,
                    record.original_resource_id,
                ],
            )
            .map_err(|e| {
                error!("Failed to write resource record: {e}");
                ResourceStoreError::OperationError(format!("Failed to write resource record: {e}"))
            })?;
            Ok(())
        })
        .await
    }

    async fn get_resource(
        &self,
        resource_id: &str,
    ) -> Result<Option<ResourceRecord>, ResourceStoreError> {
        let resource_id = resource_id.to_string();
        self.with_connection(move |conn| {
            let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE resource_id = ?1");
            Ok(Self::query_records(conn, &sql, &resource_id)?.into_iter().next())
        })
        .await
    }

    async fn list_for_booking(
        &self,
        booking_id: &str,
    ) -> Result<Vec<ResourceRecord>, ResourceStoreError> {
        let booking_id = booking_id.to_string();
        self.with_connection(move |conn| {
            let sql = format!(
                "SELECT {RESOURCE_COLUMNS} FROM resources WHERE booking_id = ?1
                 ORDER BY created_at ASC, resource_id ASC"
            );
            Self::query_records(conn, &sql, &booking_id)
        })
        .await
    }
}
