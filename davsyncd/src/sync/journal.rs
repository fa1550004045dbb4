use std::{path::PathBuf, str::FromStr};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Row, migrate::Migrator};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use super::item::ItemType;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const EXCLUDED_KIND: &str = "excluded";

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error("invalid item type: {0}")]
    InvalidItemType(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub item_type: ItemType,
    pub etag: Option<String>,
    pub file_id: Option<String>,
    pub modified: Option<i64>,
    pub e2e_mangled_name: Option<String>,
}

impl FileRecord {
    pub fn file(path: impl Into<String>) -> Self {
        Self::new(path, ItemType::File)
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self::new(path, ItemType::Directory)
    }

    fn new(path: impl Into<String>, item_type: ItemType) -> Self {
        Self {
            path: path.into(),
            item_type,
            etag: None,
            file_id: None,
            modified: None,
            e2e_mangled_name: None,
        }
    }
}

/// A synced subtree below a directory that also holds sync-excluded content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedDescendant {
    pub path: String,
    pub is_directory: bool,
}

/// The part of the journal the propagation jobs depend on.
#[async_trait]
pub trait SyncJournal: Send + Sync {
    async fn has_selective_sync_descendants(&self, path: &str) -> Result<bool, JournalError>;

    /// Ordered by path; the order is the deletion order.
    async fn synced_descendants(&self, path: &str) -> Result<Vec<SyncedDescendant>, JournalError>;

    async fn delete_file_record(&self, path: &str, recursive: bool) -> Result<(), JournalError>;

    async fn commit(&self, label: &str) -> Result<(), JournalError>;
}

struct JournalConnection {
    conn: SqliteConnection,
    in_transaction: bool,
}

impl JournalConnection {
    async fn begin_if_needed(&mut self) -> Result<(), JournalError> {
        if !self.in_transaction {
            sqlx::query("BEGIN").execute(&mut self.conn).await?;
            self.in_transaction = true;
        }
        Ok(())
    }

    async fn commit(&mut self, label: &str) -> Result<(), JournalError> {
        if self.in_transaction {
            sqlx::query("COMMIT").execute(&mut self.conn).await?;
            self.in_transaction = false;
            debug!(label, "journal committed");
        }
        Ok(())
    }
}

/// Local sync journal. Writes accumulate in an open transaction until
/// [`JournalStore::commit`] is called.
pub struct JournalStore {
    inner: Mutex<JournalConnection>,
}

impl JournalStore {
    pub async fn new(database_url: &str) -> Result<Self, JournalError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        Self::connect_with(options).await
    }

    pub async fn in_memory() -> Result<Self, JournalError> {
        Self::new("sqlite::memory:").await
    }

    pub async fn new_default() -> Result<Self, JournalError> {
        Self::open_path(default_db_path()?).await
    }

    pub async fn open_path(db_path: PathBuf) -> Result<Self, JournalError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        Self::connect_with(options).await
    }

    async fn connect_with(options: SqliteConnectOptions) -> Result<Self, JournalError> {
        let conn = options.connect().await?;
        let store = Self {
            inner: Mutex::new(JournalConnection {
                conn,
                in_transaction: false,
            }),
        };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), JournalError> {
        let mut guard = self.inner.lock().await;
        MIGRATOR.run(&mut guard.conn).await?;
        Ok(())
    }

    pub async fn set_file_record(&self, record: &FileRecord) -> Result<(), JournalError> {
        let mut guard = self.inner.lock().await;
        guard.begin_if_needed().await?;
        sqlx::query(
            "INSERT INTO metadata (path, item_type, etag, file_id, modified, e2e_mangled_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(path) DO UPDATE SET
                item_type = excluded.item_type,
                etag = excluded.etag,
                file_id = excluded.file_id,
                modified = excluded.modified,
                e2e_mangled_name = excluded.e2e_mangled_name",
        )
        .bind(normalize(&record.path))
        .bind(item_type_as_str(record.item_type))
        .bind(&record.etag)
        .bind(&record.file_id)
        .bind(record.modified)
        .bind(&record.e2e_mangled_name)
        .execute(&mut guard.conn)
        .await?;
        Ok(())
    }

    pub async fn get_file_record(&self, path: &str) -> Result<Option<FileRecord>, JournalError> {
        let mut guard = self.inner.lock().await;
        let row = sqlx::query(
            "SELECT path, item_type, etag, file_id, modified, e2e_mangled_name
             FROM metadata WHERE path = ?1",
        )
        .bind(normalize(path))
        .fetch_optional(&mut guard.conn)
        .await?;

        row.map(|row| record_from_row(&row)).transpose()
    }

    /// `path` itself and everything below it, ordered by path.
    pub async fn list_records_by_prefix(&self, path: &str) -> Result<Vec<FileRecord>, JournalError> {
        let path = normalize(path);
        let mut guard = self.inner.lock().await;
        let rows = if path.is_empty() {
            sqlx::query(
                "SELECT path, item_type, etag, file_id, modified, e2e_mangled_name
                 FROM metadata ORDER BY path ASC",
            )
            .fetch_all(&mut guard.conn)
            .await?
        } else {
            let prefix = format!("{path}/");
            sqlx::query(
                "SELECT path, item_type, etag, file_id, modified, e2e_mangled_name
                 FROM metadata
                 WHERE path = ?1 OR substr(path, 1, ?2) = ?3
                 ORDER BY path ASC",
            )
            .bind(path)
            .bind(prefix.chars().count() as i64)
            .bind(&prefix)
            .fetch_all(&mut guard.conn)
            .await?
        };

        rows.iter().map(record_from_row).collect()
    }

    pub async fn delete_file_record(&self, path: &str, recursive: bool) -> Result<(), JournalError> {
        let path = normalize(path);
        let mut guard = self.inner.lock().await;
        guard.begin_if_needed().await?;
        // Single statement: on failure SQLite undoes all of it.
        let query = match (recursive, path.is_empty()) {
            (true, true) => sqlx::query("DELETE FROM metadata"),
            (true, false) => {
                let prefix = format!("{path}/");
                sqlx::query("DELETE FROM metadata WHERE path = ?1 OR substr(path, 1, ?2) = ?3")
                    .bind(path)
                    .bind(prefix.chars().count() as i64)
                    .bind(prefix)
            }
            (false, _) => sqlx::query("DELETE FROM metadata WHERE path = ?1").bind(path),
        };
        query.execute(&mut guard.conn).await?;
        Ok(())
    }

    pub async fn commit(&self, label: &str) -> Result<(), JournalError> {
        self.inner.lock().await.commit(label).await
    }

    /// Replaces the selective-sync exclusion list and commits it.
    pub async fn set_excluded_paths(&self, paths: &[String]) -> Result<(), JournalError> {
        let mut guard = self.inner.lock().await;
        guard.begin_if_needed().await?;
        sqlx::query("DELETE FROM selective_sync WHERE kind = ?1")
            .bind(EXCLUDED_KIND)
            .execute(&mut guard.conn)
            .await?;
        for path in paths {
            sqlx::query(
                "INSERT INTO selective_sync (path, kind) VALUES (?1, ?2)
                 ON CONFLICT(path) DO UPDATE SET kind = excluded.kind",
            )
            .bind(normalize(path))
            .bind(EXCLUDED_KIND)
            .execute(&mut guard.conn)
            .await?;
        }
        guard.commit("Selective sync list").await
    }

    pub async fn excluded_paths(&self) -> Result<Vec<String>, JournalError> {
        let mut guard = self.inner.lock().await;
        let rows = sqlx::query("SELECT path FROM selective_sync WHERE kind = ?1 ORDER BY path ASC")
            .bind(EXCLUDED_KIND)
            .fetch_all(&mut guard.conn)
            .await?;
        rows.into_iter()
            .map(|row| row.try_get::<String, _>("path").map_err(JournalError::from))
            .collect()
    }

    pub async fn has_selective_sync_descendants(&self, path: &str) -> Result<bool, JournalError> {
        let path = normalize(path);
        let excluded = self.excluded_paths().await?;
        Ok(excluded.iter().any(|ex| is_strictly_below(ex, path)))
    }

    pub async fn synced_descendants(
        &self,
        path: &str,
    ) -> Result<Vec<SyncedDescendant>, JournalError> {
        let path = normalize(path);
        let excluded = self.excluded_paths().await?;
        let records = self.list_records_by_prefix(path).await?;
        Ok(select_synced_descendants(path, &records, &excluded))
    }
}

#[async_trait]
impl SyncJournal for JournalStore {
    async fn has_selective_sync_descendants(&self, path: &str) -> Result<bool, JournalError> {
        JournalStore::has_selective_sync_descendants(self, path).await
    }

    async fn synced_descendants(&self, path: &str) -> Result<Vec<SyncedDescendant>, JournalError> {
        JournalStore::synced_descendants(self, path).await
    }

    async fn delete_file_record(&self, path: &str, recursive: bool) -> Result<(), JournalError> {
        JournalStore::delete_file_record(self, path, recursive).await
    }

    async fn commit(&self, label: &str) -> Result<(), JournalError> {
        JournalStore::commit(self, label).await
    }
}

/// Picks the largest subtrees below `dir` that hold no excluded content.
/// Directories that contain excluded content are never picked themselves;
/// their synced children are.
fn select_synced_descendants(
    dir: &str,
    records: &[FileRecord],
    excluded: &[String],
) -> Vec<SyncedDescendant> {
    let mut picked: Vec<SyncedDescendant> = Vec::new();
    for record in records {
        let path = record.path.as_str();
        if !is_strictly_below(path, dir) {
            continue;
        }
        if excluded
            .iter()
            .any(|ex| path == ex.as_str() || is_strictly_below(path, ex) || is_strictly_below(ex, path))
        {
            continue;
        }
        if picked
            .iter()
            .any(|p| p.is_directory && is_strictly_below(path, &p.path))
        {
            continue;
        }
        picked.push(SyncedDescendant {
            path: record.path.clone(),
            is_directory: record.item_type == ItemType::Directory,
        });
    }
    picked
}

fn is_strictly_below(path: &str, ancestor: &str) -> bool {
    if ancestor.is_empty() {
        return !path.is_empty();
    }
    path.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/') && rest.len() > 1)
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

fn item_type_as_str(item_type: ItemType) -> &'static str {
    match item_type {
        ItemType::File => "file",
        ItemType::Directory => "dir",
        ItemType::VirtualFile => "virtual",
    }
}

fn parse_item_type(value: &str) -> Result<ItemType, JournalError> {
    match value {
        "file" => Ok(ItemType::File),
        "dir" => Ok(ItemType::Directory),
        "virtual" => Ok(ItemType::VirtualFile),
        other => Err(JournalError::InvalidItemType(other.to_string())),
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<FileRecord, JournalError> {
    let item_type: String = row.try_get("item_type")?;
    Ok(FileRecord {
        path: row.try_get("path")?,
        item_type: parse_item_type(&item_type)?,
        etag: row.try_get("etag")?,
        file_id: row.try_get("file_id")?,
        modified: row.try_get("modified")?,
        e2e_mangled_name: row.try_get("e2e_mangled_name")?,
    })
}

fn default_db_path() -> Result<PathBuf, JournalError> {
    let mut path = dirs::data_dir().ok_or(JournalError::MissingDataDir)?;
    path.push("davsync");
    path.push("journal.db");
    Ok(path)
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
