//! Durable write-behind copy of high-level report state, used only to
//! render something instantly on reload. The server list always wins.

use crate::errors::{AppError, AppResult};
use crate::models::Report;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("schema.sql");
const SELECTION_KEY: &str = "selection";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MirrorSelection {
    pub project_id: Option<String>,
    pub report_id: Option<String>,
}

#[derive(Debug)]
pub struct LocalMirror {
    conn: Mutex<Connection>,
    path: PathBuf,
}

fn reports_key(project_id: &str) -> String {
    format!("reports:{project_id}")
}

impl LocalMirror {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> AppResult<()> {
        let value_json = serde_json::to_string(value)?;
        let conn = self
            .conn
            .lock()
            .map_err(|_| AppError::Internal("mirror mutex poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO mirror_entries (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![key, value_json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn fetch<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| AppError::Internal("mirror mutex poisoned".to_string()))?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM mirror_entries WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(AppError::from))
            .transpose()
    }

    pub fn save_reports(&self, project_id: &str, reports: &[Report]) -> AppResult<()> {
        self.put(&reports_key(project_id), reports)
    }

    pub fn load_reports(&self, project_id: &str) -> AppResult<Option<Vec<Report>>> {
        self.fetch(&reports_key(project_id))
    }

    pub fn save_selection(&self, selection: &MirrorSelection) -> AppResult<()> {
        self.put(SELECTION_KEY, selection)
    }

    pub fn load_selection(&self) -> AppResult<Option<MirrorSelection>> {
        self.fetch(SELECTION_KEY)
    }

    pub fn clear_project(&self, project_id: &str) -> AppResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| AppError::Internal("mirror mutex poisoned".to_string()))?;
        conn.execute(
            "DELETE FROM mirror_entries WHERE key = ?1",
            params![reports_key(project_id)],
        )?;
        Ok(())
    }
}
