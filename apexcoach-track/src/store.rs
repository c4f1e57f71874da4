//! SQLite-backed track store
//!
//! Single-connection store behind a mutex: readers take the lock
//! briefly, the seeder holds it for a whole transaction so partial
//! seeds are never visible. Migrations run at open. The sessions and
//! laps tables exist for downstream consumers; the analysis core never
//! writes them.

use crate::models::{CornerRecord, TrackCharacter, TrackRecord, TrackType};
use anyhow::{Context, Result};
use apexcoach_core::error::AnalysisError;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::Mutex;

pub struct TrackStore {
    conn: Mutex<Connection>,
}

impl TrackStore {
    /// Open (creating if needed) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, AnalysisError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AnalysisError::TrackStoreUnavailable(format!(
                        "cannot create {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| AnalysisError::TrackStoreUnavailable(e.to_string()))?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, AnalysisError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AnalysisError::TrackStoreUnavailable(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, AnalysisError> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| AnalysisError::TrackStoreUnavailable(e.to_string()))?;
        run_migrations(&conn).map_err(|e| AnalysisError::TrackStoreUnavailable(e.to_string()))?;
        Ok(TrackStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn upsert_track(&self, track: &TrackRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        conn.execute(
            "INSERT INTO tracks (track_id, name, config, length_meters, track_type, character, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(track_id) DO UPDATE SET
                 name = excluded.name,
                 config = excluded.config,
                 length_meters = excluded.length_meters,
                 track_type = excluded.track_type,
                 character = excluded.character,
                 notes = excluded.notes",
            params![
                track.track_id,
                track.name,
                track.config,
                track.length_meters,
                track.track_type.as_str(),
                track.character.map(|c| c.as_str()),
                track.notes,
            ],
        )
        .context("upsert track")?;
        Ok(())
    }

    pub fn get_track(&self, track_id: &str) -> Result<Option<TrackRecord>> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut stmt = conn
            .prepare("SELECT * FROM tracks WHERE track_id = ?1")
            .context("prepare get_track")?;
        let mut rows = stmt
            .query_map(params![track_id], row_to_track)
            .context("query track")?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn list_tracks(&self) -> Result<Vec<TrackRecord>> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut stmt = conn
            .prepare("SELECT * FROM tracks ORDER BY name")
            .context("prepare list_tracks")?;
        let rows = stmt.query_map([], row_to_track).context("query tracks")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("collect tracks")
    }

    pub fn upsert_corner(&self, corner: &CornerRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        insert_corner(&conn, corner)
    }

    /// All corners of a track, ordered by distance from the start line.
    pub fn list_corners(&self, track_id: &str) -> Result<Vec<CornerRecord>> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut stmt = conn
            .prepare(
                "SELECT * FROM corners WHERE track_id = ?1 ORDER BY distance_start_meters",
            )
            .context("prepare list_corners")?;
        let rows = stmt
            .query_map(params![track_id], row_to_corner)
            .context("query corners")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("collect corners")
    }

    pub fn has_named_corners(&self, track_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM corners
                 WHERE track_id = ?1 AND name IS NOT NULL AND name != ''",
                params![track_id],
                |row| row.get(0),
            )
            .context("count named corners")?;
        Ok(count > 0)
    }

    /// Atomically replace a track's corner set. Used by the seeder; the
    /// connection lock is held for the whole transaction so readers
    /// never observe a partial seed.
    pub fn replace_corners(&self, track_id: &str, corners: &[CornerRecord]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let tx = conn.transaction().context("begin corner replace")?;
        tx.execute("DELETE FROM corners WHERE track_id = ?1", params![track_id])
            .context("clear corners")?;
        for corner in corners {
            insert_corner(&tx, corner)?;
        }
        tx.commit().context("commit corner replace")?;
        Ok(())
    }

    /// Seed unnamed corner records from a detection pass. No-op when
    /// the track already has any corners.
    pub fn populate_from_detection(
        &self,
        track_id: &str,
        segments: &[apexcoach_core::model::CornerSegment],
    ) -> Result<()> {
        if !self.list_corners(track_id)?.is_empty() {
            return Ok(());
        }
        let corners: Vec<CornerRecord> = segments
            .iter()
            .map(|seg| CornerRecord {
                corner_id: None,
                track_id: track_id.to_string(),
                corner_number: seg.number as i64,
                name: None,
                distance_start_meters: seg.entry_m as f64,
                distance_end_meters: seg.exit_m as f64,
                corner_type: None,
                notes: None,
            })
            .collect();
        self.replace_corners(track_id, &corners)
    }
}

fn insert_corner(conn: &Connection, corner: &CornerRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO corners (track_id, corner_number, name,
                              distance_start_meters, distance_end_meters,
                              corner_type, notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(track_id, corner_number) DO UPDATE SET
             name = excluded.name,
             distance_start_meters = excluded.distance_start_meters,
             distance_end_meters = excluded.distance_end_meters,
             corner_type = excluded.corner_type,
             notes = excluded.notes",
        params![
            corner.track_id,
            corner.corner_number,
            corner.name,
            corner.distance_start_meters,
            corner.distance_end_meters,
            corner.corner_type,
            corner.notes,
        ],
    )
    .context("insert corner")?;
    Ok(())
}

fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tracks (
             track_id TEXT PRIMARY KEY,
             name TEXT NOT NULL,
             config TEXT,
             length_meters REAL,
             track_type TEXT,
             character TEXT,
             notes TEXT
         );

         CREATE TABLE IF NOT EXISTS corners (
             corner_id INTEGER PRIMARY KEY AUTOINCREMENT,
             track_id TEXT REFERENCES tracks(track_id),
             corner_number INTEGER,
             name TEXT,
             distance_start_meters REAL,
             distance_end_meters REAL,
             corner_type TEXT,
             notes TEXT,
             UNIQUE (track_id, corner_number)
         );

         -- Written by downstream history consumers, not by the core.
         CREATE TABLE IF NOT EXISTS sessions (
             session_id TEXT PRIMARY KEY,
             track_id TEXT REFERENCES tracks(track_id),
             car TEXT,
             session_type TEXT,
             session_date TIMESTAMP,
             best_lap_time REAL,
             theoretical_best REAL,
             lap_count INTEGER,
             capture_path TEXT,
             notes TEXT
         );

         CREATE TABLE IF NOT EXISTS laps (
             lap_id INTEGER PRIMARY KEY AUTOINCREMENT,
             session_id TEXT REFERENCES sessions(session_id),
             lap_number INTEGER,
             lap_time REAL,
             is_valid BOOLEAN,
             sector_times TEXT
         );",
    )
}

fn row_to_track(row: &Row) -> rusqlite::Result<TrackRecord> {
    let track_type: Option<String> = row.get("track_type")?;
    let character: Option<String> = row.get("character")?;
    Ok(TrackRecord {
        track_id: row.get("track_id")?,
        name: row.get("name")?,
        config: row.get("config")?,
        length_meters: row.get::<_, Option<f64>>("length_meters")?.unwrap_or(0.0),
        track_type: track_type
            .as_deref()
            .and_then(TrackType::parse)
            .unwrap_or(TrackType::Road),
        character: character.as_deref().and_then(TrackCharacter::parse),
        notes: row.get("notes")?,
    })
}

fn row_to_corner(row: &Row) -> rusqlite::Result<CornerRecord> {
    Ok(CornerRecord {
        corner_id: row.get("corner_id")?,
        track_id: row.get("track_id")?,
        corner_number: row.get("corner_number")?,
        name: row.get("name")?,
        distance_start_meters: row.get("distance_start_meters")?,
        distance_end_meters: row.get("distance_end_meters")?,
        corner_type: row.get("corner_type")?,
        notes: row.get("notes")?,
    })
}
