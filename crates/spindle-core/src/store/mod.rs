//! SQLite catalog adapter.
//!
//! A narrow CRUD surface over the seven catalog tables; no matching or
//! merge logic lives here. Concurrent access is serialized by the
//! caller behind a single mutex; one `Catalog` is single-threaded.

mod migrations;

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{params, Connection};

use crate::error::{Error, Result};
use crate::record::DiscRecord;

use migrations::MIGRATIONS;

/// The flattened CD row, minus its id.
#[derive(Debug, Clone, PartialEq)]
pub struct CdFields {
    pub artist: String,
    pub title: String,
    pub genre: i64,
    pub year: u16,
    pub seconds: u32,
    pub revision: u16,
}

/// What the matching engine needs to score a candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct CdSummary {
    pub artist: String,
    pub title: String,
    pub seconds: u32,
    pub tracks: u32,
}

/// A catalog connection with the genre dictionary cache.
#[derive(Debug)]
pub struct Catalog {
    conn: Connection,
    genres: HashMap<String, i64>,
}

impl Catalog {
    /// Open (or create) a catalog at the given path and apply
    /// migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory catalog (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_millis(1000))?;
        let mut catalog = Self {
            conn,
            genres: HashMap::new(),
        };
        catalog.apply_migrations()?;
        catalog.load_genres()?;
        Ok(catalog)
    }

    fn apply_migrations(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        let mut stmt = self
            .conn
            .prepare("SELECT version FROM schema_migrations ORDER BY version")?;
        let applied: Vec<u32> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for migration in MIGRATIONS {
            if !applied.contains(&migration.version) {
                log::info!(
                    "applying migration {} ({})",
                    migration.version,
                    migration.name
                );
                self.conn.execute_batch(migration.sql)?;
                self.conn.execute(
                    "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
                    params![migration.version, migration.name],
                )?;
            }
        }

        Ok(())
    }

    fn load_genres(&mut self) -> Result<()> {
        let mut stmt = self.conn.prepare("SELECT id, name FROM GENRE")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(1)?, row.get::<_, i64>(0)?))
        })?;
        for row in rows {
            let (name, id) = row?;
            self.genres.insert(name, id);
        }
        Ok(())
    }
}

// Genre dictionary
impl Catalog {
    /// Intern a genre string, inserting it on first sight.
    pub fn genre_id(&mut self, name: &str) -> Result<i64> {
        if let Some(&id) = self.genres.get(name) {
            return Ok(id);
        }
        let inserted = self
            .conn
            .prepare_cached("INSERT INTO GENRE (name) VALUES (?1)")?
            .execute([name])?;
        if inserted != 1 {
            return Err(Error::Integrity("inserting new genre failed".into()));
        }
        let id = self.conn.last_insert_rowid();
        self.genres.insert(name.to_owned(), id);
        Ok(id)
    }

    /// Reverse lookup; empty string when the id is unknown.
    pub fn genre_name(&self, id: i64) -> Result<String> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT name FROM GENRE WHERE id = ?1")?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(String::new()),
        }
    }
}

// CD + TRACKS rows
impl Catalog {
    pub fn insert_cd(&self, rec: &DiscRecord, genre: i64) -> Result<i64> {
        self.conn
            .prepare_cached(
                "INSERT INTO CD (artist, title, genre, year, seconds, revision, tracks)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?
            .execute(params![
                rec.artist(),
                rec.title(),
                genre,
                rec.year(),
                i64::from(rec.seconds()),
                rec.revision(),
                rec.songs().len() as i64,
            ])?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_cd(&self, cd: i64, rec: &DiscRecord, genre: i64) -> Result<()> {
        self.conn
            .prepare_cached(
                "UPDATE CD SET artist = ?2, title = ?3, genre = ?4, year = ?5,
                               seconds = ?6, revision = ?7, tracks = ?8
                 WHERE cd = ?1",
            )?
            .execute(params![
                cd,
                rec.artist(),
                rec.title(),
                genre,
                rec.year(),
                i64::from(rec.seconds()),
                rec.revision(),
                rec.songs().len() as i64,
            ])?;
        Ok(())
    }

    pub fn delete_cd(&self, cd: i64) -> Result<()> {
        self.conn
            .prepare_cached("DELETE FROM CD WHERE cd = ?1")?
            .execute([cd])?;
        Ok(())
    }

    pub fn insert_track(&self, cd: i64, track: usize, song: &str, frames: u32) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO TRACKS (cd, track, song, frames) VALUES (?1, ?2, ?3, ?4)",
            )?
            .execute(params![cd, track as i64, song, i64::from(frames)])?;
        Ok(())
    }

    pub fn update_track(&self, cd: i64, track: usize, song: &str, frames: u32) -> Result<()> {
        self.conn
            .prepare_cached("UPDATE TRACKS SET song = ?3, frames = ?4 WHERE cd = ?1 AND track = ?2")?
            .execute(params![cd, track as i64, song, i64::from(frames)])?;
        Ok(())
    }

    pub fn delete_tracks(&self, cd: i64) -> Result<()> {
        self.conn
            .prepare_cached("DELETE FROM TRACKS WHERE cd = ?1")?
            .execute([cd])?;
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn cd_fields(&self, cd: i64) -> Result<Option<CdFields>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT artist, title, genre, year, seconds, revision FROM CD WHERE cd = ?1",
        )?;
        let mut rows = stmt.query([cd])?;
        match rows.next()? {
            Some(row) => Ok(Some(CdFields {
                artist: row.get(0)?,
                title: row.get(1)?,
                genre: row.get(2)?,
                year: row.get::<_, i64>(3)? as u16,
                seconds: row.get::<_, i64>(4)? as u32,
                revision: row.get::<_, i64>(5)? as u16,
            })),
            None => Ok(None),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn cd_summary(&self, cd: i64) -> Result<Option<CdSummary>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT artist, title, seconds, tracks FROM CD WHERE cd = ?1")?;
        let mut rows = stmt.query([cd])?;
        match rows.next()? {
            Some(row) => Ok(Some(CdSummary {
                artist: row.get(0)?,
                title: row.get(1)?,
                seconds: row.get::<_, i64>(2)? as u32,
                tracks: row.get::<_, i64>(3)? as u32,
            })),
            None => Ok(None),
        }
    }

    /// Songs and frame lengths in track order.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn tracks(&self, cd: i64) -> Result<Vec<(String, u32)>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT song, frames FROM TRACKS WHERE cd = ?1 ORDER BY track ASC")?;
        let rows = stmt.query_map([cd], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u32))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Reassemble the full record stored for a CD. Used both by the
    /// importer's collision triage and by `cddb read`.
    pub fn disc_record(&self, cd: i64, discid: u32) -> Result<Option<DiscRecord>> {
        let Some(fields) = self.cd_fields(cd)? else {
            return Ok(None);
        };
        let genre = self.genre_name(fields.genre)?;
        let mut songs = Vec::new();
        let mut frames = Vec::new();
        for (song, frame) in self.tracks(cd)? {
            songs.push(song);
            frames.push(frame);
        }
        Ok(Some(DiscRecord::from_parts(
            discid,
            fields.artist,
            fields.title,
            fields.year,
            genre,
            songs,
            frames,
            fields.revision,
            fields.seconds,
        )))
    }

    pub fn cd_count(&self) -> Result<i64> {
        let mut stmt = self.conn.prepare_cached("SELECT COUNT(*) FROM CD")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }
}

// Fingerprint and hash indexes
impl Catalog {
    pub fn namehash_cd(&self, hash: u32) -> Result<Option<i64>> {
        self.first_id("SELECT cd FROM NAMEHASH WHERE hash = ?1", hash)
    }

    pub fn insert_namehash(&self, hash: u32, cd: i64) -> Result<()> {
        self.conn
            .prepare_cached("INSERT INTO NAMEHASH (hash, cd) VALUES (?1, ?2)")?
            .execute(params![i64::from(hash), cd])?;
        Ok(())
    }

    pub fn delete_namehash(&self, hash: u32) -> Result<()> {
        self.conn
            .prepare_cached("DELETE FROM NAMEHASH WHERE hash = ?1")?
            .execute([i64::from(hash)])?;
        Ok(())
    }

    /// First CD linked to a disc id, if any.
    pub fn first_cd_for_discid(&self, discid: u32) -> Result<Option<i64>> {
        self.first_id("SELECT cd FROM DISCID WHERE discid = ?1", discid)
    }

    pub fn cds_for_discid(&self, discid: u32) -> Result<Vec<i64>> {
        self.all_ids("SELECT cd FROM DISCID WHERE discid = ?1", discid)
    }

    pub fn cds_for_fuzzyid(&self, fuzzyid: u32) -> Result<Vec<i64>> {
        self.all_ids("SELECT cd FROM FUZZYID WHERE fuzzyid = ?1", fuzzyid)
    }

    pub fn insert_discid(&self, discid: u32, cd: i64) -> Result<()> {
        self.conn
            .prepare_cached("INSERT INTO DISCID (discid, cd) VALUES (?1, ?2)")?
            .execute(params![i64::from(discid), cd])?;
        Ok(())
    }

    pub fn insert_fuzzyid(&self, fuzzyid: u32, cd: i64) -> Result<()> {
        self.conn
            .prepare_cached("INSERT INTO FUZZYID (fuzzyid, cd) VALUES (?1, ?2)")?
            .execute(params![i64::from(fuzzyid), cd])?;
        Ok(())
    }

    fn first_id(&self, sql: &str, key: u32) -> Result<Option<i64>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let mut rows = stmt.query([i64::from(key)])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn all_ids(&self, sql: &str, key: u32) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map([i64::from(key)], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

// Error log and bulk-import controls
impl Catalog {
    pub fn log_error(&self, reason: &str, extended: &str, file: &[u8]) -> Result<()> {
        self.conn
            .prepare_cached("INSERT INTO ERRORS (reason, extended, file) VALUES (?1, ?2, ?3)")?
            .execute(params![reason, extended, String::from_utf8_lossy(file)])?;
        Ok(())
    }

    /// Switch to bulk-import mode and open the import transaction.
    pub fn begin_bulk(&self) -> Result<()> {
        self.conn.pragma_update(None, "synchronous", "OFF")?;
        self.conn.pragma_update(None, "journal_mode", "MEMORY")?;
        self.conn.pragma_update(None, "temp_store", "MEMORY")?;
        self.conn.execute_batch("BEGIN TRANSACTION;")?;
        Ok(())
    }

    pub fn commit_bulk(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    pub fn drop_fuzzy_index(&self) -> Result<()> {
        self.conn.execute_batch("DROP INDEX fuzzyid_id_idx;")?;
        Ok(())
    }

    pub fn create_fuzzy_index(&self) -> Result<()> {
        self.conn
            .execute_batch("CREATE INDEX fuzzyid_id_idx ON FUZZYID (fuzzyid);")?;
        Ok(())
    }
}
