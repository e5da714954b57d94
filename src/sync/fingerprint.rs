//! `SQLite` fingerprint store.
//!
//! One row per tracked artifact per side, keyed by `(side, artifact_id)`.
//! Rows are created on first sync and refreshed at the end of each cycle
//! that touches the artifact. Nothing here deletes rows.
//!
//! Each row may name its partner artifact on the other side. The link lets
//! the detector notice that a previously synced partner has disappeared.

use crate::error::Result;
use crate::model::{ArtifactFingerprint, Side};
use crate::util::is_valid_hash;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, params};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Database file name under `.specfact/state/`.
pub const FINGERPRINT_DB: &str = "fingerprints.db";

const SCHEMA_SQL: &str = r"
    CREATE TABLE IF NOT EXISTS fingerprints (
        side TEXT NOT NULL,
        artifact_id TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        logical_version INTEGER NOT NULL DEFAULT 1,
        last_synced_at TEXT NOT NULL,
        partner_id TEXT,
        PRIMARY KEY (side, artifact_id)
    );
    CREATE INDEX IF NOT EXISTS idx_fingerprints_partner ON fingerprints(partner_id);

    CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?)",
        [CURRENT_SCHEMA_VERSION.to_string()],
    )?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    Ok(())
}

/// Stored fingerprints for one artifact pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredPair {
    /// Internal plan side.
    pub local: Option<ArtifactFingerprint>,
    /// External tool side.
    pub remote: Option<ArtifactFingerprint>,
}

/// One fingerprint refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintUpdate {
    pub side: Side,
    pub artifact_id: String,
    pub content_hash: String,
    /// Partner artifact on the other side, if the pair is matched.
    pub partner_id: Option<String>,
}

/// Raw row before validation. Columns are read untyped so a value of the
/// wrong SQLite type is caught by validation instead of failing the query.
struct RawRow {
    side: Value,
    artifact_id: Value,
    content_hash: Value,
    logical_version: Value,
    last_synced_at: Value,
    partner_id: Value,
}

fn text(value: Value) -> Option<String> {
    match value {
        Value::Text(text) => Some(text),
        _ => None,
    }
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            side: row.get(0)?,
            artifact_id: row.get(1)?,
            content_hash: row.get(2)?,
            logical_version: row.get(3)?,
            last_synced_at: row.get(4)?,
            partner_id: row.get(5)?,
        })
    }

    /// Validate a row. Unreadable rows are skipped so the artifact is seen as new.
    fn into_fingerprint(self) -> Option<(ArtifactFingerprint, Option<String>)> {
        let Some(artifact_id) = text(self.artifact_id) else {
            warn!("Skipping fingerprint with non-text artifact id");
            return None;
        };
        let side = match text(self.side).as_deref() {
            Some("internal") => Side::Internal,
            Some("external") => Side::External,
            other => {
                warn!(%artifact_id, side = ?other, "Skipping fingerprint with unknown side");
                return None;
            }
        };
        let Some(content_hash) = text(self.content_hash).filter(|h| is_valid_hash(h)) else {
            warn!(%artifact_id, %side, "Skipping fingerprint with malformed hash");
            return None;
        };
        let Value::Integer(logical_version) = self.logical_version else {
            warn!(%artifact_id, %side, "Skipping fingerprint with malformed version");
            return None;
        };
        let last_synced_at = match text(self.last_synced_at)
            .as_deref()
            .map(DateTime::parse_from_rfc3339)
        {
            Some(Ok(ts)) => ts.with_timezone(&Utc),
            _ => {
                warn!(%artifact_id, %side, "Skipping fingerprint with malformed timestamp");
                return None;
            }
        };
        Some((
            ArtifactFingerprint {
                artifact_id,
                side,
                content_hash,
                logical_version,
                last_synced_at,
            },
            text(self.partner_id),
        ))
    }
}

const SELECT_COLUMNS: &str =
    "SELECT side, artifact_id, content_hash, logical_version, last_synced_at, partner_id FROM fingerprints";

/// Persistent content fingerprints for both sides.
#[derive(Debug)]
pub struct FingerprintStore {
    conn: Connection,
}

impl FingerprintStore {
    /// Default database location inside a repository.
    #[must_use]
    pub fn default_path(repo_root: &Path) -> PathBuf {
        repo_root
            .join(crate::config::SPECFACT_DIR)
            .join("state")
            .join(FINGERPRINT_DB)
    }

    /// Open (or create) the store at `path`.
    ///
    /// A file that is not a usable database is moved aside to `<name>.corrupt`
    /// and a fresh, empty store is created in its place.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the corrupt file
    /// cannot be moved, or the fresh database cannot be initialized.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        match Self::try_open(path) {
            Ok(store) => Ok(store),
            Err(err) if path.exists() => {
                let aside = corrupt_path(path);
                warn!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    error = %err,
                    "Fingerprint store unreadable, starting fresh"
                );
                fs::rename(path, &aside)?;
                for suffix in ["-wal", "-shm"] {
                    let mut sidecar = path.as_os_str().to_owned();
                    sidecar.push(suffix);
                    let _ = fs::remove_file(PathBuf::from(sidecar));
                }
                Self::try_open(path)
            }
            Err(err) => Err(err),
        }
    }

    fn try_open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    fn get_with_partner(
        &self,
        side: Side,
        artifact_id: &str,
    ) -> Result<Option<(ArtifactFingerprint, Option<String>)>> {
        let result = self.conn.query_row(
            &format!("{SELECT_COLUMNS} WHERE side = ? AND artifact_id = ?"),
            params![side.as_str(), artifact_id],
            RawRow::from_row,
        );
        match result {
            Ok(raw) => Ok(raw.into_fingerprint()),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Get the stored fingerprint for one artifact.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get(&self, side: Side, artifact_id: &str) -> Result<Option<ArtifactFingerprint>> {
        Ok(self.get_with_partner(side, artifact_id)?.map(|(fp, _)| fp))
    }

    /// Stored fingerprints for a pair.
    ///
    /// When only one side is currently present its stored partner link is
    /// followed, so a vanished counterpart still shows up as stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn pair(&self, local_id: Option<&str>, remote_id: Option<&str>) -> Result<StoredPair> {
        let local_row = match local_id {
            Some(id) => self.get_with_partner(Side::Internal, id)?,
            None => None,
        };
        let remote_row = match remote_id {
            Some(id) => self.get_with_partner(Side::External, id)?,
            None => None,
        };
        let local_partner = local_row.as_ref().and_then(|(_, p)| p.clone());
        let remote_partner = remote_row.as_ref().and_then(|(_, p)| p.clone());

        let local = match (local_row, local_id, remote_partner) {
            (Some((fp, _)), _, _) => Some(fp),
            (None, None, Some(partner)) => self.get(Side::Internal, &partner)?,
            _ => None,
        };
        let remote = match (remote_row, remote_id, local_partner) {
            (Some((fp, _)), _, _) => Some(fp),
            (None, None, Some(partner)) => self.get(Side::External, &partner)?,
            _ => None,
        };

        Ok(StoredPair { local, remote })
    }

    /// Upsert one fingerprint.
    ///
    /// The logical version starts at 1 and is bumped only when the content
    /// hash actually changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn record(&mut self, update: &FingerprintUpdate, now: DateTime<Utc>) -> Result<()> {
        upsert(&self.conn, update, now)?;
        Ok(())
    }

    /// Upsert many fingerprints in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; no row is written then.
    pub fn record_batch(&mut self, updates: &[FingerprintUpdate], now: DateTime<Utc>) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        for update in updates {
            upsert(&tx, update, now)?;
        }
        tx.commit()?;
        debug!(count = updates.len(), "Fingerprints refreshed");
        Ok(updates.len())
    }

    /// All readable fingerprints, optionally filtered by side.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn list(&self, side: Option<Side>) -> Result<Vec<ArtifactFingerprint>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY side, artifact_id"))?;
        let rows = stmt.query_map([], RawRow::from_row)?;

        let mut out = Vec::new();
        for row in rows {
            if let Some((fp, _)) = row?.into_fingerprint() {
                if side.is_none_or(|s| s == fp.side) {
                    out.push(fp);
                }
            }
        }
        Ok(out)
    }

    /// Stored schema version.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn schema_version(&self) -> Result<Option<i32>> {
        let result = self.conn.query_row(
            "SELECT value FROM metadata WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(value) => Ok(value.parse().ok()),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn upsert(conn: &Connection, update: &FingerprintUpdate, now: DateTime<Utc>) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO fingerprints (side, artifact_id, content_hash, logical_version, last_synced_at, partner_id)
         VALUES (?1, ?2, ?3, 1, ?4, ?5)
         ON CONFLICT(side, artifact_id) DO UPDATE SET
             logical_version = CASE
                 WHEN typeof(fingerprints.logical_version) != 'integer' THEN 1
                 WHEN fingerprints.content_hash = excluded.content_hash THEN fingerprints.logical_version
                 ELSE fingerprints.logical_version + 1
             END,
             content_hash = excluded.content_hash,
             last_synced_at = excluded.last_synced_at,
             partner_id = COALESCE(excluded.partner_id, fingerprints.partner_id)",
        params![
            update.side.as_str(),
            update.artifact_id,
            update.content_hash,
            now.to_rfc3339(),
            update.partner_id,
        ],
    )?;
    Ok(())
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".corrupt");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::content_hash;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn fixed_time(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0)
            .single()
            .expect("valid timestamp")
    }

    fn update(side: Side, id: &str, content: &str, partner: Option<&str>) -> FingerprintUpdate {
        FingerprintUpdate {
            side,
            artifact_id: id.to_string(),
            content_hash: content_hash(content),
            partner_id: partner.map(ToString::to_string),
        }
    }

    #[test]
    fn record_then_get() {
        let mut store = FingerprintStore::open_memory().expect("store");
        assert!(store.get(Side::Internal, "features/FEATURE-AUTH.yaml").expect("get").is_none());

        store
            .record(&update(Side::Internal, "features/FEATURE-AUTH.yaml", "a", None), fixed_time(0))
            .expect("record");
        let fp = store
            .get(Side::Internal, "features/FEATURE-AUTH.yaml")
            .expect("get")
            .expect("present");
        assert_eq!(fp.content_hash, content_hash("a"));
        assert_eq!(fp.logical_version, 1);
        assert_eq!(fp.last_synced_at, fixed_time(0));
        assert!(store.get(Side::External, "features/FEATURE-AUTH.yaml").expect("get").is_none());
    }

    #[test]
    fn version_bumps_only_on_hash_change() {
        let mut store = FingerprintStore::open_memory().expect("store");
        let id = "specs/001_AUTH.md";
        store.record(&update(Side::External, id, "a", None), fixed_time(0)).expect("1");
        store.record(&update(Side::External, id, "a", None), fixed_time(10)).expect("2");
        let fp = store.get(Side::External, id).expect("get").expect("present");
        assert_eq!(fp.logical_version, 1);
        assert_eq!(fp.last_synced_at, fixed_time(10));

        store.record(&update(Side::External, id, "b", None), fixed_time(20)).expect("3");
        let fp = store.get(Side::External, id).expect("get").expect("present");
        assert_eq!(fp.logical_version, 2);
    }

    #[test]
    fn pair_follows_partner_link_for_missing_side() {
        let mut store = FingerprintStore::open_memory().expect("store");
        let local = "features/FEATURE-AUTH.yaml";
        let remote = "specs/001_AUTH.md";
        store
            .record_batch(
                &[
                    update(Side::Internal, local, "a", Some(remote)),
                    update(Side::External, remote, "b", Some(local)),
                ],
                fixed_time(0),
            )
            .expect("batch");

        let both = store.pair(Some(local), Some(remote)).expect("pair");
        assert!(both.local.is_some() && both.remote.is_some());

        let remote_only = store.pair(None, Some(remote)).expect("pair");
        assert_eq!(
            remote_only.local.map(|fp| fp.artifact_id),
            Some(local.to_string())
        );

        let local_only = store.pair(Some(local), None).expect("pair");
        assert_eq!(
            local_only.remote.map(|fp| fp.artifact_id),
            Some(remote.to_string())
        );
    }

    #[test]
    fn corrupt_rows_are_skipped() {
        let store = FingerprintStore::open_memory().expect("store");
        store
            .connection()
            .execute(
                "INSERT INTO fingerprints (side, artifact_id, content_hash, logical_version, last_synced_at)
                 VALUES ('internal', 'bad-hash', 'zzz', 1, ?1),
                        ('internal', 'bad-time', ?2, 1, 'yesterday')",
                params![fixed_time(0).to_rfc3339(), content_hash("x")],
            )
            .expect("insert");

        assert!(store.get(Side::Internal, "bad-hash").expect("get").is_none());
        assert!(store.get(Side::Internal, "bad-time").expect("get").is_none());
        assert!(store.list(None).expect("list").is_empty());
    }

    #[test]
    fn mistyped_columns_read_as_new() {
        let mut store = FingerprintStore::open_memory().expect("store");
        store
            .connection()
            .execute(
                "INSERT INTO fingerprints (side, artifact_id, content_hash, logical_version, last_synced_at, partner_id)
                 VALUES ('internal', 'features/A.yaml', ?1, 'garbage', ?2, NULL),
                        ('external', 'specs/001_a.md', ?1, 1, 42, NULL)",
                params![content_hash("a"), fixed_time(0).to_rfc3339()],
            )
            .expect("insert");

        let pair = store
            .pair(Some("features/A.yaml"), Some("specs/001_a.md"))
            .expect("pair");
        assert!(pair.local.is_none());
        assert!(pair.remote.is_none());
        assert!(store.list(None).expect("list").is_empty());

        store
            .record(&update(Side::Internal, "features/A.yaml", "a", None), fixed_time(1))
            .expect("record over mistyped row");
        let fp = store
            .get(Side::Internal, "features/A.yaml")
            .expect("get")
            .expect("row readable again");
        assert_eq!(fp.content_hash, content_hash("a"));
    }

    #[test]
    fn corrupt_file_is_moved_aside() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("state").join(FINGERPRINT_DB);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, vec![0xAB_u8; 4096]).expect("write");

        let store = FingerprintStore::open(&path).expect("open recovers");
        assert!(store.list(None).expect("list").is_empty());
        assert!(corrupt_path(&path).exists());
        assert_eq!(store.schema_version().expect("version"), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn store_persists_across_reopen() {
        let temp = TempDir::new().expect("tempdir");
        let path = FingerprintStore::default_path(temp.path());
        {
            let mut store = FingerprintStore::open(&path).expect("open");
            store
                .record(&update(Side::Internal, "memory/constitution.md", "rules", None), fixed_time(0))
                .expect("record");
        }
        let store = FingerprintStore::open(&path).expect("reopen");
        assert_eq!(store.list(Some(Side::Internal)).expect("list").len(), 1);
        assert!(store.list(Some(Side::External)).expect("list").is_empty());
    }
}
