use rusqlite::{params, params_from_iter, Connection, ErrorCode, Result as SqlResult};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::DATABASE_FILE;
use crate::error::{Error, Result};
use crate::state::data::AssetRecord;

/// Search terms that switch matching from union to require-all
const AND_MARKERS: &[&str] = &["and", "&"];

/// Tag-cloud queries look at this many result assets at most
const TAG_CLOUD_ASSET_CAP: usize = 20;

/// Lookup key for [`TagIndex::find_asset`]; exactly one way to identify
/// an asset, by construction.
#[derive(Debug, Clone, Copy)]
pub enum AssetKey<'a> {
    Id(i64),
    Name(&'a str),
    Path(&'a Path),
}

/// Partial update for [`TagIndex::edit_asset`]; only `Some` fields are
/// written. Supplying `tags` replaces the full tag set.
#[derive(Debug, Clone, Default)]
pub struct AssetUpdate {
    pub name: Option<String>,
    pub path: Option<PathBuf>,
    /// `Some(None)` clears the stored icon
    pub icon: Option<Option<PathBuf>>,
    pub tags: Option<Vec<String>>,
}

/// The TagIndex manages the SQLite database that makes assets searchable.
/// It stores one row per asset and one row per (tag, asset) pair.
///
/// Everything here is parameterized; user-supplied names and tags never
/// end up inside query text.
pub struct TagIndex {
    conn: Connection,
    db_path: PathBuf,
}

impl TagIndex {
    /// Open or create the index database under the library root
    pub fn open(library_root: &Path) -> Result<Self> {
        let db_path = library_root.join(DATABASE_FILE);
        let conn = Connection::open(&db_path)?;
        let mut index = TagIndex { conn, db_path };
        index.init_schema()?;
        debug!(path = %index.db_path.display(), "asset index opened");
        Ok(index)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut index = TagIndex {
            conn,
            db_path: PathBuf::from(":memory:"),
        };
        index.init_schema()?;
        Ok(index)
    }

    /// Create tables and indexes if they don't exist
    fn init_schema(&mut self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS asset (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                name    TEXT NOT NULL UNIQUE,
                path    TEXT NOT NULL,
                icon    TEXT NOT NULL DEFAULT ''
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS tag (
                id       INTEGER PRIMARY KEY AUTOINCREMENT,
                name     TEXT NOT NULL,
                asset_id INTEGER NOT NULL,
                FOREIGN KEY(asset_id) REFERENCES asset(id) ON DELETE CASCADE
            )",
            [],
        )?;

        self.conn
            .execute("CREATE INDEX IF NOT EXISTS idx_asset_name ON asset(name)", [])?;
        self.conn
            .execute("CREATE INDEX IF NOT EXISTS idx_asset_path ON asset(path)", [])?;
        self.conn
            .execute("CREATE INDEX IF NOT EXISTS idx_tag_name ON tag(name)", [])?;
        self.conn
            .execute("CREATE INDEX IF NOT EXISTS idx_tag_asset_id ON tag(asset_id)", [])?;

        Ok(())
    }

    /// Path of the database file
    pub fn path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Number of assets in the index
    pub fn asset_count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM asset", [], |row| row.get(0))?;
        Ok(count)
    }

    fn record_from_row(row: &rusqlite::Row<'_>) -> SqlResult<AssetRecord> {
        let icon: String = row.get(3)?;
        Ok(AssetRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            path: PathBuf::from(row.get::<_, String>(2)?),
            icon: if icon.is_empty() {
                None
            } else {
                Some(PathBuf::from(icon))
            },
        })
    }

    /// Look one asset up by id, name or path
    pub fn find_asset(&self, key: AssetKey<'_>) -> Result<Option<AssetRecord>> {
        let result = match key {
            AssetKey::Id(id) => self.conn.query_row(
                "SELECT id, name, path, icon FROM asset WHERE id = ?1",
                params![id],
                Self::record_from_row,
            ),
            AssetKey::Name(name) => self.conn.query_row(
                "SELECT id, name, path, icon FROM asset WHERE name = ?1",
                params![name],
                Self::record_from_row,
            ),
            AssetKey::Path(path) => {
                let text = path.to_string_lossy();
                self.conn.query_row(
                    "SELECT id, name, path, icon FROM asset WHERE path = ?1",
                    params![text.as_ref()],
                    Self::record_from_row,
                )
            }
        };

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Insert a new asset with its tags; returns the generated id.
    /// A name collision maps to [`Error::DuplicateName`].
    pub fn add_asset(
        &mut self,
        name: &str,
        path: &Path,
        icon: Option<&Path>,
        tags: &[String],
    ) -> Result<i64> {
        let tx = self.conn.transaction()?;
        let path_text = path.to_string_lossy();
        let icon_text = icon
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        match tx.execute(
            "INSERT INTO asset (name, path, icon) VALUES (?1, ?2, ?3)",
            params![name, path_text.as_ref(), icon_text],
        ) {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                return Err(Error::DuplicateName {
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        let id = tx.last_insert_rowid();
        for tag in tags {
            tx.execute(
                "INSERT INTO tag (name, asset_id) VALUES (?1, ?2)",
                params![tag, id],
            )?;
        }
        tx.commit()?;

        debug!(name, id, "asset row inserted");
        Ok(id)
    }

    /// Apply a partial update to one asset inside a single transaction.
    /// A missing id is logged and ignored; callers validate existence first.
    pub fn edit_asset(&mut self, id: i64, update: AssetUpdate) -> Result<()> {
        let tx = self.conn.transaction()?;

        let exists: i64 = tx.query_row(
            "SELECT COUNT(*) FROM asset WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        if exists == 0 {
            warn!(id, "edit requested for an asset id not in the index");
            return Ok(());
        }

        if let Some(name) = &update.name {
            match tx.execute(
                "UPDATE asset SET name = ?1 WHERE id = ?2",
                params![name, id],
            ) {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    return Err(Error::DuplicateName { name: name.clone() });
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(path) = &update.path {
            let text = path.to_string_lossy();
            tx.execute(
                "UPDATE asset SET path = ?1 WHERE id = ?2",
                params![text.as_ref(), id],
            )?;
        }

        if let Some(icon) = &update.icon {
            let text = icon
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            tx.execute(
                "UPDATE asset SET icon = ?1 WHERE id = ?2",
                params![text, id],
            )?;
        }

        if let Some(tags) = &update.tags {
            tx.execute("DELETE FROM tag WHERE asset_id = ?1", params![id])?;
            for tag in tags {
                tx.execute(
                    "INSERT INTO tag (name, asset_id) VALUES (?1, ?2)",
                    params![tag, id],
                )?;
            }
        }

        tx.commit()?;
        debug!(id, "asset row updated");
        Ok(())
    }

    /// Remove an asset and all its tag rows.
    /// Returns false when no asset has that name.
    pub fn delete_asset(&mut self, name: &str) -> Result<bool> {
        let tx = self.conn.transaction()?;
        let id: i64 = match tx.query_row(
            "SELECT id FROM asset WHERE name = ?1",
            params![name],
            |row| row.get(0),
        ) {
            Ok(id) => id,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        tx.execute("DELETE FROM tag WHERE asset_id = ?1", params![id])?;
        tx.execute("DELETE FROM asset WHERE id = ?1", params![id])?;
        tx.commit()?;

        debug!(name, id, "asset row and tags removed");
        Ok(true)
    }

    /// Find assets matching a term list.
    ///
    /// Union mode by default: any asset whose name or any of whose tags
    /// equals any term. When the list contains a require-all marker
    /// ("and" or "&", stripped before matching) only assets carrying every
    /// remaining distinct term as a tag are returned. Terms are folded to
    /// lowercase and repeated terms count once.
    pub fn find_assets_by_terms(&self, terms: &[String]) -> Result<Vec<AssetRecord>> {
        let mut require_all = false;
        let mut wanted: Vec<String> = Vec::new();
        for term in terms {
            let folded = term.to_lowercase();
            if AND_MARKERS.contains(&folded.as_str()) {
                require_all = true;
            } else {
                wanted.push(folded);
            }
        }
        // the require-all count assumes distinct terms
        wanted.sort();
        wanted.dedup();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        if require_all {
            self.find_assets_with_all_tags(&wanted)
        } else {
            self.find_assets_union(&wanted)
        }
    }

    fn find_assets_union(&self, terms: &[String]) -> Result<Vec<AssetRecord>> {
        let placeholders = vec!["?"; terms.len()].join(", ");
        let sql = format!(
            "SELECT DISTINCT a.id, a.name, a.path, a.icon
             FROM asset a
             LEFT JOIN tag t ON t.asset_id = a.id
             WHERE a.name COLLATE NOCASE IN ({placeholders})
                OR t.name IN ({placeholders})"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(terms.iter().chain(terms.iter())),
            Self::record_from_row,
        )?;

        let mut assets = Vec::new();
        for record in rows {
            assets.push(record?);
        }
        Ok(assets)
    }

    fn find_assets_with_all_tags(&self, terms: &[String]) -> Result<Vec<AssetRecord>> {
        let placeholders = vec!["?"; terms.len()].join(", ");
        let sql = format!(
            "SELECT a.id, a.name, a.path, a.icon
             FROM asset a
             JOIN tag t ON t.asset_id = a.id
             WHERE t.name IN ({placeholders})
             GROUP BY a.id, a.name, a.path, a.icon
             HAVING COUNT(DISTINCT t.name) = {}",
            terms.len()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(terms.iter()), Self::record_from_row)?;

        let mut assets = Vec::new();
        for record in rows {
            assets.push(record?);
        }
        Ok(assets)
    }

    /// Distinct tags attached to the given assets, capped to the first
    /// twenty ids to bound the tag-cloud computation
    pub fn tags_for_assets(&self, asset_ids: &[i64]) -> Result<Vec<String>> {
        let capped = &asset_ids[..asset_ids.len().min(TAG_CLOUD_ASSET_CAP)];
        if capped.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; capped.len()].join(", ");
        let sql = format!("SELECT DISTINCT name FROM tag WHERE asset_id IN ({placeholders})");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(capped.iter()), |row| {
            row.get::<_, String>(0)
        })?;

        let mut tags = Vec::new();
        for tag in rows {
            tags.push(tag?);
        }
        Ok(tags)
    }

    /// Rewrite the path prefix of every asset under a renamed folder.
    /// Returns the affected (id, new path) pairs.
    pub fn rename_directory(
        &mut self,
        old_prefix: &Path,
        new_prefix: &Path,
    ) -> Result<Vec<(i64, PathBuf)>> {
        let mut old_text = old_prefix.to_string_lossy().into_owned();
        if !old_text.ends_with(std::path::MAIN_SEPARATOR) {
            old_text.push(std::path::MAIN_SEPARATOR);
        }
        let mut new_text = new_prefix.to_string_lossy().into_owned();
        if !new_text.ends_with(std::path::MAIN_SEPARATOR) {
            new_text.push(std::path::MAIN_SEPARATOR);
        }

        let pattern = format!("{}%", escape_like(&old_text));
        let tx = self.conn.transaction()?;
        let mut renamed: Vec<(i64, String)> = Vec::new();
        {
            let mut stmt =
                tx.prepare("SELECT id, path FROM asset WHERE path LIKE ?1 ESCAPE '\\'")?;
            let rows = stmt.query_map(params![pattern], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (id, path) = row?;
                let suffix = &path[old_text.len()..];
                renamed.push((id, format!("{}{}", new_text, suffix)));
            }
        }

        for (id, path) in &renamed {
            tx.execute(
                "UPDATE asset SET path = ?1 WHERE id = ?2",
                params![path, id],
            )?;
        }
        tx.commit()?;

        debug!(count = renamed.len(), "asset paths re-prefixed");
        Ok(renamed
            .into_iter()
            .map(|(id, path)| (id, PathBuf::from(path)))
            .collect())
    }

    /// All assets whose path contains the given folder path
    pub fn assets_in_folder(&self, folder: &Path) -> Result<Vec<AssetRecord>> {
        let text = folder.to_string_lossy();
        let pattern = format!("%{}%", escape_like(&text));
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, path, icon FROM asset WHERE path LIKE ?1 ESCAPE '\\'")?;
        let rows = stmt.query_map(params![pattern], Self::record_from_row)?;

        let mut assets = Vec::new();
        for record in rows {
            assets.push(record?);
        }
        Ok(assets)
    }
}

/// Escape LIKE wildcards in user-controlled pattern fragments
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if ch == '\\' || ch == '%' || ch == '_' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

impl std::fmt::Debug for TagIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagIndex")
            .field("db_path", &self.db_path)
            .finish()
    }
}
