use std::collections::{HashMap, HashSet};

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use memlane_types::models::{Memory, MemoryImage, upload_url};

use crate::models::{ImageRow, MemoryRow};
use crate::{Database, StoreError, StoreResult};

/// Editable fields of a memory. Validated by the caller.
///
/// `timestamp` is stored and returned verbatim; `sort_key` is its UTC
/// instant in a fixed-width form, so text order is chronological order.
#[derive(Debug, Clone)]
pub struct MemoryFields {
    pub title: String,
    pub description: String,
    pub timestamp: String,
    pub sort_key: String,
}

/// An image to attach, keyed by its stored filename.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub filename: String,
    pub original_name: Option<String>,
}

/// Timeline direction. Ties on timestamp always keep insertion order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

impl SortOrder {
    fn sql(self) -> &'static str {
        match self {
            SortOrder::NewestFirst => "DESC",
            SortOrder::OldestFirst => "ASC",
        }
    }
}

/// A memory row together with its images, in insertion order.
#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub memory: MemoryRow,
    pub images: Vec<ImageRow>,
}

impl From<MemoryRecord> for Memory {
    fn from(rec: MemoryRecord) -> Self {
        Memory {
            id: rec.memory.id,
            title: rec.memory.title,
            description: rec.memory.description,
            timestamp: rec.memory.timestamp,
            images: rec
                .images
                .into_iter()
                .map(|img| MemoryImage {
                    id: img.id,
                    url: upload_url(&img.filename),
                    original_name: img.original_name,
                })
                .collect(),
        }
    }
}

/// Outcome of an image-set reconciliation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImageChanges {
    /// Filenames newly attached to the memory.
    pub added: Vec<String>,
    /// Filenames detached from the memory.
    pub removed: Vec<String>,
    /// Subset of `removed` no longer referenced by any image row; their
    /// files may be deleted once the transaction has committed.
    pub orphaned: Vec<String>,
}

impl Database {
    // -- Memories --

    pub fn list_memories(&self, owner_id: i64, order: SortOrder) -> StoreResult<Vec<MemoryRecord>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT id, user_id, title, description, timestamp, created_at
                 FROM memories
                 WHERE user_id = ?1
                 ORDER BY sort_key {}, id ASC",
                order.sql()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([owner_id], map_memory)?
                .collect::<Result<Vec<_>, _>>()?;

            // One query for every image of the owner, grouped in memory
            let mut stmt = conn.prepare(
                "SELECT mi.id, mi.memory_id, mi.filename, mi.original_name, mi.created_at
                 FROM memory_images mi
                 JOIN memories m ON m.id = mi.memory_id
                 WHERE m.user_id = ?1
                 ORDER BY mi.id",
            )?;
            let mut images: HashMap<i64, Vec<ImageRow>> = HashMap::new();
            for img in stmt.query_map([owner_id], map_image)? {
                let img = img?;
                images.entry(img.memory_id).or_default().push(img);
            }

            Ok(rows
                .into_iter()
                .map(|memory| {
                    let images = images.remove(&memory.id).unwrap_or_default();
                    MemoryRecord { memory, images }
                })
                .collect())
        })
    }

    /// Fetch one memory. Memories owned by someone else are reported as
    /// [`StoreError::NotFound`].
    pub fn get_memory(&self, owner_id: i64, memory_id: i64) -> StoreResult<MemoryRecord> {
        self.with_conn(|conn| {
            let memory = query_owned_memory(conn, owner_id, memory_id)?;
            let images = query_images(conn, memory_id)?;
            Ok(MemoryRecord { memory, images })
        })
    }

    /// Insert a memory and its images in one transaction and return the new
    /// id. `file_exists` is consulted for every image before anything is
    /// written; a missing file aborts with [`StoreError::MissingImage`].
    pub fn create_memory<F>(
        &self,
        owner_id: i64,
        fields: &MemoryFields,
        images: &[NewImage],
        file_exists: F,
    ) -> StoreResult<i64>
    where
        F: Fn(&str) -> bool,
    {
        let images = dedupe(images);

        self.with_tx(|tx| {
            // Checked under the lock so a concurrent release cannot remove
            // the file between the check and the commit
            if let Some(missing) = images.iter().find(|img| !file_exists(&img.filename)) {
                return Err(StoreError::MissingImage(missing.filename.clone()));
            }

            tx.execute(
                "INSERT INTO memories (user_id, title, description, timestamp, sort_key)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    owner_id,
                    fields.title,
                    fields.description,
                    fields.timestamp,
                    fields.sort_key
                ],
            )?;
            let memory_id = tx.last_insert_rowid();

            for img in &images {
                insert_image(tx, memory_id, img)?;
            }

            info!(
                "Created memory {} for user {} with {} image(s)",
                memory_id,
                owner_id,
                images.len()
            );
            Ok(memory_id)
        })
    }

    /// Update a memory's fields and reconcile its image set with `images`,
    /// all in one transaction.
    ///
    /// Existing images whose filename is not in `images` are deleted, new
    /// filenames are inserted, and images present on both sides keep their
    /// row untouched. Only newly attached filenames are checked with
    /// `file_exists`.
    pub fn update_memory<F>(
        &self,
        owner_id: i64,
        memory_id: i64,
        fields: &MemoryFields,
        images: &[NewImage],
        file_exists: F,
    ) -> StoreResult<ImageChanges>
    where
        F: Fn(&str) -> bool,
    {
        let desired = dedupe(images);

        self.with_tx(|tx| {
            query_owned_memory(tx, owner_id, memory_id)?;

            tx.execute(
                "UPDATE memories SET title = ?1, description = ?2, timestamp = ?3, sort_key = ?4
                 WHERE id = ?5",
                rusqlite::params![
                    fields.title,
                    fields.description,
                    fields.timestamp,
                    fields.sort_key,
                    memory_id
                ],
            )?;

            let existing = query_images(tx, memory_id)?;
            let existing_names: HashSet<&str> =
                existing.iter().map(|img| img.filename.as_str()).collect();
            let desired_names: HashSet<&str> =
                desired.iter().map(|img| img.filename.as_str()).collect();

            let mut changes = ImageChanges::default();

            for img in existing.iter().filter(|img| !desired_names.contains(img.filename.as_str())) {
                tx.execute("DELETE FROM memory_images WHERE id = ?1", [img.id])?;
                changes.removed.push(img.filename.clone());
            }

            for img in desired.iter().filter(|img| !existing_names.contains(img.filename.as_str())) {
                if !file_exists(&img.filename) {
                    return Err(StoreError::MissingImage(img.filename.clone()));
                }
                insert_image(tx, memory_id, img)?;
                changes.added.push(img.filename.clone());
            }

            changes.orphaned = unreferenced(tx, &changes.removed)?;

            info!(
                "Updated memory {}: +{} -{} image(s)",
                memory_id,
                changes.added.len(),
                changes.removed.len()
            );
            Ok(changes)
        })
    }

    /// Delete a memory and its image rows in one transaction. Returns the
    /// filenames no longer referenced by any image row.
    pub fn delete_memory(&self, owner_id: i64, memory_id: i64) -> StoreResult<Vec<String>> {
        self.with_tx(|tx| {
            query_owned_memory(tx, owner_id, memory_id)?;

            let filenames: Vec<String> = query_images(tx, memory_id)?
                .into_iter()
                .map(|img| img.filename)
                .collect();

            tx.execute("DELETE FROM memory_images WHERE memory_id = ?1", [memory_id])?;
            tx.execute("DELETE FROM memories WHERE id = ?1", [memory_id])?;

            let orphaned = unreferenced(tx, &filenames)?;
            info!("Deleted memory {} of user {}", memory_id, owner_id);
            Ok(orphaned)
        })
    }

    /// Call `remove_file` for every name in `candidates` that no image row
    /// references, and return those names.
    ///
    /// References are re-checked while holding the connection lock, and
    /// writers check file existence under the same lock, so a file can
    /// never be removed after a row referencing it has committed.
    pub fn release_files<F>(&self, candidates: &[String], mut remove_file: F) -> StoreResult<Vec<String>>
    where
        F: FnMut(&str),
    {
        self.with_conn(|conn| {
            let released = unreferenced(conn, candidates)?;
            for name in &released {
                remove_file(name);
            }
            Ok(released)
        })
    }
}

fn query_owned_memory(conn: &Connection, owner_id: i64, memory_id: i64) -> StoreResult<MemoryRow> {
    conn.query_row(
        "SELECT id, user_id, title, description, timestamp, created_at
         FROM memories WHERE id = ?1 AND user_id = ?2",
        [memory_id, owner_id],
        map_memory,
    )
    .optional()?
    .ok_or(StoreError::NotFound)
}

fn query_images(conn: &Connection, memory_id: i64) -> StoreResult<Vec<ImageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, memory_id, filename, original_name, created_at
         FROM memory_images WHERE memory_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([memory_id], map_image)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn insert_image(conn: &Connection, memory_id: i64, img: &NewImage) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO memory_images (memory_id, filename, original_name) VALUES (?1, ?2, ?3)",
        rusqlite::params![memory_id, img.filename, img.original_name],
    )?;
    Ok(())
}

fn unreferenced(conn: &Connection, filenames: &[String]) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT COUNT(*) FROM memory_images WHERE filename = ?1")?;
    let mut out = Vec::new();
    for name in filenames {
        let refs: i64 = stmt.query_row([name], |r| r.get(0))?;
        if refs == 0 {
            out.push(name.clone());
        } else {
            debug!("File {} still referenced by {} image(s)", name, refs);
        }
    }
    Ok(out)
}

/// Drop repeated filenames, keeping the first occurrence.
fn dedupe(images: &[NewImage]) -> Vec<&NewImage> {
    let mut seen = HashSet::new();
    images
        .iter()
        .filter(|img| seen.insert(img.filename.as_str()))
        .collect()
}

fn map_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRow> {
    Ok(MemoryRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        timestamp: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_image(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImageRow> {
    Ok(ImageRow {
        id: row.get(0)?,
        memory_id: row.get(1)?,
        filename: row.get(2)?,
        original_name: row.get(3)?,
        created_at: row.get(4)?,
    })
}
