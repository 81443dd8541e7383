use chrono::Utc;
use rand::RngCore;
use rusqlite::{Connection, OptionalExtension, params};

use super::sqlite::{format_datetime, parse_datetime};
use crate::error::{Error, Result};
use crate::types::{AncestryRow, Bookmark, File};

/// Change-name alphabet: 32 characters chosen to avoid digit-confusable
/// glyphs. Part of the wire contract; clients reference changes by prefix.
const CHANGE_NAME_ALPHABET: &[u8; 32] = b"abcdefhkmnprwxyACDEFHJKLMNPRXY34";
const CHANGE_NAME_BYTES: usize = 10;
const CHANGE_NAME_ATTEMPTS: usize = 16;

pub fn create_repo(conn: &Connection, name: &str) -> Result<i32> {
    let id = conn.query_row(
        "INSERT INTO repositories (name) VALUES (?1) RETURNING id",
        params![name],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn get_repo_by_name(conn: &Connection, name: &str) -> Result<i32> {
    conn.query_row(
        "SELECT id FROM repositories WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(Error::NotFound)
}

/// Encodes with the change-name alphabet, MSB first, no padding. Ten input
/// bytes are exactly sixteen 5-bit groups.
fn base32_encode(src: &[u8]) -> String {
    let mut out = String::with_capacity(src.len() * 8 / 5 + 1);
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;
    for &byte in src {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            let index = (buffer >> (bits - 5)) & 0x1F;
            out.push(CHANGE_NAME_ALPHABET[index as usize] as char);
            bits -= 5;
        }
    }
    if bits > 0 {
        let index = (buffer << (5 - bits)) & 0x1F;
        out.push(CHANGE_NAME_ALPHABET[index as usize] as char);
    }
    out
}

/// Draws random names until one is free; gives up after a fixed number of
/// collisions.
pub fn generate_change_name(conn: &Connection, repo_id: i32) -> Result<String> {
    for _ in 0..CHANGE_NAME_ATTEMPTS {
        let mut src = [0u8; CHANGE_NAME_BYTES];
        rand::thread_rng().fill_bytes(&mut src);
        let name = base32_encode(&src);
        match find_change_exact(conn, repo_id, &name) {
            Ok(_) => {
                tracing::debug!("change name {} is taken", name);
                continue;
            }
            Err(Error::NotFound) => return Ok(name),
            Err(e) => return Err(e),
        }
    }
    Err(Error::ChangeNameExhausted)
}

pub fn create_change(
    conn: &Connection,
    repo_id: i32,
    name: &str,
    description: Option<&str>,
    author: &str,
    device: &str,
    depth: i64,
) -> Result<i64> {
    let now = format_datetime(&Utc::now());
    let id = conn.query_row(
        "INSERT INTO changes (repository_id, name, description, author, device, depth, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7) RETURNING id",
        params![repo_id, name, description, author, device, depth, now],
        |row| row.get(0),
    )?;
    // Root row; replaced by the first set_change_parent.
    conn.execute(
        "INSERT INTO change_relations (change_id, parent_id) VALUES (?1, NULL)",
        params![id],
    )?;
    Ok(id)
}

pub fn find_change_exact(conn: &Connection, repo_id: i32, name: &str) -> Result<i64> {
    conn.query_row(
        "SELECT id FROM changes WHERE repository_id = ?1 AND name = ?2",
        params![repo_id, name],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(Error::NotFound)
}

/// Resolves a search term to a change: an exact bookmark name wins,
/// otherwise a case-sensitive unique prefix of a change name. SQLite `LIKE`
/// case-folds ASCII, so prefixes compare via `substr`.
pub fn find_change(conn: &Connection, repo_id: i32, search: &str) -> Result<i64> {
    if let Some(bookmark) = get_bookmark(conn, repo_id, search)? {
        return Ok(bookmark.change_id);
    }

    let mut stmt = conn.prepare(
        "SELECT id FROM changes
         WHERE repository_id = ?1 AND substr(name, 1, ?2) = ?3
         LIMIT 2",
    )?;
    let ids: Vec<i64> = stmt
        .query_map(params![repo_id, search.len() as i64, search], |row| {
            row.get(0)
        })?
        .collect::<std::result::Result<_, _>>()?;

    match ids.as_slice() {
        [] => Err(Error::NotFound),
        [id] => Ok(*id),
        _ => Err(Error::AmbiguousPrefix(search.to_owned())),
    }
}

pub fn get_change_name(conn: &Connection, change_id: i64, repo_id: i32) -> Result<String> {
    conn.query_row(
        "SELECT name FROM changes WHERE id = ?1 AND repository_id = ?2",
        params![change_id, repo_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(Error::NotFound)
}

/// Shortest prefix of the change's name that is unique within the repo.
pub fn get_change_prefix(conn: &Connection, change_id: i64, repo_id: i32) -> Result<String> {
    let name = get_change_name(conn, change_id, repo_id)?;
    let mut stmt = conn.prepare(
        "SELECT count(*) FROM changes
         WHERE repository_id = ?1 AND substr(name, 1, ?2) = ?3",
    )?;
    for len in 1..name.len() {
        let prefix = &name[..len];
        let count: i64 = stmt.query_row(params![repo_id, len as i64, prefix], |row| row.get(0))?;
        if count == 1 {
            return Ok(prefix.to_owned());
        }
    }
    Ok(name)
}

pub fn get_change_depth(conn: &Connection, change_id: i64, repo_id: i32) -> Result<i64> {
    conn.query_row(
        "SELECT depth FROM changes WHERE id = ?1 AND repository_id = ?2",
        params![change_id, repo_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(Error::NotFound)
}

pub fn set_change_depth(conn: &Connection, change_id: i64, depth: i64) -> Result<()> {
    conn.execute(
        "UPDATE changes SET depth = ?1 WHERE id = ?2",
        params![depth, change_id],
    )?;
    Ok(())
}

pub fn get_change_description(conn: &Connection, change_id: i64) -> Result<Option<String>> {
    conn.query_row(
        "SELECT description FROM changes WHERE id = ?1",
        params![change_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(Error::NotFound)
}

/// Updating a description re-records who described the change.
pub fn set_change_description(
    conn: &Connection,
    change_id: i64,
    description: Option<&str>,
    author: &str,
    device: &str,
) -> Result<()> {
    let now = format_datetime(&Utc::now());
    let rows = conn.execute(
        "UPDATE changes SET description = ?1, author = ?2, device = ?3, updated_at = ?4 WHERE id = ?5",
        params![description, author, device, now, change_id],
    )?;
    if rows == 0 {
        return Err(Error::NotFound);
    }
    Ok(())
}

pub fn touch_change(conn: &Connection, change_id: i64) -> Result<()> {
    let now = format_datetime(&Utc::now());
    conn.execute(
        "UPDATE changes SET updated_at = ?1 WHERE id = ?2",
        params![now, change_id],
    )?;
    Ok(())
}

pub fn has_change_child(conn: &Connection, change_id: i64) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM change_relations WHERE parent_id = ?1)",
        params![change_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub fn get_change_owner(conn: &Connection, change_id: i64) -> Result<(String, String)> {
    conn.query_row(
        "SELECT author, device FROM changes WHERE id = ?1",
        params![change_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()?
    .ok_or(Error::NotFound)
}

/// Records a parent edge. The NULL root row a change is created with is
/// consumed first, so a change ends up with one row per parent.
pub fn set_change_parent(conn: &Connection, change_id: i64, parent_id: Option<i64>) -> Result<()> {
    match parent_id {
        Some(parent) => {
            let updated = conn.execute(
                "UPDATE change_relations SET parent_id = ?1
                 WHERE change_id = ?2 AND parent_id IS NULL",
                params![parent, change_id],
            )?;
            if updated == 0 {
                conn.execute(
                    "INSERT INTO change_relations (change_id, parent_id) VALUES (?1, ?2)",
                    params![change_id, parent],
                )?;
            }
        }
        None => {
            conn.execute(
                "DELETE FROM change_relations WHERE change_id = ?1",
                params![change_id],
            )?;
            conn.execute(
                "INSERT INTO change_relations (change_id, parent_id) VALUES (?1, NULL)",
                params![change_id],
            )?;
        }
    }
    Ok(())
}

/// Walks the parent relation from `head`, returning one row per
/// (change, parent-edge). Children precede their parents: depth strictly
/// decreases along parent edges, and rows come back deepest first. Row
/// count is capped at `limit`.
pub fn get_ancestry_of_change(
    conn: &Connection,
    head: i64,
    limit: i64,
    repo_id: i32,
) -> Result<Vec<AncestryRow>> {
    let mut stmt = conn.prepare(
        "WITH RECURSIVE ancestry(id) AS (
             SELECT ?1
             UNION
             SELECT cr.parent_id FROM change_relations cr
             JOIN ancestry a ON cr.change_id = a.id
             WHERE cr.parent_id IS NOT NULL
         )
         SELECT c.id, cr.parent_id, c.name, c.description, c.author, c.device,
                c.depth, c.created_at, c.updated_at
         FROM changes c
         JOIN ancestry a ON a.id = c.id
         LEFT JOIN change_relations cr ON cr.change_id = c.id
         WHERE c.repository_id = ?2
         ORDER BY c.depth DESC, c.id DESC
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![head, repo_id, limit], |row| {
        Ok(AncestryRow {
            id: row.get(0)?,
            parent_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            author: row.get(4)?,
            device: row.get(5)?,
            depth: row.get(6)?,
            created_at: parse_datetime(&row.get::<_, String>(7)?),
            updated_at: parse_datetime(&row.get::<_, String>(8)?),
        })
    })?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

/// Removes all file rows from a change; push repopulates afterwards.
pub fn clear_change(conn: &Connection, change_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM change_files WHERE change_id = ?1",
        params![change_id],
    )?;
    Ok(())
}

pub fn add_file_to_change(conn: &Connection, change_id: i64, file_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO change_files (change_id, file_id) VALUES (?1, ?2)",
        params![change_id, file_id],
    )?;
    Ok(())
}

pub fn copy_file_list(conn: &Connection, dst_change_id: i64, src_change_id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO change_files (change_id, file_id)
         SELECT ?1, file_id FROM change_files WHERE change_id = ?2",
        params![dst_change_id, src_change_id],
    )?;
    Ok(())
}

pub fn list_change_files(conn: &Connection, change_id: i64) -> Result<Vec<File>> {
    let mut stmt = conn.prepare(
        "SELECT f.id, f.name, f.executable, f.content_hash, f.conflict
         FROM files f
         JOIN change_files cf ON cf.file_id = f.id
         WHERE cf.change_id = ?1
         ORDER BY f.name",
    )?;
    let rows = stmt.query_map(params![change_id], |row| {
        Ok(File {
            id: row.get(0)?,
            name: row.get(1)?,
            executable: row.get(2)?,
            content_hash: row.get(3)?,
            conflict: row.get(4)?,
        })
    })?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

/// Deduplicates file rows by (name, executable, content_hash, conflict).
/// When the caller does not know the executable bit, any matching row is
/// acceptable and new rows infer it from the file name.
pub fn upsert_file(
    conn: &Connection,
    name: &str,
    executable: Option<bool>,
    content_hash: &[u8],
    conflict: bool,
) -> Result<i64> {
    let existing: Option<i64> = match executable {
        Some(exec) => conn
            .query_row(
                "SELECT id FROM files
                 WHERE name = ?1 AND executable = ?2 AND content_hash = ?3 AND conflict = ?4",
                params![name, exec, content_hash, conflict],
                |row| row.get(0),
            )
            .optional()?,
        None => conn
            .query_row(
                "SELECT id FROM files
                 WHERE name = ?1 AND content_hash = ?2 AND conflict = ?3",
                params![name, content_hash, conflict],
                |row| row.get(0),
            )
            .optional()?,
    };

    if let Some(id) = existing {
        return Ok(id);
    }

    let exec = executable.unwrap_or_else(|| name.ends_with(".sh"));
    let id = conn.query_row(
        "INSERT INTO files (name, executable, content_hash, conflict)
         VALUES (?1, ?2, ?3, ?4) RETURNING id",
        params![name, exec, content_hash, conflict],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn check_if_changes_same_file_count(conn: &Connection, a: i64, b: i64) -> Result<bool> {
    let count = |id: i64| -> Result<i64> {
        Ok(conn.query_row(
            "SELECT count(*) FROM change_files WHERE change_id = ?1",
            params![id],
            |row| row.get(0),
        )?)
    };
    Ok(count(a)? == count(b)?)
}

pub fn has_change_conflicts(conn: &Connection, change_id: i64) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM files f
             JOIN change_files cf ON cf.file_id = f.id
             WHERE cf.change_id = ?1 AND f.conflict
         )",
        params![change_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub fn get_change_conflicts(conn: &Connection, change_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT f.name FROM files f
         JOIN change_files cf ON cf.file_id = f.id
         WHERE cf.change_id = ?1 AND f.conflict
         ORDER BY f.name",
    )?;
    let rows = stmt.query_map(params![change_id], |row| row.get(0))?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

pub fn set_bookmark(conn: &Connection, repo_id: i32, name: &str, change_id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO bookmarks (repository_id, name, change_id) VALUES (?1, ?2, ?3)
         ON CONFLICT(repository_id, name) DO UPDATE SET change_id = excluded.change_id",
        params![repo_id, name, change_id],
    )?;
    Ok(())
}

pub fn get_all_bookmarks(conn: &Connection, repo_id: i32) -> Result<Vec<Bookmark>> {
    let mut stmt = conn.prepare(
        "SELECT id, repository_id, name, change_id FROM bookmarks
         WHERE repository_id = ?1 ORDER BY name",
    )?;
    let rows = stmt.query_map(params![repo_id], |row| {
        Ok(Bookmark {
            id: row.get(0)?,
            repository_id: row.get(1)?,
            name: row.get(2)?,
            change_id: row.get(3)?,
        })
    })?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

pub fn get_bookmark(conn: &Connection, repo_id: i32, name: &str) -> Result<Option<Bookmark>> {
    conn.query_row(
        "SELECT id, repository_id, name, change_id FROM bookmarks
         WHERE repository_id = ?1 AND name = ?2",
        params![repo_id, name],
        |row| {
            Ok(Bookmark {
                id: row.get(0)?,
                repository_id: row.get(1)?,
                name: row.get(2)?,
                change_id: row.get(3)?,
            })
        },
    )
    .optional()
    .map_err(Error::from)
}
