use rusqlite::Connection;

use crate::error::Result;

/// Ordered, named migrations. Applied names are tracked in the `migrations`
/// table; everything not yet recorded runs inside one transaction.
const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_initial",
    r#"
-- Repositories
CREATE TABLE repositories (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

-- Changes: the unit of history. A change is a full snapshot of the file
-- set; depth is 1 + max(parent depths), 0 for the root.
CREATE TABLE changes (
    id INTEGER PRIMARY KEY,
    repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    description TEXT,
    author TEXT NOT NULL,
    device TEXT NOT NULL,
    depth INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    UNIQUE(repository_id, name)
);

-- Parent edges. The root change keeps a single row with parent_id NULL; a
-- merge change has two rows.
CREATE TABLE change_relations (
    change_id INTEGER NOT NULL REFERENCES changes(id) ON DELETE CASCADE,
    parent_id INTEGER REFERENCES changes(id)
);

-- Named mutable pointers into the change DAG.
CREATE TABLE bookmarks (
    id INTEGER PRIMARY KEY,
    repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    change_id INTEGER NOT NULL REFERENCES changes(id),

    UNIQUE(repository_id, name)
);

-- Deduplicated file rows, shared across changes.
CREATE TABLE files (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    executable INTEGER NOT NULL,
    content_hash BLOB NOT NULL,
    conflict INTEGER NOT NULL,

    UNIQUE(name, executable, content_hash, conflict)
);

-- A change's file list is exactly the set of rows here.
CREATE TABLE change_files (
    change_id INTEGER NOT NULL REFERENCES changes(id) ON DELETE CASCADE,
    file_id INTEGER NOT NULL REFERENCES files(id),
    PRIMARY KEY (change_id, file_id)
);

CREATE INDEX idx_changes_repository ON changes(repository_id);
CREATE INDEX idx_change_relations_change ON change_relations(change_id);
CREATE INDEX idx_change_relations_parent ON change_relations(parent_id);
CREATE INDEX idx_bookmarks_repository ON bookmarks(repository_id);
CREATE INDEX idx_change_files_change ON change_files(change_id);
"#,
)];

pub fn apply_migrations(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let tx = conn.transaction()?;

    let applied: Vec<String> = {
        let mut stmt = tx.prepare("SELECT name FROM migrations ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<std::result::Result<_, _>>()?
    };

    for (name, sql) in MIGRATIONS {
        if applied.iter().any(|a| a == name) {
            continue;
        }
        tx.execute_batch(sql)?;
        tx.execute("INSERT INTO migrations (name) VALUES (?1)", [name])?;
    }

    tx.commit()?;
    Ok(())
}
