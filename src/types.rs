use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct Repository {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Change {
    pub id: i64,
    pub repository_id: i32,
    pub name: String,
    pub description: Option<String>,
    pub author: String,
    pub device: String,
    pub depth: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of an ancestry walk: a change together with one of its parent
/// edges. A merge change appears once per parent.
#[derive(Debug, Clone)]
pub struct AncestryRow {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub author: String,
    pub device: String,
    pub depth: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct File {
    pub id: i64,
    pub name: String,
    pub executable: bool,
    pub content_hash: Vec<u8>,
    pub conflict: bool,
}

#[derive(Debug, Clone)]
pub struct Bookmark {
    pub id: i64,
    pub repository_id: i32,
    pub name: String,
    pub change_id: i64,
}
