//! Composing a new change from two parents: lowest common ancestor lookup,
//! per-file text/binary classification, three-way text merge, and binary
//! conflict handling.

pub mod diff3;

use std::collections::BTreeMap;

use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::content::ContentStore;
use crate::error::{Error, Result};
use crate::store::queries;
use crate::text::{self, Text};
use crate::types::AncestryRow;

/// Blobs larger than this (compressed, on disk) are treated as binary
/// without decoding.
const TEXT_SIZE_LIMIT: u64 = 1024 * 1024;

/// How far back the ancestry walk reaches when looking for a common
/// ancestor.
const LCA_ANCESTRY_LIMIT: i64 = 100;

#[derive(Debug, Clone)]
pub struct MergeParent {
    pub change_id: i64,
    pub change_name: String,
}

/// Builds the file list of `target_change_id` by merging the two parents
/// against their lowest common ancestor. Blobs for merged text files are
/// written to the content store; every resulting file row is attached to
/// the target change.
pub fn merge(
    conn: &Connection,
    content: &ContentStore,
    repo_id: i32,
    target_change_id: i64,
    parents: &[MergeParent],
) -> Result<()> {
    let mut ancestries = Vec::with_capacity(parents.len());
    for parent in parents {
        ancestries.push(queries::get_ancestry_of_change(
            conn,
            parent.change_id,
            LCA_ANCESTRY_LIMIT,
            repo_id,
        )?);
    }
    let base_id = lca(&ancestries).ok_or(Error::NoCommonAncestor)?;

    let buckets = overlap(conn, content, base_id, parents)?;

    for file in join(buckets) {
        let (hash, executable) = match &file.payload {
            MergedPayload::Text(text) => {
                let bytes = text.to_bytes()?;
                let hash = Sha256::digest(&bytes).to_vec();
                content.write(&hash, &bytes[..])?;
                (hash, file.executable)
            }
            MergedPayload::Binary(hash) => (hash.clone(), file.executable),
        };
        let file_id = queries::upsert_file(conn, &file.name, Some(executable), &hash, file.conflict)?;
        queries::add_file_to_change(conn, target_change_id, file_id)?;
    }

    Ok(())
}

/// Lowest common ancestor across ancestry lists: intersect the id sets,
/// break ties by maximum depth (closest to the tips). A single list's LCA
/// is its own tip.
pub fn lca(ancestries: &[Vec<AncestryRow>]) -> Option<i64> {
    match ancestries {
        [] => None,
        [only] => only.first().map(|row| row.id),
        [first, rest @ ..] => {
            let mut candidates: BTreeMap<i64, i64> =
                first.iter().map(|row| (row.id, row.depth)).collect();

            for ancestry in rest {
                let mut current = BTreeMap::new();
                for row in ancestry {
                    if candidates.contains_key(&row.id) {
                        current.insert(row.id, row.depth);
                    }
                }
                candidates = current;
                if candidates.is_empty() {
                    return None;
                }
            }

            candidates
                .into_iter()
                .max_by_key(|&(id, depth)| (depth, id))
                .map(|(id, _)| id)
        }
    }
}

struct TextState {
    base: Option<Text>,
    others: Vec<(Text, String)>,
    executable: bool,
    base_executable: bool,
    base_exists: bool,
}

struct BinaryState {
    base_hash: Option<Vec<u8>>,
    others: Vec<(Vec<u8>, String)>,
    executable: bool,
    base_executable: bool,
    base_exists: bool,
}

struct Buckets {
    texts: BTreeMap<String, TextState>,
    binaries: BTreeMap<String, BinaryState>,
}

enum MergedPayload {
    Text(Text),
    Binary(Vec<u8>),
}

struct MergedFile {
    name: String,
    payload: MergedPayload,
    conflict: bool,
    executable: bool,
}

/// Classifies every file of the base and the parents into text and binary
/// buckets keyed by file name. Classification happens once, on the base
/// variant when present; a parent edit of a base file inherits its bucket.
fn overlap(
    conn: &Connection,
    content: &ContentStore,
    base_id: i64,
    parents: &[MergeParent],
) -> Result<Buckets> {
    let mut texts: BTreeMap<String, TextState> = BTreeMap::new();
    let mut binaries: BTreeMap<String, BinaryState> = BTreeMap::new();

    for base_file in queries::list_change_files(conn, base_id)? {
        match classify(content, &base_file.content_hash)? {
            Classified::Binary => {
                binaries.insert(
                    base_file.name,
                    BinaryState {
                        base_hash: Some(base_file.content_hash),
                        others: Vec::new(),
                        executable: base_file.executable,
                        base_executable: base_file.executable,
                        base_exists: true,
                    },
                );
            }
            Classified::Text(text) => {
                texts.insert(
                    base_file.name,
                    TextState {
                        base: Some(text),
                        others: Vec::new(),
                        executable: base_file.executable,
                        base_executable: base_file.executable,
                        base_exists: true,
                    },
                );
            }
        }
    }

    for parent in parents {
        for parent_file in queries::list_change_files(conn, parent.change_id)? {
            if let Some(state) = binaries.get_mut(&parent_file.name) {
                state
                    .others
                    .push((parent_file.content_hash, parent.change_name.clone()));
                if state.base_executable != parent_file.executable {
                    state.executable = parent_file.executable;
                }
                continue;
            }
            if let Some(state) = texts.get_mut(&parent_file.name) {
                let text = text::read_from(content.read(&parent_file.content_hash)?)?;
                state.others.push((text, parent.change_name.clone()));
                if state.base_executable != parent_file.executable {
                    state.executable = parent_file.executable;
                }
                continue;
            }

            // Not in the base (and not yet seen from another parent):
            // classify fresh.
            match classify(content, &parent_file.content_hash)? {
                Classified::Binary => {
                    binaries.insert(
                        parent_file.name,
                        BinaryState {
                            base_hash: None,
                            others: vec![(parent_file.content_hash, parent.change_name.clone())],
                            executable: parent_file.executable,
                            base_executable: false,
                            base_exists: false,
                        },
                    );
                }
                Classified::Text(text) => {
                    texts.insert(
                        parent_file.name,
                        TextState {
                            base: None,
                            others: vec![(text, parent.change_name.clone())],
                            executable: parent_file.executable,
                            base_executable: false,
                            base_exists: false,
                        },
                    );
                }
            }
        }
    }

    Ok(Buckets { texts, binaries })
}

enum Classified {
    Text(Text),
    Binary,
}

fn classify(content: &ContentStore, hash: &[u8]) -> Result<Classified> {
    if content.stat(hash)? > TEXT_SIZE_LIMIT {
        return Ok(Classified::Binary);
    }
    let (reader, is_text) = text::is_text_reader(content.read(hash)?)?;
    if is_text {
        Ok(Classified::Text(text::read_from(reader)?))
    } else {
        Ok(Classified::Binary)
    }
}

/// Applies the per-file merge rules to the classified buckets.
fn join(buckets: Buckets) -> Vec<MergedFile> {
    let mut out = Vec::new();

    for (name, state) in buckets.texts {
        if state.base_exists && state.others.is_empty() {
            out.push(MergedFile {
                name,
                payload: MergedPayload::Text(state.base.expect("base text present")),
                conflict: false,
                executable: state.base_executable,
            });
            continue;
        }
        if state.others.len() == 1 {
            let (text, _) = state.others.into_iter().next().expect("one variant");
            out.push(MergedFile {
                name,
                payload: MergedPayload::Text(text),
                conflict: false,
                executable: state.executable,
            });
            continue;
        }

        let all_same = state
            .others
            .windows(2)
            .all(|pair| pair[0].0.content() == pair[1].0.content());
        if all_same {
            let (text, _) = state.others.into_iter().next().expect("variants present");
            out.push(MergedFile {
                name,
                payload: MergedPayload::Text(text),
                conflict: false,
                executable: state.executable,
            });
            continue;
        }

        let (encoding, has_bom) = state
            .base
            .as_ref()
            .map(|b| (b.encoding(), b.has_bom()))
            .unwrap_or((crate::text::Encoding::Utf8, false));
        let base_content = state.base.as_ref().map(Text::content).unwrap_or("");
        let (merged, conflict) = diff3::merge(
            state.others[0].0.content(),
            base_content,
            state.others[1].0.content(),
            &state.others[0].1,
            &state.others[1].1,
        );
        out.push(MergedFile {
            name,
            payload: MergedPayload::Text(Text::with_encoding(merged, encoding, has_bom)),
            conflict,
            executable: state.executable,
        });
    }

    for (name, state) in buckets.binaries {
        if state.others.is_empty() {
            if let Some(hash) = state.base_hash {
                out.push(MergedFile {
                    name,
                    payload: MergedPayload::Binary(hash),
                    conflict: false,
                    executable: state.base_executable,
                });
            }
            continue;
        }
        if state.others.len() == 1 {
            let (hash, _) = state.others.into_iter().next().expect("one variant");
            out.push(MergedFile {
                name,
                payload: MergedPayload::Binary(hash),
                conflict: false,
                executable: state.executable,
            });
            continue;
        }

        let all_same = state.others.windows(2).all(|pair| pair[0].0 == pair[1].0);
        if all_same {
            let (hash, _) = state.others.into_iter().next().expect("variants present");
            out.push(MergedFile {
                name,
                payload: MergedPayload::Binary(hash),
                conflict: false,
                executable: state.executable,
            });
            continue;
        }

        // Irreconcilable: keep every parent's version side by side, each
        // flagged as a conflict.
        for (hash, change_name) in state.others {
            out.push(MergedFile {
                name: format!("{name}.binconflict_{change_name}"),
                payload: MergedPayload::Binary(hash),
                conflict: true,
                executable: state.executable,
            });
        }
    }

    out
}

/// A file counts as conflicted when its name carries a binary-conflict
/// suffix or its text content contains all three marker lines.
pub fn is_in_conflict(content: &ContentStore, name: &str, content_hash: &[u8]) -> Result<bool> {
    if name.contains(".binconflict_") {
        return Ok(true);
    }
    let (reader, is_text) = text::is_text_reader(content.read(content_hash)?)?;
    if !is_text {
        return Ok(false);
    }
    let text = text::read_from(reader)?;
    let markers = [diff3::MARKER_A, diff3::MARKER_SEP, diff3::MARKER_B];
    Ok(markers.iter().all(|m| text.content().contains(m)))
}
