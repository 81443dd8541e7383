use std::collections::HashSet;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono_tz::Tz;
use tokio_util::io::{ReaderStream, SyncIoBridge};

use super::response::RpcError;
use crate::error::Error;
use crate::merge::{self, MergeParent};
use crate::protos::{
    self, CheckFilesExistsRequest, CheckFilesExistsResponse, CheckoutRequest, ConflictsRequest,
    ConflictsResponse, DescribeRequest, FindChangeRequest, FindChangeResponse, InitRequest,
    InitResponse, ListBookmarksResponse, LogRequest, LogResponse, NewChangeRequest,
    NewChangeResponse, PushFileInfo, SetBookmarkRequest,
};
use crate::server::AppState;
use crate::signed::SignedRequest;
use crate::store::queries;
use crate::types::AncestryRow;

const DEFAULT_LOG_LIMIT: i32 = 10;

fn validate_repo_name(name: &str) -> Result<(), RpcError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            first.is_ascii_alphabetic()
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        }
        None => false,
    };
    if !valid {
        return Err(RpcError::bad_request(format!(
            "invalid repo name '{name}': must start with a letter and only contain letters, numbers, dashes, and underscores"
        )));
    }
    Ok(())
}

/// `{repo}` is an int32 id, or a repo name as fallback.
fn open_repo(state: &AppState, repo: &str) -> Result<i32, RpcError> {
    if let Ok(id) = repo.parse::<i32>() {
        return Ok(id);
    }
    let conn = state.store.lock();
    queries::get_repo_by_name(&conn, repo)
        .map_err(|e| RpcError::from(e).context("open repository"))
}

pub async fn init(
    State(state): State<Arc<AppState>>,
    mut req: SignedRequest,
) -> Result<Response, RpcError> {
    let body = req.body_bytes()?;
    let init_req: InitRequest =
        protos::decode(&body).map_err(|e| RpcError::from(e).context("unmarshal init request"))?;

    validate_repo_name(&init_req.name)?;

    let mut conn = state.store.lock();
    let tx = conn.transaction()?;

    let repo_id = queries::create_repo(&tx, &init_req.name)?;
    let change_name = queries::generate_change_name(&tx, repo_id)?;
    let change_id = queries::create_change(
        &tx,
        repo_id,
        &change_name,
        Some("init"),
        req.username(),
        req.machine_id(),
        0,
    )?;

    for bookmark in &init_req.bookmarks {
        queries::set_bookmark(&tx, repo_id, bookmark, change_id)
            .map_err(|e| RpcError::from(e).context(&format!("set bookmark '{bookmark}'")))?;
    }

    tx.commit()?;

    let resp = InitResponse { repo_id };
    Ok((StatusCode::CREATED, protos::encode(&resp)).into_response())
}

pub async fn rpc(
    State(state): State<Arc<AppState>>,
    Path((repo, func)): Path<(String, String)>,
    req: SignedRequest,
) -> Result<Response, RpcError> {
    match func.as_str() {
        "push" => push(&state, &repo, req),
        "check_files_exists" => check_files_exists(&state, &repo, req),
        "new_change" => new_change(&state, &repo, req),
        "checkout" => checkout(&state, &repo, req),
        "set_bookmark" => set_bookmark(&state, &repo, req),
        "log" => log(&state, &repo, req),
        "conflicts" => conflicts(&state, &repo, req),
        "find_change" => find_change(&state, &repo, req),
        "describe" => describe(&state, &repo, req),
        "list_bookmarks" => list_bookmarks(&state, &repo, req),
        _ => Err(RpcError::not_found("unknown function")),
    }
}

fn push(state: &AppState, repo: &str, mut req: SignedRequest) -> Result<Response, RpcError> {
    let repo_id = open_repo(state, repo)?;

    let change_name = req
        .header("x-change-name")
        .ok_or_else(|| RpcError::bad_request("missing X-Change-Name header"))?
        .to_owned();
    let author = req.username().to_owned();
    let device = req.machine_id().to_owned();

    let mut conn = state.store.lock();
    let tx = conn.transaction()?;

    let change_id = queries::find_change(&tx, repo_id, &change_name)
        .map_err(|e| RpcError::from(e).context(&format!("find change '{change_name}'")))?;

    if queries::has_change_child(&tx, change_id)? {
        return Err(Error::PushToChangeWithChild.into());
    }
    let owner = queries::get_change_owner(&tx, change_id)?;
    if owner != (author, device) {
        return Err(Error::PushToChangeNotOwned.into());
    }

    queries::clear_change(&tx, change_id)?;

    let mut archive = tar::Archive::new(req.body());
    for entry in archive
        .entries()
        .map_err(|e| RpcError::from(Error::from(e)).context("read tar"))?
    {
        let mut entry = entry.map_err(|e| {
            RpcError {
                status: StatusCode::BAD_REQUEST,
                message: format!("read tar: {e}"),
            }
        })?;

        let entry_name = {
            let path = entry.path().map_err(|e| RpcError {
                status: StatusCode::BAD_REQUEST,
                message: format!("read tar entry name: {e}"),
            })?;
            path.to_string_lossy().into_owned()
        };
        let info_bytes = URL_SAFE_NO_PAD
            .decode(entry_name.as_bytes())
            .map_err(|e| RpcError::bad_request(format!("decode push file info: {e}")))?;
        let info: PushFileInfo = protos::decode(&info_bytes)
            .map_err(|e| RpcError::from(e).context("unmarshal push file info"))?;

        if info.contains_content {
            state
                .content
                .write(&info.content_hash, &mut entry)
                .map_err(|e| RpcError::from(e).context("set file content"))?;
        }

        let conflict = merge::is_in_conflict(&state.content, &info.name, &info.content_hash)
            .map_err(|e| RpcError::from(e).context("check if file is in conflict"))?;

        let file_id = queries::upsert_file(
            &tx,
            &info.name,
            info.executable,
            &info.content_hash,
            conflict,
        )?;
        queries::add_file_to_change(&tx, change_id, file_id)?;
    }

    queries::touch_change(&tx, change_id)?;
    tx.commit()?;

    Ok(StatusCode::OK.into_response())
}

fn check_files_exists(
    state: &AppState,
    repo: &str,
    mut req: SignedRequest,
) -> Result<Response, RpcError> {
    open_repo(state, repo)?;

    let body = req.body_bytes()?;
    let cfe_req: CheckFilesExistsRequest = protos::decode(&body)
        .map_err(|e| RpcError::from(e).context("unmarshal check files exists request"))?;

    let resp = CheckFilesExistsResponse {
        exists: cfe_req
            .content_hash
            .iter()
            .map(|hash| state.content.exists(hash))
            .collect(),
    };

    Ok(protos::encode(&resp).into_response())
}

fn new_change(state: &AppState, repo: &str, mut req: SignedRequest) -> Result<Response, RpcError> {
    let repo_id = open_repo(state, repo)?;

    let body = req.body_bytes()?;
    let nc_req: NewChangeRequest = protos::decode(&body)
        .map_err(|e| RpcError::from(e).context("unmarshal new change request"))?;

    match nc_req.parents.len() {
        0 => return Err(RpcError::bad_request("new change must have at least one parent")),
        1 | 2 => {}
        _ => return Err(RpcError::bad_request("new change must have one or two parents")),
    }

    let mut conn = state.store.lock();
    let tx = conn.transaction()?;

    let change_name = queries::generate_change_name(&tx, repo_id)?;
    let change_id = queries::create_change(
        &tx,
        repo_id,
        &change_name,
        nc_req.description.as_deref(),
        req.username(),
        req.machine_id(),
        0, // overwritten below
    )?;

    // Parents resolve before any bookmark moves: a bookmark named in both
    // `parents` and `set_bookmarks` must refer to its old target, not the
    // change being created.
    let mut parents = Vec::with_capacity(nc_req.parents.len());
    let mut depth: i64 = 0;
    for parent in &nc_req.parents {
        let parent_id = queries::find_change(&tx, repo_id, parent)
            .map_err(|e| RpcError::from(e).context("get parent change"))?;
        if parent_id == change_id {
            return Err(RpcError::bad_request(format!(
                "parent '{parent}' resolves to the change being created"
            )));
        }
        let parent_name = queries::get_change_name(&tx, parent_id, repo_id)?;
        queries::set_change_parent(&tx, change_id, Some(parent_id))?;
        depth = depth.max(queries::get_change_depth(&tx, parent_id, repo_id)?);
        parents.push(MergeParent {
            change_id: parent_id,
            change_name: parent_name,
        });
    }
    queries::set_change_depth(&tx, change_id, depth + 1)?;

    for bookmark in &nc_req.set_bookmarks {
        queries::set_bookmark(&tx, repo_id, bookmark, change_id)
            .map_err(|e| RpcError::from(e).context(&format!("set bookmark '{bookmark}'")))?;
    }

    match parents.as_slice() {
        [parent] => {
            queries::copy_file_list(&tx, change_id, parent.change_id)?;
            if !queries::check_if_changes_same_file_count(&tx, change_id, parent.change_id)? {
                return Err(RpcError::bad_request(
                    "new change must have the same file count as its parent",
                ));
            }
        }
        _ => {
            merge::merge(&tx, &state.content, repo_id, change_id, &parents)
                .map_err(|e| RpcError::from(e).context("merge"))?;
        }
    }

    tx.commit()?;

    let resp = NewChangeResponse { change_id };
    Ok((StatusCode::CREATED, protos::encode(&resp)).into_response())
}

fn checkout(state: &AppState, repo: &str, mut req: SignedRequest) -> Result<Response, RpcError> {
    open_repo(state, repo)?;

    let body = req.body_bytes()?;
    let co_req: CheckoutRequest = protos::decode(&body)
        .map_err(|e| RpcError::from(e).context("unmarshal checkout request"))?;

    let files = {
        let conn = state.store.lock();
        queries::list_change_files(&conn, co_req.change_id)?
    };

    // The whole change goes out as one plain tar stream; a blocking task
    // produces entries while the response body drains the other end.
    let (writer, reader) = tokio::io::duplex(64 * 1024);
    let content = state.content.clone();
    tokio::task::spawn_blocking(move || {
        let result = (|| -> crate::error::Result<()> {
            let mut builder = tar::Builder::new(SyncIoBridge::new(writer));
            for file in files {
                let data = content.read_to_vec(&file.content_hash)?;
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(data.len() as u64);
                header.set_mode(if file.executable { 0o755 } else { 0o644 });
                builder.append_data(&mut header, &file.name, &data[..])?;
            }
            builder.finish()?;
            Ok(())
        })();
        if let Err(e) = result {
            tracing::warn!("checkout stream failed: {e}");
        }
    });

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "application/x-tar")
        .body(Body::from_stream(ReaderStream::new(reader)))
        .map_err(|e| RpcError::internal(format!("build checkout response: {e}")))?;
    Ok(response)
}

fn set_bookmark(state: &AppState, repo: &str, mut req: SignedRequest) -> Result<Response, RpcError> {
    let repo_id = open_repo(state, repo)?;

    let body = req.body_bytes()?;
    let sb_req: SetBookmarkRequest = protos::decode(&body)
        .map_err(|e| RpcError::from(e).context("unmarshal set bookmark request"))?;

    let conn = state.store.lock();
    queries::set_bookmark(&conn, repo_id, &sb_req.bookmark, sb_req.change_id)
        .map_err(|e| RpcError::from(e).context("set bookmark"))?;

    Ok(StatusCode::CREATED.into_response())
}

fn log(state: &AppState, repo: &str, mut req: SignedRequest) -> Result<Response, RpcError> {
    let repo_id = open_repo(state, repo)?;

    let body = req.body_bytes()?;
    let log_req: LogRequest =
        protos::decode(&body).map_err(|e| RpcError::from(e).context("unmarshal log request"))?;

    let tz: Tz = if log_req.time_zone.is_empty() {
        chrono_tz::UTC
    } else {
        log_req
            .time_zone
            .parse()
            .map_err(|_| RpcError::internal(format!("load time zone '{}'", log_req.time_zone)))?
    };
    let limit = if log_req.limit <= 0 {
        DEFAULT_LOG_LIMIT
    } else {
        log_req.limit
    };

    let conn = state.store.lock();
    let head = queries::find_change(&conn, repo_id, &log_req.head)
        .map_err(|e| RpcError::from(e).context("find change"))?;

    let ancestry = queries::get_ancestry_of_change(&conn, head, i64::from(limit), repo_id)?;
    if ancestry.is_empty() {
        return Err(RpcError::internal("no history found"));
    }

    let mut rendered = String::new();
    let mut seen = HashSet::new();
    for row in &ancestry {
        if !seen.insert(row.id) {
            continue;
        }
        let prefix = queries::get_change_prefix(&conn, row.id, repo_id)?;
        let has_conflicts = queries::has_change_conflicts(&conn, row.id)?;
        render_log_entry(&mut rendered, row, &prefix, has_conflicts, row.id == head, tz);
    }

    let resp = LogResponse { log: rendered };
    Ok(protos::encode(&resp).into_response())
}

fn render_log_entry(
    out: &mut String,
    row: &AncestryRow,
    prefix: &str,
    has_conflicts: bool,
    is_head: bool,
    tz: Tz,
) {
    let marker = if is_head { '@' } else { 'o' };
    out.push_str(&format!("{marker} {prefix}"));
    out.push_str(&row.name[prefix.len()..]);
    if has_conflicts {
        out.push_str(" (conflict)");
    }
    out.push('\n');

    match row.description.as_deref() {
        Some(desc) if !desc.is_empty() => {
            let first_line = desc.lines().next().unwrap_or_default();
            out.push_str(&format!("  {first_line}\n"));
        }
        _ => out.push_str("  (no description set)\n"),
    }

    let updated = row.updated_at.with_timezone(&tz);
    out.push_str(&format!(
        "  {} {}\n\n",
        row.author,
        updated.format("%Y-%m-%d %H:%M:%S")
    ));
}

fn conflicts(state: &AppState, repo: &str, mut req: SignedRequest) -> Result<Response, RpcError> {
    let repo_id = open_repo(state, repo)?;

    let body = req.body_bytes()?;
    let c_req: ConflictsRequest = protos::decode(&body)
        .map_err(|e| RpcError::from(e).context("unmarshal conflicts request"))?;

    let conn = state.store.lock();
    let change_id = queries::find_change(&conn, repo_id, &c_req.change)
        .map_err(|e| RpcError::from(e).context("find change"))?;
    let conflicts = queries::get_change_conflicts(&conn, change_id)?;

    let resp = ConflictsResponse { conflicts };
    Ok(protos::encode(&resp).into_response())
}

fn find_change(state: &AppState, repo: &str, mut req: SignedRequest) -> Result<Response, RpcError> {
    let repo_id = open_repo(state, repo)?;

    let body = req.body_bytes()?;
    let fc_req: FindChangeRequest = protos::decode(&body)
        .map_err(|e| RpcError::from(e).context("unmarshal find change request"))?;

    let conn = state.store.lock();
    let change_id = queries::find_change(&conn, repo_id, &fc_req.name)
        .map_err(|e| RpcError::from(e).context("find change"))?;

    let description = if fc_req.include_description {
        queries::get_change_description(&conn, change_id)?
    } else {
        None
    };

    let resp = FindChangeResponse {
        change_id,
        description,
    };
    Ok(protos::encode(&resp).into_response())
}

fn describe(state: &AppState, repo: &str, mut req: SignedRequest) -> Result<Response, RpcError> {
    let repo_id = open_repo(state, repo)?;

    let body = req.body_bytes()?;
    let d_req: DescribeRequest = protos::decode(&body)
        .map_err(|e| RpcError::from(e).context("unmarshal describe request"))?;

    let conn = state.store.lock();
    let change_id = queries::find_change(&conn, repo_id, &d_req.change)
        .map_err(|e| RpcError::from(e).context(&format!("find change {}", d_req.change)))?;
    queries::set_change_description(
        &conn,
        change_id,
        Some(&d_req.description),
        req.username(),
        req.machine_id(),
    )
    .map_err(|e| RpcError::from(e).context("set change description"))?;

    Ok(StatusCode::OK.into_response())
}

fn list_bookmarks(
    state: &AppState,
    repo: &str,
    _req: SignedRequest,
) -> Result<Response, RpcError> {
    let repo_id = open_repo(state, repo)?;

    let conn = state.store.lock();
    let mut resp = ListBookmarksResponse::default();
    for bookmark in queries::get_all_bookmarks(&conn, repo_id)? {
        let change_prefix = queries::get_change_prefix(&conn, bookmark.change_id, repo_id)?;
        let change_name = queries::get_change_name(&conn, bookmark.change_id, repo_id)?;
        resp.bookmarks.push(protos::BookmarkEntry {
            bookmark_name: bookmark.name,
            change_name,
            change_prefix,
            change_id: bookmark.change_id,
        });
    }

    Ok(protos::encode(&resp).into_response())
}
