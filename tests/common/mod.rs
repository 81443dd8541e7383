//! In-process test harness: drives the router directly so requests can
//! carry the `X-Signature` trailer frame, which ordinary HTTP clients
//! cannot send.

use std::convert::Infallible;
use std::io::Read;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, Response};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use http_body::Frame;
use http_body_util::{BodyExt, StreamBody};
use prost::Message;
use sha2::{Digest, Sha256};
use ssh_key::rand_core::OsRng;
use ssh_key::{Algorithm, PrivateKey};
use tempfile::TempDir;
use tower::ServiceExt;

use skiff::content::ContentStore;
use skiff::protos::{
    CheckoutRequest, ConflictsRequest, ConflictsResponse, FindChangeRequest, FindChangeResponse,
    InitRequest, InitResponse, ListBookmarksResponse, NewChangeRequest, NewChangeResponse,
    PushFileInfo,
};
use skiff::server::{AppState, create_router};
use skiff::signed;
use skiff::store::SqliteStore;

pub use axum::http::StatusCode;

/// A signing identity: (username, machine id, key).
pub struct Identity {
    pub username: String,
    pub machine_id: String,
    pub key: PrivateKey,
}

impl Identity {
    pub fn new(username: &str, machine_id: &str) -> Self {
        Self {
            username: username.to_owned(),
            machine_id: machine_id.to_owned(),
            key: PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap(),
        }
    }

    pub fn head_name(&self) -> String {
        format!("__head-{}-{}", self.username, self.machine_id)
    }
}

pub struct TestServer {
    router: Router,
    pub identity: Identity,
    _data_dir: TempDir,
}

pub struct PushFile<'a> {
    pub name: &'a str,
    pub content: &'a [u8],
    pub executable: bool,
}

impl<'a> PushFile<'a> {
    pub fn plain(name: &'a str, content: &'a [u8]) -> Self {
        Self {
            name,
            content,
            executable: false,
        }
    }
}

impl TestServer {
    pub fn start() -> Self {
        let data_dir = TempDir::new().expect("create temp dir");
        let store = SqliteStore::open_in_memory().expect("open store");
        let content = ContentStore::new(data_dir.path());
        let router = create_router(Arc::new(AppState { store, content }));

        Self {
            router,
            identity: Identity::new("alice", "laptop"),
            _data_dir: data_dir,
        }
    }

    /// Sends a signed POST carrying `body` and the signature trailer.
    pub async fn send(
        &self,
        identity: &Identity,
        path: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> Response<Body> {
        self.send_signed_at(identity, path, body, headers, Utc::now(), None)
            .await
    }

    /// Full-control variant: signing timestamp and an optional body
    /// substitution after signing (for tamper tests).
    pub async fn send_signed_at(
        &self,
        identity: &Identity,
        path: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
        timestamp: DateTime<Utc>,
        replace_body: Option<Vec<u8>>,
    ) -> Response<Body> {
        let trailer = signed::sign(
            &identity.key,
            path,
            &body,
            &identity.username,
            &identity.machine_id,
            timestamp,
        )
        .expect("sign request");

        let sent_body = replace_body.unwrap_or(body);
        let mut trailers = HeaderMap::new();
        trailers.insert("x-signature", trailer.parse().unwrap());

        let frames: Vec<Result<Frame<Bytes>, Infallible>> = vec![
            Ok(Frame::data(Bytes::from(sent_body))),
            Ok(Frame::trailers(trailers)),
        ];
        let stream_body = StreamBody::new(futures::stream::iter(frames));

        let mut builder = Request::builder().method("POST").uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::new(stream_body)).unwrap();

        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Sends an unsigned POST (no trailer at all).
    pub async fn send_unsigned(&self, path: &str, body: Vec<u8>) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .body(Body::from(body))
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Signed RPC that must succeed; returns the decoded response.
    pub async fn rpc<Req: Message, Resp: Message + Default>(
        &self,
        identity: &Identity,
        repo: i32,
        func: &str,
        request: &Req,
    ) -> Resp {
        let path = format!("/rpc/{repo}/{func}");
        let response = self
            .send(identity, &path, request.encode_to_vec(), &[])
            .await;
        let status = response.status();
        let body = body_bytes(response).await;
        assert!(
            status.is_success(),
            "rpc {func} failed with {status}: {}",
            String::from_utf8_lossy(&body)
        );
        Resp::decode(&body[..]).expect("decode rpc response")
    }

    pub async fn init(&self, name: &str, bookmarks: &[&str]) -> i32 {
        let request = InitRequest {
            bookmarks: bookmarks.iter().map(|b| (*b).to_owned()).collect(),
            name: name.to_owned(),
        };
        let response = self
            .send(&self.identity, "/rpc/init", request.encode_to_vec(), &[])
            .await;
        let status = response.status();
        let body = body_bytes(response).await;
        assert_eq!(
            status,
            StatusCode::CREATED,
            "init failed: {}",
            String::from_utf8_lossy(&body)
        );
        InitResponse::decode(&body[..]).unwrap().repo_id
    }

    /// Pushes the given files to `change_name` as `identity`. All file
    /// contents are included in the stream.
    pub async fn push(
        &self,
        identity: &Identity,
        repo: i32,
        change_name: &str,
        files: &[PushFile<'_>],
    ) -> Response<Body> {
        let tarball = build_push_tar(files);
        self.send(
            identity,
            &format!("/rpc/{repo}/push"),
            tarball,
            &[("X-Change-Name", change_name)],
        )
        .await
    }

    pub async fn new_change(
        &self,
        repo: i32,
        parents: &[&str],
        set_bookmarks: &[&str],
    ) -> i64 {
        let request = NewChangeRequest {
            parents: parents.iter().map(|p| (*p).to_owned()).collect(),
            description: None,
            set_bookmarks: set_bookmarks.iter().map(|b| (*b).to_owned()).collect(),
        };
        let response: NewChangeResponse = self
            .rpc(&self.identity, repo, "new_change", &request)
            .await;
        response.change_id
    }

    pub async fn find_change(&self, repo: i32, name: &str) -> FindChangeResponse {
        self.rpc(
            &self.identity,
            repo,
            "find_change",
            &FindChangeRequest {
                name: name.to_owned(),
                include_description: false,
            },
        )
        .await
    }

    /// Conflicted file names of a change, looked up by name, prefix, or
    /// bookmark.
    pub async fn conflicts(&self, repo: i32, change: &str) -> Vec<String> {
        let response: ConflictsResponse = self
            .rpc(
                &self.identity,
                repo,
                "conflicts",
                &ConflictsRequest {
                    change: change.to_owned(),
                },
            )
            .await;
        response.conflicts
    }

    pub async fn list_bookmarks(&self, repo: i32) -> ListBookmarksResponse {
        let path = format!("/rpc/{repo}/list_bookmarks");
        let response = self.send(&self.identity, &path, Vec::new(), &[]).await;
        assert!(response.status().is_success(), "list_bookmarks failed");
        let body = body_bytes(response).await;
        ListBookmarksResponse::decode(&body[..]).unwrap()
    }

    /// Checks out a change and returns its files as (name, content, mode).
    pub async fn checkout(&self, repo: i32, change_id: i64) -> Vec<(String, Vec<u8>, u32)> {
        let request = CheckoutRequest { change_id };
        let path = format!("/rpc/{repo}/checkout");
        let response = self
            .send(&self.identity, &path, request.encode_to_vec(), &[])
            .await;
        assert!(response.status().is_success(), "checkout failed");
        let body = body_bytes(response).await;

        let mut archive = tar::Archive::new(&body[..]);
        let mut files = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let mode = entry.header().mode().unwrap();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            files.push((name, content, mode));
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        files
    }
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

/// Builds a push tar: entry names are base64url-encoded `PushFileInfo`
/// messages, bodies the plain file contents.
pub fn build_push_tar(files: &[PushFile<'_>]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for file in files {
        let info = PushFileInfo {
            name: file.name.to_owned(),
            executable: Some(file.executable),
            content_hash: Sha256::digest(file.content).to_vec(),
            contains_content: true,
        };
        let encoded_name = URL_SAFE_NO_PAD.encode(info.encode_to_vec());

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(file.content.len() as u64);
        header.set_mode(if file.executable { 0o755 } else { 0o644 });
        builder
            .append_data(&mut header, &encoded_name, file.content)
            .unwrap();
    }
    builder.into_inner().unwrap()
}
