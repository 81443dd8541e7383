//! Wire messages. Request and response bodies are protobuf; `push` carries
//! a tar stream whose entry names are base64url-encoded [`PushFileInfo`]
//! messages, and `checkout` streams a tar back.

use prost::Message;

use crate::error::Result;

#[derive(Clone, PartialEq, Message)]
pub struct InitRequest {
    #[prost(string, repeated, tag = "1")]
    pub bookmarks: Vec<String>,
    #[prost(string, tag = "2")]
    pub name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct InitResponse {
    #[prost(int32, tag = "1")]
    pub repo_id: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct CheckFilesExistsRequest {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub content_hash: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CheckFilesExistsResponse {
    #[prost(bool, repeated, tag = "1")]
    pub exists: Vec<bool>,
}

/// Per-entry metadata of a push tar stream. `contains_content` is false
/// when the server already has the blob and the entry body is empty.
#[derive(Clone, PartialEq, Message)]
pub struct PushFileInfo {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(bool, optional, tag = "2")]
    pub executable: Option<bool>,
    #[prost(bytes = "vec", tag = "3")]
    pub content_hash: Vec<u8>,
    #[prost(bool, tag = "4")]
    pub contains_content: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct NewChangeRequest {
    #[prost(string, repeated, tag = "1")]
    pub parents: Vec<String>,
    #[prost(string, optional, tag = "2")]
    pub description: Option<String>,
    #[prost(string, repeated, tag = "3")]
    pub set_bookmarks: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct NewChangeResponse {
    #[prost(int64, tag = "1")]
    pub change_id: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct CheckoutRequest {
    #[prost(int64, tag = "1")]
    pub change_id: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct SetBookmarkRequest {
    #[prost(string, tag = "1")]
    pub bookmark: String,
    #[prost(int64, tag = "2")]
    pub change_id: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct LogRequest {
    #[prost(string, tag = "1")]
    pub head: String,
    #[prost(int32, tag = "2")]
    pub limit: i32,
    #[prost(string, tag = "3")]
    pub time_zone: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct LogResponse {
    #[prost(string, tag = "1")]
    pub log: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ConflictsRequest {
    #[prost(string, tag = "1")]
    pub change: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ConflictsResponse {
    #[prost(string, repeated, tag = "1")]
    pub conflicts: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FindChangeRequest {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(bool, tag = "2")]
    pub include_description: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct FindChangeResponse {
    #[prost(int64, tag = "1")]
    pub change_id: i64,
    #[prost(string, optional, tag = "2")]
    pub description: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DescribeRequest {
    #[prost(string, tag = "1")]
    pub change: String,
    #[prost(string, tag = "2")]
    pub description: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct BookmarkEntry {
    #[prost(string, tag = "1")]
    pub bookmark_name: String,
    #[prost(string, tag = "2")]
    pub change_name: String,
    #[prost(string, tag = "3")]
    pub change_prefix: String,
    #[prost(int64, tag = "4")]
    pub change_id: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct ListBookmarksResponse {
    #[prost(message, repeated, tag = "1")]
    pub bookmarks: Vec<BookmarkEntry>,
}

/// The signed record plus the SSH signature, carried base64url-encoded in
/// the `X-Signature` trailer.
#[derive(Clone, PartialEq, Message)]
pub struct HttpSignature {
    #[prost(bytes = "vec", tag = "1")]
    pub body_hash: Vec<u8>,
    #[prost(string, tag = "2")]
    pub request_path: String,
    #[prost(message, optional, tag = "3")]
    pub timestamp: Option<prost_types::Timestamp>,
    #[prost(string, tag = "4")]
    pub username: String,
    #[prost(string, tag = "5")]
    pub machine_id: String,
    #[prost(bytes = "vec", tag = "6")]
    pub public_key: Vec<u8>,
    #[prost(string, tag = "7")]
    pub format: String,
    #[prost(bytes = "vec", tag = "8")]
    pub blob: Vec<u8>,
    #[prost(bytes = "vec", tag = "9")]
    pub rest: Vec<u8>,
}

pub fn decode<M: Message + Default>(data: &[u8]) -> Result<M> {
    Ok(M::decode(data)?)
}

pub fn encode<M: Message>(message: &M) -> Vec<u8> {
    message.encode_to_vec()
}
