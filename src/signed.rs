//! Signed RPC transport: every RPC is a POST whose body is hashed and
//! signed with the caller's SSH key; the signature record travels in the
//! `X-Signature` HTTP trailer. Verification binds the request to a
//! (username, machine id) pair that handlers treat as authenticated.

use std::fs::File;
use std::io::{Read, Seek, Write};

use axum::extract::{FromRequest, Request};
use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use chrono::{DateTime, TimeZone, Timelike, Utc};
use http_body_util::BodyExt;
use serde::Serialize;
use sha2::{Digest, Sha256};
use signature::{Signer, Verifier};
use ssh_key::{Algorithm, PrivateKey, PublicKey, Signature};

use crate::error::{Error, Result};
use crate::protos::{self, HttpSignature};
use crate::server::response::RpcError;

/// Maximum allowed distance between the signature timestamp and now.
const FRESHNESS_WINDOW_SECS: i64 = 5 * 60;

pub const SIGNATURE_TRAILER: &str = "x-signature";

/// The record that gets signed, serialized as canonical JSON: compact, this
/// exact field order, byte fields as padded standard base64, timestamp via
/// [`format_timestamp`]. The wire carries the protobuf form; this JSON only
/// ever exists as signer/verifier input, so both sides must reproduce it
/// byte for byte.
#[derive(Serialize)]
struct SignatureRecord<'a> {
    body_hash: String,
    request_path: &'a str,
    timestamp: String,
    username: &'a str,
    machine_id: &'a str,
    public_key: String,
}

/// RFC 3339 UTC with fractional seconds trimmed of trailing zeros and
/// omitted entirely at zero — the serialization the original clients sign.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    let base = dt.format("%Y-%m-%dT%H:%M:%S");
    let nanos = dt.nanosecond();
    if nanos == 0 {
        format!("{base}Z")
    } else {
        let frac = format!("{nanos:09}");
        let frac = frac.trim_end_matches('0');
        format!("{base}.{frac}Z")
    }
}

fn canonical_record(
    body_hash: &[u8],
    request_path: &str,
    timestamp: DateTime<Utc>,
    username: &str,
    machine_id: &str,
    public_key: &[u8],
) -> Vec<u8> {
    let record = SignatureRecord {
        body_hash: STANDARD.encode(body_hash),
        request_path,
        timestamp: format_timestamp(timestamp),
        username,
        machine_id,
        public_key: STANDARD.encode(public_key),
    };
    serde_json::to_vec(&record).expect("signature record serializes")
}

/// Builds the `X-Signature` trailer value for a request. The server side
/// never calls this; clients normally delegate the actual signing to an
/// SSH agent, which this helper stands in for given a loaded private key.
pub fn sign(
    key: &PrivateKey,
    request_path: &str,
    body: &[u8],
    username: &str,
    machine_id: &str,
    timestamp: DateTime<Utc>,
) -> Result<String> {
    let body_hash = Sha256::digest(body).to_vec();
    let public_key = key
        .public_key()
        .to_bytes()
        .map_err(|e| Error::InvalidSignature(e.to_string()))?;

    let record = canonical_record(
        &body_hash,
        request_path,
        timestamp,
        username,
        machine_id,
        &public_key,
    );
    let signature: Signature = key
        .try_sign(&record)
        .map_err(|e| Error::InvalidSignature(e.to_string()))?;

    let http_sig = HttpSignature {
        body_hash,
        request_path: request_path.to_owned(),
        timestamp: Some(prost_types::Timestamp {
            seconds: timestamp.timestamp(),
            nanos: timestamp.timestamp_subsec_nanos() as i32,
        }),
        username: username.to_owned(),
        machine_id: machine_id.to_owned(),
        public_key,
        format: signature.algorithm().to_string(),
        blob: signature.as_bytes().to_vec(),
        rest: Vec::new(),
    };

    Ok(URL_SAFE.encode(protos::encode(&http_sig)))
}

/// Verifies a decoded signature against the observed body hash and request
/// path: freshness window, hash and path equality, then the SSH signature
/// over the reconstructed canonical record.
fn verify(sig: &HttpSignature, body_hash: &[u8], request_path: &str) -> Result<()> {
    let timestamp = sig
        .timestamp
        .as_ref()
        .and_then(|ts| Utc.timestamp_opt(ts.seconds, ts.nanos as u32).single())
        .ok_or_else(|| Error::InvalidSignature("missing timestamp".into()))?;

    let age = (Utc::now() - timestamp).num_seconds();
    if age.abs() > FRESHNESS_WINDOW_SECS {
        return Err(Error::SignatureVerificationFailed(
            "timestamp too old or in future".into(),
        ));
    }

    if sig.body_hash != body_hash {
        return Err(Error::SignatureVerificationFailed(
            "body hash mismatch".into(),
        ));
    }

    if sig.request_path != request_path {
        return Err(Error::SignatureVerificationFailed(
            "request path mismatch".into(),
        ));
    }

    let public_key = PublicKey::from_bytes(&sig.public_key)
        .map_err(|_| Error::InvalidSignature("invalid public key".into()))?;
    let algorithm = Algorithm::new(&sig.format)
        .map_err(|_| Error::InvalidSignature(format!("unknown algorithm '{}'", sig.format)))?;
    let signature = Signature::new(algorithm, sig.blob.clone())
        .map_err(|e| Error::InvalidSignature(e.to_string()))?;

    let record = canonical_record(
        &sig.body_hash,
        &sig.request_path,
        timestamp,
        &sig.username,
        &sig.machine_id,
        &sig.public_key,
    );
    public_key
        .key_data()
        .verify(&record, &signature)
        .map_err(|e| Error::SignatureVerificationFailed(e.to_string()))?;

    Ok(())
}

/// A verified RPC request. The body has been spooled to an anonymous temp
/// file (hashed along the way) and rewound, so handlers get a restartable
/// reader; the file disappears when the request ends.
pub struct SignedRequest {
    body: File,
    headers: HeaderMap,
    username: String,
    machine_id: String,
}

impl SignedRequest {
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The spooled body, positioned at the start.
    pub fn body(&mut self) -> &mut File {
        &mut self.body
    }

    pub fn body_bytes(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.body.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl<S> FromRequest<S> for SignedRequest
where
    S: Send + Sync,
{
    type Rejection = RpcError;

    async fn from_request(req: Request, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        let request_path = req.uri().path().to_owned();
        let headers = req.headers().clone();

        let mut file = tempfile::tempfile().map_err(Error::from)?;
        let mut hasher = Sha256::new();
        let mut trailers: Option<HeaderMap> = None;

        let mut body = req.into_body();
        while let Some(frame) = body.frame().await {
            let frame =
                frame.map_err(|e| Error::SignatureVerificationFailed(format!("read body: {e}")))?;
            match frame.into_data() {
                Ok(data) => {
                    hasher.update(&data);
                    file.write_all(&data).map_err(Error::from)?;
                }
                Err(frame) => {
                    if let Ok(t) = frame.into_trailers() {
                        trailers.get_or_insert_with(HeaderMap::new).extend(t);
                    }
                }
            }
        }
        let body_hash = hasher.finalize().to_vec();

        let sig_value = trailers
            .as_ref()
            .and_then(|t| t.get(SIGNATURE_TRAILER))
            .and_then(|v| v.to_str().ok())
            .ok_or(Error::MissingSignature)?;

        let sig_bytes = URL_SAFE
            .decode(sig_value)
            .map_err(|e| Error::InvalidSignature(e.to_string()))?;
        let http_sig: HttpSignature = protos::decode(&sig_bytes)
            .map_err(|e| Error::InvalidSignature(e.to_string()))?;

        verify(&http_sig, &body_hash, &request_path)?;

        file.rewind().map_err(Error::from)?;

        Ok(SignedRequest {
            body: file,
            headers,
            username: http_sig.username,
            machine_id: http_sig.machine_id,
        })
    }
}
