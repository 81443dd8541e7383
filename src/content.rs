use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use uuid::Uuid;

use crate::error::Result;

/// zstd level used for blobs at rest. Hashes are always computed over the
/// uncompressed bytes; compression is a storage detail.
const COMPRESSION_LEVEL: i32 = 19;

/// Content-addressed blob store.
///
/// Blobs live at `content/<b64url(hash)[0..2]>/<b64url(hash)[2..]>`,
/// zstd-compressed. Writes land in a temp file and are renamed into place,
/// so concurrent writes of the same hash are safe: the destination is
/// determined by the hash and blobs are immutable.
#[derive(Clone)]
pub struct ContentStore {
    base_path: PathBuf,
}

impl ContentStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            base_path: data_dir.join("content"),
        }
    }

    fn blob_path(&self, content_hash: &[u8]) -> PathBuf {
        let encoded = URL_SAFE_NO_PAD.encode(content_hash);
        self.base_path.join(&encoded[..2]).join(&encoded[2..])
    }

    fn temp_path(&self) -> PathBuf {
        self.base_path.join("tmp").join(Uuid::new_v4().to_string())
    }

    pub fn exists(&self, content_hash: &[u8]) -> bool {
        self.blob_path(content_hash).exists()
    }

    /// On-disk (compressed) size of the blob.
    pub fn stat(&self, content_hash: &[u8]) -> Result<u64> {
        let meta = fs::metadata(self.blob_path(content_hash))?;
        Ok(meta.len())
    }

    /// Returns a reader over the decompressed blob bytes.
    pub fn read(&self, content_hash: &[u8]) -> Result<impl Read + use<>> {
        let file = File::open(self.blob_path(content_hash))?;
        Ok(zstd::stream::read::Decoder::new(file)?)
    }

    pub fn read_to_vec(&self, content_hash: &[u8]) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read(content_hash)?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Compresses and stores the blob under its hash. Idempotent: writing
    /// the same hash twice leaves byte-equivalent content in place.
    pub fn write<R: Read>(&self, content_hash: &[u8], mut content: R) -> Result<()> {
        let temp_path = self.temp_path();
        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_file = File::create(&temp_path)?;
        let mut encoder = zstd::stream::write::Encoder::new(temp_file, COMPRESSION_LEVEL)?;
        let written = io::copy(&mut content, &mut encoder).and_then(|_| encoder.finish());
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        let final_path = self.blob_path(content_hash);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&temp_path, &final_path)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use tempfile::TempDir;

    fn hash_of(data: &[u8]) -> Vec<u8> {
        Sha256::digest(data).to_vec()
    }

    #[test]
    fn write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let store = ContentStore::new(temp_dir.path());

        let data = b"hello blob".to_vec();
        let hash = hash_of(&data);

        assert!(!store.exists(&hash));
        store.write(&hash, &data[..]).unwrap();
        assert!(store.exists(&hash));
        assert_eq!(store.read_to_vec(&hash).unwrap(), data);
    }

    #[test]
    fn write_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = ContentStore::new(temp_dir.path());

        let data = b"same content twice".to_vec();
        let hash = hash_of(&data);

        store.write(&hash, &data[..]).unwrap();
        store.write(&hash, &data[..]).unwrap();
        assert_eq!(store.read_to_vec(&hash).unwrap(), data);
    }

    #[test]
    fn stat_reports_compressed_size() {
        let temp_dir = TempDir::new().unwrap();
        let store = ContentStore::new(temp_dir.path());

        // Highly compressible: compressed size must be well below plaintext.
        let data = vec![b'a'; 64 * 1024];
        let hash = hash_of(&data);
        store.write(&hash, &data[..]).unwrap();

        let size = store.stat(&hash).unwrap();
        assert!(size > 0);
        assert!(size < data.len() as u64);
    }

    #[test]
    fn read_missing_blob_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store = ContentStore::new(temp_dir.path());

        let hash = hash_of(b"never written");
        assert!(!store.exists(&hash));
        assert!(store.read_to_vec(&hash).is_err());
    }
}
