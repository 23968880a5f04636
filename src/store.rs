use std::{
    fs,
    io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use chrono::{DateTime, Utc};
use image::ImageFormat;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};

const CAPTURE_DIR_NAME: &str = "captures";
const HASH_PREFIX_LEN: usize = 8;
const JPEG_MIME: &str = "image/jpeg";

/// Record returned for every persisted capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    pub path: PathBuf,
    pub content_hash: String,
    pub captured_at: DateTime<Utc>,
    pub byte_length: u64,
    pub mime_type: String,
    /// True when a file with the same content hash already existed at the
    /// final path before this save.
    pub deduped: bool,
}

/// Content-addressed storage for captured frames.
///
/// Files live at `captures/<hash8>.jpg` under the application data
/// directory; the hash is the first eight hex characters of the SHA-256 of
/// the raw bytes, so identical captures collapse onto one file. Writes go
/// through a temporary sibling and a rename, which keeps a partially
/// written file from ever being visible at the final path.
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: data_dir.as_ref().join(CAPTURE_DIR_NAME),
        }
    }

    pub fn capture_dir(&self) -> &Path {
        &self.dir
    }

    pub fn save(
        &self,
        bytes: &[u8],
        mime_type: &str,
        captured_at: DateTime<Utc>,
    ) -> CoreResult<CaptureRecord> {
        if mime_type != JPEG_MIME {
            return Err(CoreError::UnsupportedImageType(mime_type.to_string()));
        }
        match image::guess_format(bytes) {
            Ok(ImageFormat::Jpeg) => {}
            _ => return Err(CoreError::UnsupportedImageType(mime_type.to_string())),
        }

        fs::create_dir_all(&self.dir)?;

        let digest = Sha256::digest(bytes);
        let content_hash = hex::encode(digest)[..HASH_PREFIX_LEN].to_string();
        let final_path = self.dir.join(format!("{content_hash}.jpg"));
        let tmp_path = self.dir.join(format!("{content_hash}.jpg.tmp"));
        let deduped = final_path.exists();

        // fs::write truncates, which also recovers a tmp file orphaned by an
        // interrupted earlier save.
        fs::write(&tmp_path, bytes)?;
        fs::rename(&tmp_path, &final_path)?;

        let path = final_path.canonicalize()?;
        if deduped {
            debug!("capture {content_hash} already existed, overwrote in place");
        } else {
            info!("saved capture {content_hash} ({} bytes)", bytes.len());
        }

        Ok(CaptureRecord {
            path,
            content_hash,
            captured_at,
            byte_length: bytes.len() as u64,
            mime_type: mime_type.to_string(),
            deduped,
        })
    }

    /// Most-recently-modified capture paths, newest first, at most `limit`.
    /// An absent or empty capture directory yields an empty list.
    pub fn recent(&self, limit: usize) -> CoreResult<Vec<PathBuf>> {
        let mut entries = self.list_by_mtime()?;
        entries.truncate(limit);
        Ok(entries.into_iter().map(|(_, path)| path).collect())
    }

    /// Like `recent`, additionally dropping captures whose modification time
    /// is older than `max_age`. Analysis uses this so the selection matches
    /// the trailing window the classification prompt describes.
    pub fn recent_within(&self, limit: usize, max_age: Duration) -> CoreResult<Vec<PathBuf>> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut entries = self.list_by_mtime()?;
        entries.retain(|(mtime, _)| *mtime >= cutoff);
        entries.truncate(limit);
        Ok(entries.into_iter().map(|(_, path)| path).collect())
    }

    fn list_by_mtime(&self) -> CoreResult<Vec<(SystemTime, PathBuf)>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let path = entry.path();
            let is_capture = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));
            if !is_capture {
                continue;
            }
            let mtime = entry.metadata()?.modified()?;
            entries.push((mtime, path));
        }

        entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(entries)
    }
}
