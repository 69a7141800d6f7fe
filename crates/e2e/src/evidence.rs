//! Visual evidence capture

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    /// Explicit `capture` step
    Checkpoint,
    /// Taken by the executor right after a failing step
    Failure,
}

/// A write-once screenshot artifact with its metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub label: String,
    pub kind: EvidenceKind,
    /// Step whose state this reflects
    pub step_index: Option<usize>,
    pub path: PathBuf,
    pub sha256: String,
    /// Pixel size, when the engine's bytes decode as an image
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub captured_at: DateTime<Utc>,
}

/// Writes evidence for one scenario run under
/// `<root>/<scenario>/<run>/NN-<label>.png`.
pub struct EvidenceRecorder {
    dir: PathBuf,
    sequence: u32,
    unsafe_chars: Regex,
    records: Vec<Evidence>,
}

impl EvidenceRecorder {
    pub fn new(root: impl AsRef<Path>, scenario: &str, run_id: &str) -> E2eResult<Self> {
        let unsafe_chars = Regex::new(r"[^\p{L}\p{N}_-]+")
            .map_err(|e| E2eError::Config(format!("evidence label pattern: {}", e)))?;
        let dir = root
            .as_ref()
            .join(sanitize(&unsafe_chars, scenario))
            .join(sanitize(&unsafe_chars, run_id));
        Ok(Self {
            dir,
            sequence: 0,
            unsafe_chars,
            records: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Everything captured so far, in order
    pub fn records(&self) -> &[Evidence] {
        &self.records
    }

    /// Snapshot the session's current document.
    ///
    /// Fails with `CaptureAfterTeardown` once the session is closed. Never
    /// overwrites an existing file. Bytes that do not decode are still
    /// written; only the dimensions are left out.
    pub async fn capture(
        &mut self,
        session: &Session,
        label: &str,
        kind: EvidenceKind,
        step_index: Option<usize>,
    ) -> E2eResult<Evidence> {
        if session.is_closed() {
            return Err(E2eError::CaptureAfterTeardown { label: label.to_string() });
        }

        let png = session.page().screenshot().await?;
        let dimensions = match image::load_from_memory(&png) {
            Ok(decoded) => Some((decoded.width(), decoded.height())),
            Err(e) => {
                debug!(label, "screenshot does not decode: {}", e);
                None
            }
        };

        self.sequence += 1;
        let file_name = format!("{:02}-{}.png", self.sequence, sanitize(&self.unsafe_chars, label));
        let path = self.dir.join(file_name);

        std::fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        file.write_all(&png)?;
        file.sync_all()?;

        let evidence = Evidence {
            label: label.to_string(),
            kind,
            step_index,
            path,
            sha256: hex::encode(Sha256::digest(&png)),
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
            captured_at: Utc::now(),
        };
        info!(label, kind = ?kind, path = %evidence.path.display(), "evidence captured");
        self.records.push(evidence.clone());
        Ok(evidence)
    }
}

fn sanitize(pattern: &Regex, label: &str) -> String {
    let cleaned = pattern.replace_all(label.trim(), "-");
    let cleaned = cleaned.trim_matches('-');
    if cleaned.is_empty() {
        "capture".to_string()
    } else {
        cleaned.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Driver, Viewport};
    use crate::environment::EnvironmentState;
    use crate::sim::{SimDocument, SimDriver};
    use tempfile::TempDir;

    async fn session(driver: &SimDriver) -> Session {
        let page = driver.open_page(Viewport::new(375, 812)).await.unwrap();
        Session::new(page, EnvironmentState::new("http://localhost:3000", Viewport::new(375, 812)))
    }

    #[test]
    fn test_sanitize_keeps_unicode_words() {
        let pattern = Regex::new(r"[^\p{L}\p{N}_-]+").unwrap();
        assert_eq!(sanitize(&pattern, "Mobile Drawer / open"), "mobile-drawer-open");
        assert_eq!(sanitize(&pattern, "ロゴ 追加"), "ロゴ-追加");
        assert_eq!(sanitize(&pattern, "///"), "capture");
    }

    #[tokio::test]
    async fn test_capture_writes_numbered_files() {
        let root = TempDir::new().unwrap();
        let driver = SimDriver::new(SimDocument::new());
        let session = session(&driver).await;
        let mut recorder = EvidenceRecorder::new(root.path(), "adaptive ui", "run-1").unwrap();

        let first = recorder
            .capture(&session, "drawer open", EvidenceKind::Checkpoint, Some(4))
            .await
            .unwrap();
        let second = recorder
            .capture(&session, "drawer open", EvidenceKind::Checkpoint, Some(5))
            .await
            .unwrap();

        assert!(first.path.ends_with("adaptive-ui/run-1/01-drawer-open.png"));
        assert!(second.path.ends_with("02-drawer-open.png"));
        assert_eq!(first.sha256.len(), 64);
        assert_eq!((first.width, first.height), (Some(23), Some(50)));
        assert_eq!(recorder.records().len(), 2);
    }

    #[tokio::test]
    async fn test_undecodable_screenshot_is_still_written() {
        let root = TempDir::new().unwrap();
        let driver = SimDriver::new(SimDocument::new().raw_screenshots(b"\x89PNG truncated"));
        let session = session(&driver).await;
        let mut recorder = EvidenceRecorder::new(root.path(), "s", "r").unwrap();

        let evidence = recorder
            .capture(&session, "opaque", EvidenceKind::Failure, Some(2))
            .await
            .unwrap();
        assert_eq!((evidence.width, evidence.height), (None, None));
        assert_eq!(std::fs::read(&evidence.path).unwrap(), b"\x89PNG truncated");
        assert_eq!(evidence.sha256, hex::encode(Sha256::digest(b"\x89PNG truncated")));
    }

    #[tokio::test]
    async fn test_capture_after_teardown() {
        let root = TempDir::new().unwrap();
        let driver = SimDriver::new(SimDocument::new());
        let mut session = session(&driver).await;
        let mut recorder = EvidenceRecorder::new(root.path(), "s", "r").unwrap();

        session.close().await.unwrap();
        let err = recorder
            .capture(&session, "late", EvidenceKind::Checkpoint, None)
            .await
            .unwrap_err();
        assert!(matches!(err, E2eError::CaptureAfterTeardown { .. }));
        assert_eq!(driver.stats().screenshots, 0);
    }
}
