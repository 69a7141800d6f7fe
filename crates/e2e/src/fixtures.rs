//! Deterministic upload fixtures
//!
//! Every run gets its own namespace directory so concurrent scenarios never
//! share files. Within a namespace the content for a kind is always the same
//! bytes at the same path (`test.png`, `test.mp3`, ...), so repeated
//! synthesis is idempotent.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::E2eResult;

/// Kind of file a scenario needs to upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureKind {
    Image,
    Audio,
    Video,
    Document,
}

impl FixtureKind {
    pub fn extension(&self) -> &'static str {
        match self {
            FixtureKind::Image => "png",
            FixtureKind::Audio => "mp3",
            FixtureKind::Video => "mp4",
            FixtureKind::Document => "pdf",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            FixtureKind::Image => "image/png",
            FixtureKind::Audio => "audio/mpeg",
            FixtureKind::Video => "video/mp4",
            FixtureKind::Document => "application/pdf",
        }
    }

    pub fn file_name(&self) -> String {
        format!("test.{}", self.extension())
    }

    /// Canonical content for this kind.
    ///
    /// The image is a real 1x1 PNG. The others only carry a valid container
    /// signature; intake controls sniff headers, they do not decode.
    pub fn bytes(&self) -> E2eResult<Vec<u8>> {
        match self {
            FixtureKind::Image => {
                let pixel = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 255]));
                let mut bytes = Vec::new();
                DynamicImage::ImageRgba8(pixel)
                    .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)?;
                Ok(bytes)
            }
            // ID3v2.4 header, empty tag
            FixtureKind::Audio => Ok(b"ID3\x04\x00\x00\x00\x00\x00\x00".to_vec()),
            // ftyp box: size 24, brand isom
            FixtureKind::Video => {
                let mut bytes = vec![0x00, 0x00, 0x00, 0x18];
                bytes.extend_from_slice(b"ftypisom");
                bytes.extend_from_slice(&[0x00, 0x00, 0x02, 0x00]);
                bytes.extend_from_slice(b"isomiso2");
                Ok(bytes)
            }
            FixtureKind::Document => Ok(b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n%%EOF\n".to_vec()),
        }
    }
}

/// A fixture file on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    pub kind: FixtureKind,
    pub path: PathBuf,
    pub size: u64,
}

/// Writes fixture files into one run's namespace
#[derive(Debug, Clone)]
pub struct FixtureSynthesizer {
    dir: PathBuf,
}

impl FixtureSynthesizer {
    pub fn new(root: impl AsRef<Path>, namespace: &str) -> Self {
        Self {
            dir: root.as_ref().join(namespace),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write (or rewrite) the canonical file for `kind` and return it.
    pub fn synthesize(&self, kind: FixtureKind) -> E2eResult<Fixture> {
        std::fs::create_dir_all(&self.dir)?;
        let bytes = kind.bytes()?;
        let path = self.dir.join(kind.file_name());
        std::fs::write(&path, &bytes)?;
        debug!(path = %path.display(), "fixture synthesized");
        Ok(Fixture {
            kind,
            path,
            size: bytes.len() as u64,
        })
    }

    /// Remove the namespace directory. Missing directories are fine.
    pub fn cleanup(&self) {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(dir = %self.dir.display(), "fixtures removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %self.dir.display(), "failed to remove fixtures: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    #[test_case(FixtureKind::Image, "test.png" ; "image")]
    #[test_case(FixtureKind::Audio, "test.mp3" ; "audio")]
    #[test_case(FixtureKind::Video, "test.mp4" ; "video")]
    #[test_case(FixtureKind::Document, "test.pdf" ; "document")]
    fn test_file_names(kind: FixtureKind, expected: &str) {
        assert_eq!(kind.file_name(), expected);
    }

    #[test]
    fn test_image_fixture_decodes() {
        let bytes = FixtureKind::Image.bytes().unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1, 1));
    }

    #[test]
    fn test_synthesis_is_idempotent() {
        let root = TempDir::new().unwrap();
        let fixtures = FixtureSynthesizer::new(root.path(), "run-1");

        let first = fixtures.synthesize(FixtureKind::Audio).unwrap();
        let second = fixtures.synthesize(FixtureKind::Audio).unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(&first.path).unwrap(), FixtureKind::Audio.bytes().unwrap());
    }

    #[test]
    fn test_namespaces_are_isolated_and_cleaned() {
        let root = TempDir::new().unwrap();
        let a = FixtureSynthesizer::new(root.path(), "run-a");
        let b = FixtureSynthesizer::new(root.path(), "run-b");

        let fa = a.synthesize(FixtureKind::Image).unwrap();
        let fb = b.synthesize(FixtureKind::Image).unwrap();
        assert_ne!(fa.path, fb.path);

        a.cleanup();
        assert!(!fa.path.exists());
        assert!(fb.path.exists());
        // Second cleanup is a no-op
        a.cleanup();
    }
}
