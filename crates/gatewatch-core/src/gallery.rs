//! On-disk gallery of known subjects.
//!
//! Layout: `<root>/<subject>/<uuid>.jpg`, plus a cached embedding index at
//! `<root>/representations.json`. Registering a new image deletes the cached
//! index so the next match re-embeds the whole gallery.

use crate::engine::{Embedder, EngineError};
use crate::types::{GalleryEntry, UNKNOWN_SUBJECT};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the persisted embedding index inside the gallery root.
pub const INDEX_FILE: &str = "representations.json";

const JPEG_QUALITY: u8 = 90;
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("invalid subject name: {0:?}")]
    InvalidName(String),
    #[error("gallery io: {0}")]
    Io(#[from] std::io::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

/// Subject folders plus a lazily built embedding index.
pub struct Gallery {
    root: PathBuf,
    index: Option<Vec<GalleryEntry>>,
}

impl Gallery {
    /// Open (creating if needed) the gallery rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, GalleryError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, index: None })
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Store a reference image for `name` and invalidate the embedding index.
    pub fn register(&mut self, name: &str, image: &DynamicImage) -> Result<PathBuf, GalleryError> {
        let name = validate_subject_name(name)?;
        let subject_dir = self.root.join(name);
        std::fs::create_dir_all(&subject_dir)?;

        let path = subject_dir.join(format!("{}.jpg", uuid::Uuid::new_v4()));
        std::fs::write(&path, encode_jpeg(image, JPEG_QUALITY)?)?;

        self.invalidate()?;
        tracing::info!(subject = name, path = %path.display(), "registered reference image");
        Ok(path)
    }

    /// Drop the in-memory index and delete the persisted one.
    pub fn invalidate(&mut self) -> Result<(), GalleryError> {
        self.index = None;
        match std::fs::remove_file(self.index_path()) {
            Ok(()) => {
                tracing::debug!("embedding index invalidated");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of subject folders.
    pub fn subject_count(&self) -> Result<usize, GalleryError> {
        Ok(self.subject_dirs()?.len())
    }

    fn subject_dirs(&self) -> Result<Vec<(String, PathBuf)>, GalleryError> {
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                dirs.push((name.to_string(), entry.path()));
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// The embedding index, loading it from disk or building it on first use.
    ///
    /// Engine failures abort the build and leave no index behind, so a
    /// transient outage cannot persist an empty gallery.
    pub fn entries<E: Embedder + ?Sized>(
        &mut self,
        embedder: &mut E,
    ) -> Result<&[GalleryEntry], EngineError> {
        let entries = match self.index.take() {
            Some(entries) => entries,
            None => match self.load_index() {
                Some(entries) => entries,
                None => {
                    let built = self.build_index(embedder)?;
                    self.persist_index(&built);
                    built
                }
            },
        };
        Ok(self.index.insert(entries).as_slice())
    }

    fn load_index(&self) -> Option<Vec<GalleryEntry>> {
        let raw = std::fs::read(self.index_path()).ok()?;
        match serde_json::from_slice::<Vec<GalleryEntry>>(&raw) {
            Ok(entries) => {
                tracing::debug!(entries = entries.len(), "loaded embedding index");
                Some(entries)
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding index unreadable; rebuilding");
                None
            }
        }
    }

    fn persist_index(&self, entries: &[GalleryEntry]) {
        let result = serde_json::to_vec(entries)
            .map_err(std::io::Error::other)
            .and_then(|raw| std::fs::write(self.index_path(), raw));
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to persist embedding index");
        }
    }

    fn build_index<E: Embedder + ?Sized>(
        &self,
        embedder: &mut E,
    ) -> Result<Vec<GalleryEntry>, EngineError> {
        let mut entries = Vec::new();

        for (subject, dir) in self.subject_dirs()? {
            let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
                .map_err(GalleryError::from)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| is_image_file(p))
                .collect();
            files.sort();

            for path in files {
                let image = match image::open(&path) {
                    Ok(image) => image,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable reference image");
                        continue;
                    }
                };
                let Some(embedding) = embedder.embed(&image)? else {
                    tracing::warn!(path = %path.display(), "no face in reference image; skipping");
                    continue;
                };
                let source = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                entries.push(GalleryEntry {
                    subject: subject.clone(),
                    source,
                    embedding,
                });
            }
        }

        tracing::info!(entries = entries.len(), "embedding index built");
        Ok(entries)
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|ext| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Check that `name` can be used as a subject folder name.
///
/// Names starting with `.` and the index file name are reserved so a subject
/// folder can never shadow gallery metadata.
pub fn validate_subject_name(name: &str) -> Result<&str, GalleryError> {
    let trimmed = name.trim();
    let invalid = trimmed.is_empty()
        || trimmed.starts_with('.')
        || trimmed.eq_ignore_ascii_case(INDEX_FILE)
        || trimmed == UNKNOWN_SUBJECT
        || trimmed.contains(|c| matches!(c, '/' | '\\' | '\0'));
    if invalid {
        return Err(GalleryError::InvalidName(name.to_string()));
    }
    Ok(trimmed)
}

/// Encode an image as baseline JPEG.
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let rgb = image.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(&rgb)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Embedding;
    use image::{Rgb, RgbImage};

    /// Embeds every image as its top-left pixel colour.
    struct PixelEmbedder {
        calls: usize,
    }

    impl Embedder for PixelEmbedder {
        fn embed(&mut self, image: &DynamicImage) -> Result<Option<Embedding>, EngineError> {
            self.calls += 1;
            let px = image.to_rgb8().get_pixel(0, 0).0;
            Ok(Some(Embedding {
                values: px.iter().map(|&v| f32::from(v)).collect(),
            }))
        }
    }

    fn solid(r: u8, g: u8, b: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([r, g, b])))
    }

    #[test]
    fn test_validate_subject_name() {
        assert_eq!(validate_subject_name(" alice ").unwrap(), "alice");
        assert!(validate_subject_name("").is_err());
        assert!(validate_subject_name("..").is_err());
        assert!(validate_subject_name(".hidden").is_err());
        assert!(validate_subject_name(INDEX_FILE).is_err());
        assert!(validate_subject_name("a/b").is_err());
        assert!(validate_subject_name("Unknown").is_err());
    }

    #[test]
    fn test_register_creates_subject_folder() {
        let dir = tempfile::tempdir().unwrap();
        let mut gallery = Gallery::open(dir.path()).unwrap();

        let path = gallery.register("alice", &solid(255, 0, 0)).unwrap();
        assert!(path.starts_with(dir.path().join("alice")));
        assert_eq!(path.extension().unwrap(), "jpg");
        assert_eq!(gallery.subject_count().unwrap(), 1);

        gallery.register("bob", &solid(0, 0, 255)).unwrap();
        gallery.register("alice", &solid(250, 5, 5)).unwrap();
        assert_eq!(gallery.subject_count().unwrap(), 2);
    }

    #[test]
    fn test_index_file_name_cannot_become_a_subject() {
        let dir = tempfile::tempdir().unwrap();
        let mut gallery = Gallery::open(dir.path()).unwrap();

        let err = gallery.register(INDEX_FILE, &solid(9, 9, 9)).unwrap_err();
        assert!(matches!(err, GalleryError::InvalidName(_)));
        assert!(!dir.path().join(INDEX_FILE).exists());

        // Later registrations and invalidations keep working
        gallery.register("bob", &solid(0, 0, 255)).unwrap();
        assert_eq!(gallery.subject_count().unwrap(), 1);
    }

    #[test]
    fn test_index_is_cached_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let mut gallery = Gallery::open(dir.path()).unwrap();
        gallery.register("alice", &solid(255, 255, 255)).unwrap();

        let mut embedder = PixelEmbedder { calls: 0 };
        assert_eq!(gallery.entries(&mut embedder).unwrap().len(), 1);
        assert_eq!(embedder.calls, 1);
        assert!(dir.path().join(INDEX_FILE).exists());

        // Second call hits the in-memory index
        gallery.entries(&mut embedder).unwrap();
        assert_eq!(embedder.calls, 1);

        // A fresh gallery reloads the persisted index
        let mut reopened = Gallery::open(dir.path()).unwrap();
        assert_eq!(reopened.entries(&mut embedder).unwrap()[0].subject, "alice");
        assert_eq!(embedder.calls, 1);
    }

    #[test]
    fn test_register_invalidates_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut gallery = Gallery::open(dir.path()).unwrap();
        gallery.register("alice", &solid(255, 255, 255)).unwrap();

        let mut embedder = PixelEmbedder { calls: 0 };
        gallery.entries(&mut embedder).unwrap();

        gallery.register("bob", &solid(0, 0, 0)).unwrap();
        assert!(!dir.path().join(INDEX_FILE).exists());

        let entries = gallery.entries(&mut embedder).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(embedder.calls, 3);
    }

    #[test]
    fn test_build_skips_unreadable_images() {
        let dir = tempfile::tempdir().unwrap();
        let mut gallery = Gallery::open(dir.path()).unwrap();
        gallery.register("alice", &solid(10, 10, 10)).unwrap();
        std::fs::write(dir.path().join("alice").join("broken.jpg"), b"not a jpeg").unwrap();
        std::fs::write(dir.path().join("alice").join("notes.txt"), b"ignored").unwrap();

        let mut embedder = PixelEmbedder { calls: 0 };
        assert_eq!(gallery.entries(&mut embedder).unwrap().len(), 1);
    }

    #[test]
    fn test_engine_failure_leaves_no_index() {
        struct Failing;
        impl Embedder for Failing {
            fn embed(&mut self, _: &DynamicImage) -> Result<Option<Embedding>, EngineError> {
                Err(EngineError::Request("connection refused".into()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut gallery = Gallery::open(dir.path()).unwrap();
        gallery.register("alice", &solid(1, 2, 3)).unwrap();

        assert!(gallery.entries(&mut Failing).is_err());
        assert!(!dir.path().join(INDEX_FILE).exists());
    }
}
