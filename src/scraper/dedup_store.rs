//! Per-class storage of scraped images
//!
//! Every image is stored once under `<class_folder>/realfiles/<c>/<name>`,
//! where `<c>` is the first character of the normalized name. The class folder
//! itself only holds symbolic links into that tree, one per image.

use std::io;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

/// Folder inside a class folder that holds the physical files.
pub const REAL_FILES_DIR: &str = "realfiles";

/// Longest raw filename kept as is.
pub const MAX_FILENAME_LEN: usize = 200;

/// Longest extension carried over onto a hashed filename.
const MAX_EXTENSION_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum DedupError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("filename {0:?} cannot be stored")]
    InvalidName(String),
}

pub type DedupResult<T> = Result<T, DedupError>;

/// Last path segment of a URL with any query string dropped.
pub fn filename_from_url(url: &str) -> &str {
    let last = url.rsplit('/').next().unwrap_or(url);
    last.split('?').next().unwrap_or(last)
}

fn is_unsafe(name: &str) -> bool {
    // The store itself lives inside the class folder under this name
    name.eq_ignore_ascii_case(REAL_FILES_DIR)
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
        || name.len() > MAX_FILENAME_LEN
        || !name.is_ascii()
}

/// Replaces names that could escape the class folder or upset a filesystem by
/// `<sha1 of the raw name>.<original extension>`.
pub fn sanitize_filename(raw: &str) -> String {
    if !is_unsafe(raw) {
        return raw.to_string();
    }

    let digest = hex::encode(Sha1::digest(raw.as_bytes()));
    let extension = raw.rsplit('.').next().unwrap_or(raw);
    let hashed = if extension.is_empty() || extension.len() > MAX_EXTENSION_LEN || is_unsafe(extension) {
        digest
    } else {
        format!("{}.{}", digest, extension)
    };

    info!("renaming file: {} --> {}", raw, hashed);
    hashed
}

/// Lowercased so that names differing only in case share one physical file.
pub fn normalize_filename(name: &str) -> String {
    name.to_lowercase()
}

/// Local name for the image behind `url`, or `None` when nothing usable is left.
pub fn local_filename(url: &str) -> Option<String> {
    let name = normalize_filename(&sanitize_filename(filename_from_url(url)));
    if name.len() <= 1 { None } else { Some(name) }
}

/// Where one image lives and where its class-view link goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub name: String,
    pub physical_path: PathBuf,
    pub link_path: PathBuf,
    /// Link target, relative to the class folder.
    pub link_target: PathBuf,
}

/// Storage layout of one class folder.
#[derive(Debug, Clone)]
pub struct DedupStore {
    class_folder: PathBuf,
    dedup_root: PathBuf,
}

impl DedupStore {
    pub fn new(class_folder: impl Into<PathBuf>) -> Self {
        let class_folder = class_folder.into();
        let dedup_root = class_folder.join(REAL_FILES_DIR);
        Self {
            class_folder,
            dedup_root,
        }
    }

    #[cfg(test)]
    pub fn class_folder(&self) -> &Path {
        &self.class_folder
    }

    #[cfg(test)]
    pub fn dedup_root(&self) -> &Path {
        &self.dedup_root
    }

    /// Physical and link locations for an already normalized filename.
    pub fn resolve(&self, filename: &str) -> DedupResult<StoredImage> {
        let first = filename
            .chars()
            .next()
            .ok_or_else(|| DedupError::InvalidName(filename.to_string()))?;
        let shard = first.to_string();

        Ok(StoredImage {
            name: filename.to_string(),
            physical_path: self.dedup_root.join(&shard).join(filename),
            link_path: self.class_folder.join(filename),
            link_target: Path::new(REAL_FILES_DIR).join(&shard).join(filename),
        })
    }

    /// Creates the shard folder that will receive the physical file.
    pub async fn prepare(&self, image: &StoredImage) -> DedupResult<()> {
        if let Some(parent) = image.physical_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// True when the link resolves to an existing regular file.
    pub async fn link_exists(&self, image: &StoredImage) -> bool {
        fs::metadata(&image.link_path)
            .await
            .is_ok_and(|meta| meta.is_file())
    }

    pub async fn physical_exists(&self, image: &StoredImage) -> bool {
        fs::try_exists(&image.physical_path).await.unwrap_or(false)
    }

    /// Creates the class-view link unless something already sits at its path.
    /// Losing a creation race to another worker counts as success.
    pub async fn ensure_link(&self, image: &StoredImage) -> DedupResult<()> {
        if let Ok(meta) = fs::symlink_metadata(&image.link_path).await {
            if meta.is_dir() {
                return Err(DedupError::InvalidName(image.name.clone()));
            }
            return Ok(());
        }

        match create_link(&image.link_target, &image.link_path).await {
            Ok(()) => {
                debug!("Linked {} -> {}", image.link_path.display(), image.link_target.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(DedupError::Io(e)),
        }
    }
}

#[cfg(unix)]
async fn create_link(target: &Path, link: &Path) -> io::Result<()> {
    fs::symlink(target, link).await
}

#[cfg(windows)]
async fn create_link(target: &Path, link: &Path) -> io::Result<()> {
    fs::symlink_file(target, link).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_filename_from_url() {
        assert_eq!(filename_from_url("http://a.com/x/y/Cat.JPG?size=large"), "Cat.JPG");
        assert_eq!(filename_from_url("http://a.com/x/"), "");
        assert_eq!(filename_from_url("plain.png"), "plain.png");
    }

    #[test]
    fn test_safe_names_are_kept() {
        assert_eq!(sanitize_filename("123_abc.jpg"), "123_abc.jpg");
        assert_eq!(sanitize_filename(&"a".repeat(200)), "a".repeat(200));
    }

    #[test]
    fn test_unsafe_names_are_hashed() {
        let cases = [
            "..hidden.jpg".to_string(),
            "a\\b.png".to_string(),
            "a/b.gif".to_string(),
            format!("{}.jpg", "x".repeat(201)),
            "caf\u{e9}.jpeg".to_string(),
        ];

        for raw in cases {
            let hashed = sanitize_filename(&raw);
            let digest = hex::encode(Sha1::digest(raw.as_bytes()));
            let extension = raw.rsplit('.').next().unwrap();
            assert_eq!(hashed, format!("{}.{}", digest, extension), "raw name {:?}", raw);
            assert!(hashed.is_ascii());
        }
    }

    #[test]
    fn test_hashing_is_deterministic() {
        let raw = "\u{65e5}\u{672c}.png";
        assert_eq!(sanitize_filename(raw), sanitize_filename(raw));
        assert_ne!(sanitize_filename(raw), sanitize_filename("\u{65e5}.png"));
    }

    #[test]
    fn test_unsafe_extension_is_dropped() {
        let raw = "\u{65e5}\u{672c}";
        let hashed = sanitize_filename(raw);
        assert_eq!(hashed.len(), 40);
        assert!(hashed.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_store_folder_name_is_hashed() {
        for raw in ["realfiles", "RealFiles", "REALFILES"] {
            let name = local_filename(&format!("http://a.com/12/{}", raw)).unwrap();
            assert_ne!(name, REAL_FILES_DIR);
            assert_eq!(name.len(), 40);
        }
        assert_eq!(sanitize_filename("realfiles.jpg"), "realfiles.jpg");
    }

    #[tokio::test]
    async fn test_directory_is_not_a_link() {
        let dir = tempdir().unwrap();
        let store = DedupStore::new(dir.path());
        std::fs::create_dir_all(dir.path().join("folder.jpg")).unwrap();
        let image = store.resolve("folder.jpg").unwrap();

        assert!(!store.link_exists(&image).await);
        assert!(matches!(
            store.ensure_link(&image).await,
            Err(DedupError::InvalidName(_))
        ));
    }

    #[test]
    fn test_local_filename() {
        assert_eq!(local_filename("http://a.com/IMG_01.JPG").as_deref(), Some("img_01.jpg"));
        assert_eq!(local_filename("http://a.com/x"), None);
        assert_eq!(local_filename("http://a.com/"), None);
    }

    #[test]
    fn test_resolve_layout() {
        let store = DedupStore::new("/data/imagenet_images/n1___tench");
        let image = store.resolve("abc.jpg").unwrap();

        assert_eq!(
            image.physical_path,
            PathBuf::from("/data/imagenet_images/n1___tench/realfiles/a/abc.jpg")
        );
        assert_eq!(image.link_path, PathBuf::from("/data/imagenet_images/n1___tench/abc.jpg"));
        assert_eq!(image.link_target, PathBuf::from("realfiles/a/abc.jpg"));
        assert!(store.resolve("").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ensure_link_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = DedupStore::new(dir.path());
        let image = store.resolve("photo.jpg").unwrap();

        store.prepare(&image).await.unwrap();
        fs::write(&image.physical_path, b"bytes").await.unwrap();
        assert!(!store.link_exists(&image).await);

        store.ensure_link(&image).await.unwrap();
        store.ensure_link(&image).await.unwrap();

        assert!(store.link_exists(&image).await);
        let target = std::fs::read_link(&image.link_path).unwrap();
        assert_eq!(target, PathBuf::from("realfiles/p/photo.jpg"));
        assert_eq!(std::fs::read(&image.link_path).unwrap(), b"bytes");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_concurrent_link_creation_all_succeed() {
        let dir = tempdir().unwrap();
        let store = DedupStore::new(dir.path());
        let image = store.resolve("race.png").unwrap();
        store.prepare(&image).await.unwrap();
        fs::write(&image.physical_path, b"bytes").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let image = image.clone();
            handles.push(tokio::spawn(async move { store.ensure_link(&image).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(store.link_exists(&image).await);
    }
}
