use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::eid::Eid;
use crate::images;

/// Default accepted enrollment image extensions
pub const DEFAULT_EXTENSIONS: &[&str] = &["png", "jpg"];

/// Enrollment directory laid out as `root/<identity>/<image>`.
#[derive(Clone, Debug)]
pub struct EnrollmentStorage {
    pub root: PathBuf,
    extensions: Vec<String>,
}

impl EnrollmentStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_extensions(root, DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()))
    }

    pub fn with_extensions(
        root: impl Into<PathBuf>,
        extensions: impl IntoIterator<Item = String>,
    ) -> Self {
        EnrollmentStorage {
            root: root.into(),
            extensions: extensions.into_iter().map(|e| e.to_lowercase()).collect(),
        }
    }

    /// Identity folder names, sorted. Hidden folders are not identities.
    ///
    /// Fails when the root itself cannot be read.
    pub fn identities(&self) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)?.filter_map(|entry| entry.ok()) {
            if !entry.path().is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if name.starts_with('.') => {}
                Ok(name) => names.push(name),
                Err(raw) => log::warn!("Skipping identity folder with non UTF-8 name {raw:?}"),
            }
        }
        names.sort();
        Ok(names)
    }

    /// Enrollment images of `identity` with an accepted extension, sorted.
    pub fn images(&self, identity: &str) -> std::io::Result<Vec<PathBuf>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(self.root.join(identity))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && self.is_accepted(path))
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn is_accepted(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    /// Persist an enrollment face under `identity` as a new PNG file.
    pub fn save_face(&self, identity: &str, face: &RgbImage) -> anyhow::Result<PathBuf> {
        validate_identity(identity)?;

        let dir = self.root.join(identity);
        std::fs::create_dir_all(&dir)?;

        let name = format!("{}.png", Eid::new());
        let path = dir.join(&name);
        let temp_path = dir.join(format!(".{name}.tmp"));

        std::fs::write(&temp_path, images::encode_png(face)?)?;
        std::fs::rename(&temp_path, &path)?;

        Ok(path)
    }
}

fn validate_identity(identity: &str) -> anyhow::Result<()> {
    if identity.trim().is_empty()
        || identity.starts_with('.')
        || identity.contains(['/', '\\'])
    {
        anyhow::bail!("invalid identity name {identity:?}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_identities_sorted_dirs_only() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("zoe")).unwrap();
        std::fs::create_dir_all(tmp.path().join("adam")).unwrap();
        touch(&tmp.path().join("stray.png"));

        let storage = EnrollmentStorage::new(tmp.path());

        assert_eq!(storage.identities().unwrap(), vec!["adam", "zoe"]);
    }

    #[test]
    fn test_hidden_folders_are_not_identities() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join(".hidden/1.png"));
        touch(&tmp.path().join("eve/1.png"));

        let storage = EnrollmentStorage::new(tmp.path());

        assert_eq!(storage.identities().unwrap(), vec!["eve"]);
        assert!(storage.save_face(".hidden", &RgbImage::new(2, 2)).is_err());
    }

    #[test]
    fn test_missing_root_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = EnrollmentStorage::new(tmp.path().join("nope"));
        assert!(storage.identities().is_err());
    }

    #[test]
    fn test_images_filtered_by_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("adam");
        touch(&dir.join("b.jpg"));
        touch(&dir.join("a.PNG"));
        touch(&dir.join("c.webp"));
        touch(&dir.join("notes.txt"));

        let storage = EnrollmentStorage::new(tmp.path());
        let images = storage.images("adam").unwrap();

        assert_eq!(images, vec![dir.join("a.PNG"), dir.join("b.jpg")]);
    }

    #[test]
    fn test_custom_extensions() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("adam");
        touch(&dir.join("c.webp"));
        touch(&dir.join("b.jpg"));

        let storage = EnrollmentStorage::with_extensions(tmp.path(), vec!["WEBP".to_string()]);

        assert_eq!(storage.images("adam").unwrap(), vec![dir.join("c.webp")]);
    }

    #[test]
    fn test_save_face_writes_png() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = EnrollmentStorage::new(tmp.path());
        let face = RgbImage::from_pixel(4, 4, image::Rgb([1, 2, 3]));

        let path = storage.save_face("eve", &face).unwrap();

        assert!(path.starts_with(tmp.path().join("eve")));
        assert_eq!(storage.images("eve").unwrap(), vec![path.clone()]);
        assert_eq!(image::open(&path).unwrap().to_rgb8(), face);
    }

    #[test]
    fn test_save_face_rejects_bad_names() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = EnrollmentStorage::new(tmp.path());
        let face = RgbImage::new(2, 2);

        assert!(storage.save_face("", &face).is_err());
        assert!(storage.save_face("../evil", &face).is_err());
        assert!(storage.save_face(".hidden", &face).is_err());
    }
}
