use std::fs;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::MediaConfig;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Image pools under the media root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFolder {
    General,
    FaceScan,
    Signature,
}

impl MediaFolder {
    pub const fn subdirectory(self) -> Option<&'static str> {
        match self {
            Self::General => None,
            Self::FaceScan => Some("face_scan"),
            Self::Signature => Some("signature"),
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::FaceScan => "face_scan",
            Self::Signature => "signature",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("media folder not found: {}", .0.display())]
    MissingFolder(PathBuf),
    #[error("no .jpg/.jpeg/.png images in {}", .0.display())]
    NoImages(PathBuf),
    #[error("unable to list {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("sample sheet '{file_name}' not found under {}", .root.display())]
    SheetNotFound { file_name: String, root: PathBuf },
}

/// Local files fed to upload fields: images by folder and sample spreadsheets by name.
#[derive(Debug, Clone)]
pub struct MediaLibrary {
    root: PathBuf,
    sample_data_dir: PathBuf,
}

impl MediaLibrary {
    pub fn new(root: impl Into<PathBuf>, sample_data_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sample_data_dir: sample_data_dir.into(),
        }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self::new(&config.media_root, &config.sample_data_dir)
    }

    pub fn folder_path(&self, folder: MediaFolder) -> PathBuf {
        match folder.subdirectory() {
            Some(sub) => self.root.join(sub),
            None => self.root.clone(),
        }
    }

    pub fn random_image<R: Rng + ?Sized>(
        &self,
        folder: MediaFolder,
        rng: &mut R,
    ) -> Result<PathBuf, MediaError> {
        let dir = self.folder_path(folder);
        if !dir.is_dir() {
            return Err(MediaError::MissingFolder(dir));
        }
        let entries = fs::read_dir(&dir).map_err(|source| MediaError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut images: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_image(path))
            .collect();
        images.sort();

        images
            .choose(rng)
            .cloned()
            .ok_or(MediaError::NoImages(dir))
    }

    /// Finds a sample sheet: `<sample dir>/<folder>/<file>` first, then anywhere below the sample dir.
    pub fn find_sample_sheet(&self, folder: &str, file_name: &str) -> Result<PathBuf, MediaError> {
        let direct = self.sample_data_dir.join(folder).join(file_name);
        if direct.is_file() {
            return Ok(direct);
        }
        search(&self.sample_data_dir, file_name)?.ok_or_else(|| MediaError::SheetNotFound {
            file_name: file_name.to_string(),
            root: self.sample_data_dir.clone(),
        })
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

fn search(dir: &Path, file_name: &str) -> Result<Option<PathBuf>, MediaError> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let entries = fs::read_dir(dir).map_err(|source| MediaError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut children: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .collect();
    children.sort();

    for child in &children {
        if child.is_file() && child.file_name().is_some_and(|name| name == file_name) {
            return Ok(Some(child.clone()));
        }
    }
    for child in children.iter().filter(|child| child.is_dir()) {
        if let Some(found) = search(child, file_name)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, b"x").expect("write");
    }

    #[test]
    fn random_image_only_returns_images() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(&dir.path().join("face_scan/one.JPG"));
        touch(&dir.path().join("face_scan/notes.txt"));
        let library = MediaLibrary::new(dir.path(), dir.path().join("samples"));
        let mut rng = StdRng::seed_from_u64(11);

        let picked = library
            .random_image(MediaFolder::FaceScan, &mut rng)
            .expect("image found");
        assert_eq!(picked.file_name().and_then(|n| n.to_str()), Some("one.JPG"));
    }

    #[test]
    fn missing_and_empty_folders_are_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(&dir.path().join("readme.md"));
        let library = MediaLibrary::new(dir.path(), dir.path());
        let mut rng = StdRng::seed_from_u64(11);

        assert!(matches!(
            library.random_image(MediaFolder::Signature, &mut rng),
            Err(MediaError::MissingFolder(_))
        ));
        assert!(matches!(
            library.random_image(MediaFolder::General, &mut rng),
            Err(MediaError::NoImages(_))
        ));
    }

    #[test]
    fn sample_sheet_falls_back_to_recursive_search() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(&dir.path().join("elsewhere/nested/input.xlsx"));
        let library = MediaLibrary::new(dir.path(), dir.path());

        let found = library
            .find_sample_sheet("expected", "input.xlsx")
            .expect("found recursively");
        assert!(found.ends_with("elsewhere/nested/input.xlsx"));
        assert!(matches!(
            library.find_sample_sheet("expected", "missing.xlsx"),
            Err(MediaError::SheetNotFound { .. })
        ));
    }
}
