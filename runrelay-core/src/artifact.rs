//! Artifact bundles: a manifest of a directory tree plus its zip packaging.

use crate::error::ArtifactError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// One file inside an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
    /// Path relative to the artifact root, `/`-separated.
    pub path: String,
    pub size_bytes: u64,
    pub sha256: String,
}

/// A named, typed snapshot of a directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Directory the files were collected from.
    pub root: PathBuf,
    pub files: Vec<ArtifactFile>,
    /// SHA-256 over every `(path, sha256)` pair, in manifest order.
    pub digest: String,
}

impl Artifact {
    /// Build a manifest of every regular file under `root`, sorted by path.
    pub fn from_dir(name: &str, kind: &str, root: &Path) -> Result<Self, ArtifactError> {
        if !root.is_dir() {
            return Err(ArtifactError::MissingSource {
                path: root.to_path_buf(),
            });
        }

        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| ArtifactError::Walk {
                path: root.to_path_buf(),
                message: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let (sha256, size_bytes) = hash_file(entry.path())?;
            files.push(ArtifactFile {
                path: relative,
                size_bytes,
                sha256,
            });
        }

        if files.is_empty() {
            return Err(ArtifactError::Empty {
                path: root.to_path_buf(),
            });
        }

        let mut hasher = Sha256::new();
        for file in &files {
            hasher.update(file.path.as_bytes());
            hasher.update([0u8]);
            hasher.update(file.sha256.as_bytes());
            hasher.update([b'\n']);
        }

        Ok(Self {
            name: name.to_string(),
            kind: kind.to_string(),
            root: root.to_path_buf(),
            files,
            digest: format!("{:x}", hasher.finalize()),
        })
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }

    /// Write every manifest file into a deflated zip archive at `dest`.
    pub fn package(&self, dest: &Path) -> Result<PathBuf, ArtifactError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let archive_err = |message: String| ArtifactError::Archive {
            path: dest.to_path_buf(),
            message,
        };

        let file = std::fs::File::create(dest)?;
        let mut zip = zip::ZipWriter::new(file);
        for entry in &self.files {
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated)
                .large_file(entry.size_bytes >= u64::from(u32::MAX));
            zip.start_file(entry.path.as_str(), options)
                .map_err(|e| archive_err(e.to_string()))?;
            let mut source = std::fs::File::open(self.root.join(&entry.path))?;
            std::io::copy(&mut source, &mut zip)?;
        }
        let mut inner = zip.finish().map_err(|e| archive_err(e.to_string()))?;
        inner.flush()?;

        tracing::debug!(
            artifact = %self.name,
            files = self.files.len(),
            archive = %dest.display(),
            "Packaged artifact"
        );
        Ok(dest.to_path_buf())
    }
}

fn hash_file(path: &Path) -> Result<(String, u64), ArtifactError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("vocabulary")).unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"lr":0.1}"#).unwrap();
        std::fs::write(dir.path().join("weights.th"), vec![7u8; 2048]).unwrap();
        std::fs::write(dir.path().join("vocabulary/labels.txt"), "O\nB-PER\n").unwrap();
        dir
    }

    #[test]
    fn test_manifest_is_sorted_and_relative() {
        let dir = sample_dir();
        let artifact = Artifact::from_dir("model", "model", dir.path()).unwrap();
        let paths: Vec<_> = artifact.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["config.json", "vocabulary/labels.txt", "weights.th"]);
        assert_eq!(artifact.total_size(), 10 + 8 + 2048);
        assert_eq!(artifact.kind, "model");
    }

    #[test]
    fn test_digest_changes_with_content() {
        let dir = sample_dir();
        let before = Artifact::from_dir("model", "model", dir.path()).unwrap();
        std::fs::write(dir.path().join("weights.th"), vec![8u8; 2048]).unwrap();
        let after = Artifact::from_dir("model", "model", dir.path()).unwrap();
        assert_ne!(before.digest, after.digest);
    }

    #[test]
    fn test_empty_dir_is_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Artifact::from_dir("model", "model", dir.path()),
            Err(ArtifactError::Empty { .. })
        ));
    }

    #[test]
    fn test_missing_dir_is_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Artifact::from_dir("model", "model", &dir.path().join("gone")),
            Err(ArtifactError::MissingSource { .. })
        ));
    }

    #[test]
    fn test_package_contains_every_file() {
        let dir = sample_dir();
        let out = TempDir::new().unwrap();
        let artifact = Artifact::from_dir("model", "model", dir.path()).unwrap();
        let archive = artifact.package(&out.path().join("model.zip")).unwrap();

        let mut zip = zip::ZipArchive::new(std::fs::File::open(archive).unwrap()).unwrap();
        assert_eq!(zip.len(), 3);
        let mut labels = String::new();
        zip.by_name("vocabulary/labels.txt")
            .unwrap()
            .read_to_string(&mut labels)
            .unwrap();
        assert_eq!(labels, "O\nB-PER\n");
    }
}
