//! Hash-addressed archive for raw prose inputs (research notes, provider responses).
//! Extraction is lossy, so the original text is kept for later re-extraction.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ArchivedText {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

#[derive(Debug, Clone)]
pub struct RawTextArchive {
    root: PathBuf,
}

impl RawTextArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// `<YYYYMMDD>/<source-slug>/<sha256>.txt`
    pub fn relative_path_for(&self, captured_at: DateTime<Utc>, source_label: &str, hash: &str) -> PathBuf {
        PathBuf::from(captured_at.format("%Y%m%d").to_string())
            .join(slug(source_label))
            .join(format!("{hash}.txt"))
    }

    /// Write `text` once; identical text from the same source on the same day is not rewritten.
    pub async fn store(
        &self,
        captured_at: DateTime<Utc>,
        source_label: &str,
        text: &str,
    ) -> anyhow::Result<ArchivedText> {
        let content_hash = Self::sha256_hex(text);
        let relative_path = self.relative_path_for(captured_at, source_label, &content_hash);
        let target = self.root.join(&relative_path);
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating archive directory {}", parent.display()))?;

        let archived = |deduplicated| ArchivedText {
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            byte_size: text.len(),
            deduplicated,
        };

        if fs::try_exists(&target)
            .await
            .with_context(|| format!("checking archive path {}", target.display()))?
        {
            return Ok(archived(true));
        }

        let temp_path = parent.join(format!(".{}.partial", Uuid::new_v4()));
        let mut file = fs::File::create(&temp_path)
            .await
            .with_context(|| format!("creating {}", temp_path.display()))?;
        file.write_all(text.as_bytes())
            .await
            .with_context(|| format!("writing {}", temp_path.display()))?;
        file.flush().await?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &target).await {
            let _ = fs::remove_file(&temp_path).await;
            if fs::try_exists(&target).await.unwrap_or(false) {
                return Ok(archived(true));
            }
            return Err(err).with_context(|| format!("moving archive into {}", target.display()));
        }
        Ok(archived(false))
    }

    pub async fn load(&self, relative_path: &Path) -> anyhow::Result<String> {
        let path = self.root.join(relative_path);
        fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading archived text {}", path.display()))
    }
}

fn slug(input: &str) -> String {
    let slug = input
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "unlabeled".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn hashing_is_stable() {
        assert_eq!(
            RawTextArchive::sha256_hex("hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn identical_text_is_written_once() {
        let dir = tempdir().expect("tempdir");
        let archive = RawTextArchive::new(dir.path());
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).single().unwrap();
        let text = "1969 Chevrolet Camaro SS - $135,000";

        let first = archive.store(at, "West Coast Restomods", text).await.unwrap();
        let second = archive.store(at, "West Coast Restomods", text).await.unwrap();

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.relative_path, second.relative_path);
        assert!(first.relative_path.starts_with("20260301/west-coast-restomods"));
        assert_eq!(archive.load(&first.relative_path).await.unwrap(), text);
    }
}
