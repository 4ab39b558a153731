//! Public document storage for extracted consultation files.
//!
//! The local backend writes under a served directory and hands back the
//! public URL path; swapping in an object store only means implementing
//! [`DocumentStore`].

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist one file and return its public URL.
    async fn upload(&self, bytes: &[u8], filename: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct LocalDocumentStore {
    root: PathBuf,
    public_base: String,
}

impl LocalDocumentStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Strip anything that is not safe in a URL path segment. Archive entry
    /// names routinely carry spaces, accents and nested directories.
    pub fn sanitize_filename(original: &str) -> String {
        let base = original.rsplit(['/', '\\']).next().unwrap_or(original);
        base.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn upload(&self, bytes: &[u8], filename: &str) -> anyhow::Result<String> {
        let stored_name = format!("{}-{}", Uuid::new_v4(), Self::sanitize_filename(filename));
        let path = self.root.join(&stored_name);

        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating document directory {}", self.root.display()))?;

        // Atomic temp-file rename so a crashed upload never leaves a
        // half-written file at a public path.
        let temp_path = self.root.join(format!(".{stored_name}.tmp"));
        let mut file = fs::File::create(&temp_path)
            .await
            .with_context(|| format!("creating temp document {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp document {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp document {}", temp_path.display()))?;
        drop(file);

        fs::rename(&temp_path, &path)
            .await
            .with_context(|| format!("renaming document into place {}", path.display()))?;

        Ok(format!("{}/{}", self.public_base, stored_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sanitize_keeps_extension_and_drops_paths() {
        assert_eq!(
            LocalDocumentStore::sanitize_filename("dossier/pièces jointes/RC v2.pdf"),
            "RC_v2.pdf"
        );
        assert_eq!(LocalDocumentStore::sanitize_filename("CCTP.pdf"), "CCTP.pdf");
        assert_eq!(
            LocalDocumentStore::sanitize_filename("annexe\\règlement.docx"),
            "r_glement.docx"
        );
    }

    #[tokio::test]
    async fn upload_writes_file_and_returns_public_url() {
        let dir = tempdir().expect("tempdir");
        let store = LocalDocumentStore::new(dir.path(), "/dce/");
        let url = store.upload(b"%PDF-1.4", "RC.pdf").await.expect("upload");

        assert!(url.starts_with("/dce/"));
        assert!(url.ends_with("-RC.pdf"));
        let name = url.strip_prefix("/dce/").unwrap();
        let on_disk = std::fs::read(dir.path().join(name)).expect("stored file");
        assert_eq!(on_disk, b"%PDF-1.4");
    }

    #[tokio::test]
    async fn repeated_uploads_of_same_name_get_distinct_urls() {
        let dir = tempdir().expect("tempdir");
        let store = LocalDocumentStore::new(dir.path(), "/dce");
        let first = store.upload(b"a", "CCTP.pdf").await.expect("first");
        let second = store.upload(b"b", "CCTP.pdf").await.expect("second");
        assert_ne!(first, second);
    }
}
