//! Reference file staging
//!
//! Downloads the caller's reference files into a request-scoped host
//! directory before the container is created. Downloads are sequential and
//! the first failure aborts the whole batch; the caller owns the directory
//! and removes it, partial contents included.

use crate::archive::STAGED_FILE_MODE;
use crate::errors::StagingError;
use futures_util::stream::StreamExt;
use pybox_types::RefFile;
use reqwest::Url;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Clone)]
pub struct FileStager {
    client: reqwest::Client,
    download_timeout: Duration,
}

impl FileStager {
    pub fn new(download_timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), download_timeout)
    }

    pub fn with_client(client: reqwest::Client, download_timeout: Duration) -> Self {
        Self {
            client,
            download_timeout,
        }
    }

    /// Download every file into `staging_dir`, in order. Returns the written paths.
    pub async fn stage(
        &self,
        ref_files: &[RefFile],
        staging_dir: &Path,
    ) -> Result<Vec<PathBuf>, StagingError> {
        let mut staged = Vec::with_capacity(ref_files.len());
        if ref_files.is_empty() {
            return Ok(staged);
        }

        log::info!(
            "Downloading {} reference file(s) into {}",
            ref_files.len(),
            staging_dir.display()
        );

        for ref_file in ref_files {
            let url = Url::parse(&ref_file.url).map_err(|e| StagingError::InvalidUrl {
                url: ref_file.url.clone(),
                reason: e.to_string(),
            })?;
            let filename = resolve_filename(ref_file.filename.as_deref(), &url)?;
            let target = staging_dir.join(&filename);

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|source| StagingError::Write {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }

            let bytes = self.download(&url, &target).await?;
            log::info!("Downloaded {} -> {} ({} bytes)", url, target.display(), bytes);
            staged.push(target);
        }

        Ok(staged)
    }

    async fn download(&self, url: &Url, target: &Path) -> Result<u64, StagingError> {
        let network = |e: reqwest::Error| StagingError::Network {
            url: url.to_string(),
            message: e.to_string(),
        };
        let write = |source: std::io::Error| StagingError::Write {
            path: target.to_path_buf(),
            source,
        };

        let response = self
            .client
            .get(url.clone())
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(network)?;

        if !response.status().is_success() {
            log::error!("Download failed: {}, status {}", url, response.status());
            return Err(StagingError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let mut file = fs::File::create(target).await.map_err(write)?;
        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(network)?;
            file.write_all(&chunk).await.map_err(write)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(write)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(target, std::fs::Permissions::from_mode(STAGED_FILE_MODE))
                .await
                .map_err(write)?;
        }

        Ok(written)
    }
}

/// Pick the name a reference file is stored under.
///
/// An explicit name is used verbatim; otherwise the last URL path segment,
/// or `file_<8 hex>` when that is empty. Names that would leave the
/// staging directory are rejected.
pub fn resolve_filename(explicit: Option<&str>, url: &Url) -> Result<String, StagingError> {
    let name = match explicit {
        Some(name) => name.to_string(),
        None => url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .unwrap_or_else(random_filename),
    };

    let path = Path::new(&name);
    let safe = !name.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
        && path.components().any(|component| matches!(component, Component::Normal(_)));
    if !safe {
        return Err(StagingError::UnsafeFilename { filename: name });
    }

    Ok(name)
}

fn random_filename() -> String {
    format!("file_{}", &Uuid::new_v4().simple().to_string()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FileRoute, FileServer};
    use tempfile::tempdir;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_resolve_filename() {
        assert_eq!(
            resolve_filename(Some("a.txt"), &url("https://x.test/b.txt")).unwrap(),
            "a.txt"
        );
        assert_eq!(
            resolve_filename(None, &url("https://x.test/dir/b.txt?sig=1")).unwrap(),
            "b.txt"
        );
        assert_eq!(
            resolve_filename(Some("inputs/c.csv"), &url("https://x.test/c")).unwrap(),
            "inputs/c.csv"
        );

        let generated = resolve_filename(None, &url("https://x.test/dir/")).unwrap();
        assert!(generated.starts_with("file_"));
        assert_eq!(generated.len(), "file_".len() + 8);

        let generated = resolve_filename(None, &url("https://x.test")).unwrap();
        assert!(generated.starts_with("file_"));
    }

    #[test]
    fn test_resolve_filename_rejects_escapes() {
        for name in ["../etc/passwd", "/etc/passwd", "a/../../b", "", "."] {
            assert!(
                matches!(
                    resolve_filename(Some(name), &url("https://x.test/a")),
                    Err(StagingError::UnsafeFilename { .. })
                ),
                "{:?} should be rejected",
                name
            );
        }
    }

    #[tokio::test]
    async fn test_stage_downloads_in_order() {
        let server = FileServer::start(vec![
            FileRoute::ok("/files/a.txt", b"alpha".to_vec()),
            FileRoute::ok("/files/data.csv", b"x,y\n1,2\n".to_vec()),
        ])
        .await;
        let dir = tempdir().unwrap();

        let stager = FileStager::new(Duration::from_secs(5));
        let staged = stager
            .stage(
                &[
                    RefFile::new(server.url("/files/a.txt")).with_filename("input/a.txt"),
                    RefFile::new(server.url("/files/data.csv")),
                ],
                dir.path(),
            )
            .await
            .unwrap();

        assert_eq!(
            staged,
            vec![dir.path().join("input/a.txt"), dir.path().join("data.csv")]
        );
        assert_eq!(std::fs::read(dir.path().join("input/a.txt")).unwrap(), b"alpha");
        assert_eq!(std::fs::read(dir.path().join("data.csv")).unwrap(), b"x,y\n1,2\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.path().join("data.csv"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, STAGED_FILE_MODE);
        }
    }

    #[tokio::test]
    async fn test_stage_aborts_on_first_failure() {
        let server = FileServer::start(vec![
            FileRoute::ok("/first.txt", b"one".to_vec()),
            FileRoute::status("/missing.txt", 404),
            FileRoute::ok("/third.txt", b"three".to_vec()),
        ])
        .await;
        let dir = tempdir().unwrap();

        let err = FileStager::new(Duration::from_secs(5))
            .stage(
                &[
                    RefFile::new(server.url("/first.txt")),
                    RefFile::new(server.url("/missing.txt")),
                    RefFile::new(server.url("/third.txt")),
                ],
                dir.path(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StagingError::HttpStatus { status: 404, .. }));
        // Earlier files stay for the caller to clean up; later ones are never fetched.
        assert!(dir.path().join("first.txt").exists());
        assert!(!dir.path().join("third.txt").exists());
        assert_eq!(server.hits("/third.txt"), 0);
    }

    #[tokio::test]
    async fn test_stage_network_error() {
        let dir = tempdir().unwrap();
        // Port 9 (discard) on loopback is expected to refuse connections.
        let err = FileStager::new(Duration::from_secs(2))
            .stage(&[RefFile::new("http://127.0.0.1:9/a.txt")], dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, StagingError::Network { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn test_stage_invalid_url() {
        let dir = tempdir().unwrap();
        let err = FileStager::new(Duration::from_secs(2))
            .stage(&[RefFile::new("not-a-valid-url")], dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, StagingError::InvalidUrl { .. }));
    }
}
