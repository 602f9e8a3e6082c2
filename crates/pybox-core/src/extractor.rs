//! Artifact extraction
//!
//! After the unit stops, its working directory is read back as a tar archive
//! and every image file found in it is returned base64 encoded. Extraction
//! never fails a request: any error yields an empty list and a warning.

use crate::archive;
use crate::runtime::{RuntimeClient, UnitHandle};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::io;
use std::path::Path;
use std::sync::Arc;

pub use pybox_types::ImageFile as ArtifactFile;

/// Recognised artifact extensions, compared case-insensitively.
pub const ARTIFACT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "svg"];

/// Whether the basename of `path` ends in `.<ext>` for a known extension.
pub fn is_artifact_name(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path).to_ascii_lowercase();
    ARTIFACT_EXTENSIONS.iter().any(|ext| {
        name.strip_suffix(ext)
            .map_or(false, |stem| stem.ends_with('.'))
    })
}

#[derive(Clone)]
pub struct ArtifactExtractor {
    runtime: Arc<dyn RuntimeClient>,
}

impl ArtifactExtractor {
    pub fn new(runtime: Arc<dyn RuntimeClient>) -> Self {
        Self { runtime }
    }

    /// Collect image artifacts from `work_dir` inside the unit.
    pub async fn extract(&self, unit: &UnitHandle, work_dir: &str) -> Vec<ArtifactFile> {
        let archive = match self.runtime.copy_out(unit, work_dir).await {
            Ok(archive) => archive,
            Err(e) => {
                log::warn!(
                    "Could not read {} from container {}: {}",
                    work_dir,
                    unit.short_id(),
                    e
                );
                return Vec::new();
            }
        };

        // Decoding and encoding large archives is CPU bound.
        let decoded = tokio::task::spawn_blocking(move || extract_from_archive(&archive)).await;
        match decoded {
            Ok(Ok(artifacts)) => {
                if !artifacts.is_empty() {
                    log::info!(
                        "Extracted {} artifact(s) from container {}",
                        artifacts.len(),
                        unit.short_id()
                    );
                }
                artifacts
            }
            Ok(Err(e)) => {
                log::warn!(
                    "Corrupt archive from container {}: {}",
                    unit.short_id(),
                    e
                );
                Vec::new()
            }
            Err(e) => {
                log::warn!("Artifact extraction task failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Decode the image files of a copied-out working directory.
pub fn extract_from_archive(archive: &[u8]) -> io::Result<Vec<ArtifactFile>> {
    let files = archive::unpack_files(archive, is_artifact_name)?;

    Ok(files
        .into_iter()
        .map(|file| {
            let filename = Path::new(&file.path)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.path.clone());
            ArtifactFile {
                filename,
                size: file.data.len() as u64,
                content: STANDARD.encode(&file.data),
            }
        })
        .collect())
}
