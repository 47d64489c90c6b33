//! Archive extraction into a package's target directory
//!
//! The tool's exit code is not trusted on its own: an archive tool that
//! exits 0 but leaves the target empty is a failed extraction.

use std::path::Path;

use crate::error::InstallError;

use super::platform::PlatformServices;
use super::runner::RunRequest;

pub struct ArchiveExtractor;

impl ArchiveExtractor {
    /// Returns the number of top-level entries left in `target`
    pub async fn extract(
        services: &dyn PlatformServices,
        archive: &Path,
        target: &Path,
        request: RunRequest,
    ) -> Result<usize, InstallError> {
        let logger = request.logger.clone();

        tokio::fs::create_dir_all(target).await?;
        logger
            .append(format!("Created target directory: {}", target.display()))
            .await;

        let output = services.extract_archive(archive, target, request).await?;
        logger
            .append(format!(
                "ZIP extraction completed with exit code {} in {}ms",
                exit_label(output.exit_code),
                output.duration_ms
            ))
            .await;

        if !output.success() {
            return Err(InstallError::ExtractionFailed(output.exit_code.unwrap_or(-1)));
        }

        let entries = list_entries(target).await?;
        logger
            .append(format!(
                "Extracted {} items to {}",
                entries.len(),
                target.display()
            ))
            .await;
        if entries.is_empty() {
            return Err(InstallError::EmptyExtraction(target.to_path_buf()));
        }
        logger.append(format!("Contents: {}", entries.join(", "))).await;

        Ok(entries.len())
    }
}

fn exit_label(code: Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

async fn list_entries(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}
