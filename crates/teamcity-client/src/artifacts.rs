//! Artifact archive handling.
//!
//! TeamCity serves every artifact of a build as one zip from
//! `downloadArtifacts.html`. The archive is written next to its destination
//! under a unique name, unpacked there and removed again, so concurrent
//! downloads into the same directory never collide.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::TeamCityError;
use crate::Result;

/// Archives can be large; downloads get longer than the per-request default.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Unique scratch path for one build's archive inside `dest`.
pub fn archive_path(dest: &Path) -> PathBuf {
    dest.join(format!("{}-artifacts.zip", Uuid::new_v4()))
}

/// Write `archive` into `dest`, extract it there, then delete the zip.
///
/// An empty body means the build published nothing.
pub async fn unpack_archive(build_id: u64, archive: &[u8], dest: &Path) -> Result<()> {
    if archive.is_empty() {
        return Err(TeamCityError::ArtifactsNotFound(build_id));
    }

    tokio::fs::create_dir_all(dest).await?;
    let zip_path = archive_path(dest);
    tokio::fs::write(&zip_path, archive).await?;
    debug!(build_id, path = %zip_path.display(), bytes = archive.len(), "artifact archive written");

    let extracted = extract(zip_path.clone(), dest.to_path_buf()).await;

    if let Err(e) = tokio::fs::remove_file(&zip_path).await {
        warn!(path = %zip_path.display(), error = %e, "failed to remove artifact archive");
    }
    extracted
}

async fn extract(zip_path: PathBuf, dest: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&zip_path)?;
        let mut archive = zip::ZipArchive::new(file)?;
        archive.extract(&dest)?;
        Ok::<_, TeamCityError>(())
    })
    .await
    .map_err(|e| TeamCityError::Io(std::io::Error::other(e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, body) in files {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_unpacks_and_removes_archive() {
        let dir = tempdir().unwrap();
        let archive = zip_bytes(&[("report.txt", "ok"), ("logs/build.log", "done")]);

        unpack_archive(1, &archive, dir.path()).await.unwrap();

        assert_eq!(dir_entries(dir.path()), ["logs", "report.txt"]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("logs/build.log")).unwrap(),
            "done"
        );
    }

    #[tokio::test]
    async fn test_empty_body_is_artifacts_not_found() {
        let dir = tempdir().unwrap();

        let err = unpack_archive(9, &[], dir.path()).await.unwrap_err();

        assert!(matches!(err, TeamCityError::ArtifactsNotFound(9)));
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_archive_is_cleaned_up() {
        let dir = tempdir().unwrap();

        let err = unpack_archive(2, b"definitely not a zip", dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, TeamCityError::Archive(_)));
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_creates_missing_destination() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("nested/out");

        unpack_archive(3, &zip_bytes(&[("a.txt", "a")]), &dest).await.unwrap();

        assert_eq!(dir_entries(&dest), ["a.txt"]);
    }

    #[test]
    fn test_archive_paths_are_unique() {
        let dir = Path::new("/tmp/out");
        let a = archive_path(dir);
        let b = archive_path(dir);
        assert_ne!(a, b);
        assert!(a.to_string_lossy().ends_with("-artifacts.zip"));
    }
}
