//! Source archive packaging.
//!
//! The archive holds the rendered source and every staged asset, laid out as
//! they were compiled:
//! ```text
//! main.tex
//! assets/fig1_<name>
//! assets/fig2_<name>
//! ```
//! Entries are sorted and timestamps fixed, so the same workdir always yields
//! the same bytes.

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use posterpress_render::ASSETS_DIR;
use posterpress_shared::{PosterPressError, Result};

use crate::workdir::{SOURCE_FILE_NAME, WorkDir};

/// Zip the workdir's source and assets into memory.
pub async fn build_source_archive(workdir: &WorkDir) -> Result<Vec<u8>> {
    let source_path = workdir.source_path();
    let source = tokio::fs::read(&source_path)
        .await
        .map_err(|e| PosterPressError::io(&source_path, e))?;

    let mut entries = vec![(SOURCE_FILE_NAME.to_string(), source)];
    entries.extend(collect_assets(workdir).await?);

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in entries {
        zip.start_file(name.as_str(), options)
            .map_err(|e| PosterPressError::Archive(format!("{name}: {e}")))?;
        zip.write_all(&bytes)
            .map_err(|e| PosterPressError::Archive(format!("{name}: {e}")))?;
    }
    let cursor = zip
        .finish()
        .map_err(|e| PosterPressError::Archive(e.to_string()))?;

    Ok(cursor.into_inner())
}

/// `(archive name, bytes)` for each staged asset, sorted by name.
async fn collect_assets(workdir: &WorkDir) -> Result<Vec<(String, Vec<u8>)>> {
    let dir = workdir.assets_dir();
    let mut read_dir = tokio::fs::read_dir(&dir)
        .await
        .map_err(|e| PosterPressError::io(&dir, e))?;

    let mut assets = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| PosterPressError::io(&dir, e))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| PosterPressError::io(entry.path(), e))?;
        if !file_type.is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| PosterPressError::io(&path, e))?;
        assets.push((format!("{ASSETS_DIR}/{name}"), bytes));
    }
    assets.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(assets)
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use posterpress_shared::JobId;
    use uuid::Uuid;
    use zip::ZipArchive;

    use super::*;

    async fn workdir() -> WorkDir {
        let root = std::env::temp_dir().join(format!("pp-package-test-{}", Uuid::now_v7()));
        WorkDir::create(&root, &JobId::new(), false).await.unwrap()
    }

    fn entry_names(bytes: &[u8]) -> Vec<String> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[tokio::test]
    async fn archive_contains_source_and_assets() {
        let dir = workdir().await;
        dir.write_source("\\documentclass{article}\n").await.unwrap();
        dir.write_asset("fig2_map.png", b"map").await.unwrap();
        dir.write_asset("fig1_growth.png", b"growth").await.unwrap();

        let bytes = build_source_archive(&dir).await.unwrap();
        assert_eq!(
            entry_names(&bytes),
            vec!["main.tex", "assets/fig1_growth.png", "assets/fig2_map.png"]
        );

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut source = String::new();
        archive
            .by_name("main.tex")
            .unwrap()
            .read_to_string(&mut source)
            .unwrap();
        assert_eq!(source, "\\documentclass{article}\n");
    }

    #[tokio::test]
    async fn archive_bytes_are_reproducible() {
        let dir = workdir().await;
        dir.write_source("body").await.unwrap();
        dir.write_asset("fig1_a.png", b"a").await.unwrap();

        let first = build_source_archive(&dir).await.unwrap();
        let second = build_source_archive(&dir).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn archive_without_assets_has_only_source() {
        let dir = workdir().await;
        dir.write_source("body").await.unwrap();
        let bytes = build_source_archive(&dir).await.unwrap();
        assert_eq!(entry_names(&bytes), vec!["main.tex"]);
    }

    #[tokio::test]
    async fn missing_source_is_an_error() {
        let dir = workdir().await;
        assert!(build_source_archive(&dir).await.is_err());
    }
}
