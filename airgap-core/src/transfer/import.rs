//! Verify-then-extract import: validates every archive against the manifest
//! digest before writing anything, honoring skip-if-validated caching and
//! safe extraction via the path-confinement utility.

use crate::db::models::transfer::{self, TransferDirection};
use crate::db::models::file_record;
use crate::error::CoreError;
use crate::hashutil::sha256_file;
use crate::pathutil::safe_join_under;
use crate::transfer::manifest::{TransferManifest, MANIFEST_FILENAME};
use rusqlite::Connection;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub struct ImportOptions {
    pub source_dir: PathBuf,
    pub verify_only: bool,
    pub force: bool,
    pub skip_validated: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ImportReport {
    pub transfer_id: String,
    pub success: bool,
    pub archives_validated: u64,
    pub archives_skipped: u64,
    pub files_extracted: u64,
    pub extracted_bytes: u64,
    pub failed_archives: Vec<String>,
    pub duration: Duration,
}

pub fn import(
    conn: &Connection,
    data_dir: &Path,
    opts: &ImportOptions,
    rpm_metadata_tool: Option<&Path>,
) -> Result<ImportReport, CoreError> {
    let start = Instant::now();

    let manifest_path = opts.source_dir.join(MANIFEST_FILENAME);
    let manifest_raw = std::fs::read_to_string(&manifest_path)
        .map_err(|e| CoreError::Invalid(format!("cannot read manifest: {e}")))?;
    let manifest: TransferManifest = serde_json::from_str(&manifest_raw)
        .map_err(|e| CoreError::Invalid(format!("invalid manifest json: {e}")))?;

    for archive in &manifest.archives {
        let path = opts.source_dir.join(&archive.name);
        if !path.is_file() {
            return Err(CoreError::NotFound(format!(
                "archive missing from source directory: {}",
                archive.name
            )));
        }
    }

    let transfer_row = transfer::start(conn, TransferDirection::Import, &opts.source_dir.to_string_lossy())?;

    let mut archives_validated = 0u64;
    let mut archives_skipped = 0u64;
    let mut failed_archives = Vec::new();
    let mut skip_extraction: Vec<bool> = Vec::with_capacity(manifest.archives.len());

    for archive in &manifest.archives {
        let path = opts.source_dir.join(&archive.name);
        let source_path = opts.source_dir.to_string_lossy().to_string();

        if !opts.force && opts.skip_validated
            && transfer::was_validated(conn, &source_path, &archive.name, &archive.sha256)?
        {
            archives_skipped += 1;
            skip_extraction.push(true);
            continue;
        }

        if !opts.force {
            let digest = sha256_file(&path)?;
            if digest != archive.sha256 {
                failed_archives.push(archive.name.clone());
                skip_extraction.push(true);
                continue;
            }
        }

        transfer::record_validated(
            conn,
            &transfer_row.id,
            &source_path,
            &archive.name,
            archive.size as i64,
            &archive.sha256,
        )?;
        archives_validated += 1;
        skip_extraction.push(false);
    }

    if !failed_archives.is_empty() {
        transfer::complete(conn, &transfer_row.id, "failed", 0, 0, None)?;
        return Ok(ImportReport {
            transfer_id: transfer_row.id,
            success: false,
            archives_validated,
            archives_skipped,
            files_extracted: 0,
            extracted_bytes: 0,
            failed_archives,
            duration: start.elapsed(),
        });
    }

    if opts.verify_only {
        transfer::complete(
            conn,
            &transfer_row.id,
            "completed",
            manifest.archives.len() as i64,
            0,
            None,
        )?;
        return Ok(ImportReport {
            transfer_id: transfer_row.id,
            success: true,
            archives_validated,
            archives_skipped,
            files_extracted: 0,
            extracted_bytes: 0,
            failed_archives,
            duration: start.elapsed(),
        });
    }

    let mut files_extracted = 0u64;
    let mut extracted_bytes = 0u64;

    for (archive, skip) in manifest.archives.iter().zip(skip_extraction.iter()) {
        if *skip {
            continue;
        }
        let path = opts.source_dir.join(&archive.name);
        let (count, bytes) = extract_archive(&path, data_dir)?;
        files_extracted += count;
        extracted_bytes += bytes;
    }

    regenerate_rpm_metadata(&manifest, data_dir, rpm_metadata_tool);

    for entry in &manifest.file_inventory {
        let abs_path = data_dir.join(&entry.provider).join(&entry.path);
        if abs_path.is_file() {
            file_record::upsert(
                conn,
                &entry.provider,
                &entry.path,
                entry.size as i64,
                &entry.sha256,
                &chrono::Utc::now().to_rfc3339(),
                None,
            )?;
        }
    }

    transfer::complete(
        conn,
        &transfer_row.id,
        "completed",
        archives_validated as i64,
        extracted_bytes as i64,
        None,
    )?;

    Ok(ImportReport {
        transfer_id: transfer_row.id,
        success: true,
        archives_validated,
        archives_skipped,
        files_extracted,
        extracted_bytes,
        failed_archives,
        duration: start.elapsed(),
    })
}

/// Opens `file -> zstd-decoder -> tar-reader`, rejecting non-regular
/// entries and anything that escapes `data_root` via the safe-path utility.
fn extract_archive(archive_path: &Path, data_root: &Path) -> Result<(u64, u64), CoreError> {
    let file = std::fs::File::open(archive_path)?;
    let decoder = zstd::Decoder::new(file)?;
    let mut tar_reader = tar::Archive::new(decoder);

    let mut count = 0u64;
    let mut bytes = 0u64;

    for entry in tar_reader.entries()? {
        let mut entry = entry?;
        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            continue;
        }
        if !entry_type.is_file() {
            return Err(CoreError::Unsafe(format!(
                "non-regular tar entry rejected: {:?}",
                entry.path().ok()
            )));
        }

        let entry_path = entry.path()?.to_string_lossy().to_string();
        let size = entry.header().size()?;
        let mtime = entry.header().mtime().ok();
        let dest = safe_join_under(data_root, &entry_path)?;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut out = std::fs::File::create(&dest)?;
        std::io::copy(&mut entry, &mut out)?;
        drop(out);

        if let Some(mtime) = mtime {
            let mtime = filetime::FileTime::from_unix_time(mtime as i64, 0);
            filetime::set_file_mtime(&dest, mtime).ok();
        }

        count += 1;
        bytes += size;
    }

    Ok((count, bytes))
}

fn regenerate_rpm_metadata(manifest: &TransferManifest, data_dir: &Path, tool: Option<&Path>) {
    let Some(tool) = tool else {
        return;
    };

    let mut rpm_repo_dirs: Vec<&str> = manifest
        .providers
        .iter()
        .filter(|(_, summary)| summary.type_tag.as_deref() == Some("rpm_repo"))
        .map(|(name, _)| name.as_str())
        .collect();
    rpm_repo_dirs.sort();
    rpm_repo_dirs.dedup();

    for provider in rpm_repo_dirs {
        let dir = data_dir.join(provider);
        match std::process::Command::new(tool).arg(&dir).output() {
            Ok(output) if output.status.success() => {
                tracing::info!(provider, "regenerated rpm metadata");
            }
            Ok(output) => {
                tracing::warn!(
                    provider,
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "rpm metadata regeneration failed, continuing import"
                );
            }
            Err(e) => {
                tracing::warn!(provider, error = %e, "rpm metadata tool unavailable, skipping");
            }
        }
    }
}
