//! Split-archive export: pack a file inventory into sequentially numbered
//! `tar.zst` archives plus a manifest, grounded on the teacher's `zstd`
//! dependency (not previously used with `tar`; `tar` is newly added for
//! this — see DESIGN.md).

use crate::db::models::{file_record, provider_config};
use crate::error::CoreError;
use crate::hashutil::sha256_file;
use crate::transfer::manifest::{
    ArchiveDescriptor, FileInventoryEntry, ProviderSummary, TransferManifest, MANIFEST_FILENAME,
};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct ExportOptions {
    pub output_dir: PathBuf,
    pub providers: Vec<String>,
    pub split_size: u64,
    pub compression: String,
    pub compression_level: i32,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExportReport {
    pub transfer_id: String,
    pub archive_count: u64,
    pub total_size: u64,
    pub manifest_sha256: String,
}

struct FileToPack {
    provider: String,
    rel_path: String,
    abs_path: PathBuf,
    size: u64,
    sha256: String,
}

pub fn export(conn: &Connection, data_dir: &Path, opts: &ExportOptions) -> Result<ExportReport, CoreError> {
    if opts.compression != "zstd" {
        return Err(CoreError::Invalid(format!(
            "unsupported compression: {}",
            opts.compression
        )));
    }

    let mut provider_summaries: BTreeMap<String, ProviderSummary> = BTreeMap::new();
    let mut files: Vec<FileToPack> = Vec::new();

    for provider in &opts.providers {
        let records = file_record::list_by_provider(conn, provider)?;
        let type_tag = provider_config::find_by_name(conn, provider)?.map(|c| c.r#type);

        let mut file_count = 0u64;
        let mut total_size = 0u64;
        for record in records {
            let abs_path = data_dir.join(provider).join(&record.path);
            if !abs_path.is_file() {
                continue;
            }
            file_count += 1;
            total_size += record.size as u64;
            files.push(FileToPack {
                provider: provider.clone(),
                rel_path: record.path.clone(),
                abs_path,
                size: record.size as u64,
                sha256: record.sha256.clone(),
            });
        }

        provider_summaries.insert(
            provider.clone(),
            ProviderSummary {
                type_tag,
                file_count,
                total_size,
            },
        );
    }

    if files.is_empty() {
        return Err(CoreError::Invalid("no files to export".to_string()));
    }

    std::fs::create_dir_all(&opts.output_dir)?;

    let groups = pack_into_groups(files, opts.split_size);
    let transfer = crate::db::models::transfer::start(
        conn,
        crate::db::models::transfer::TransferDirection::Export,
        &opts.output_dir.to_string_lossy(),
    )?;

    let mut archive_descriptors = Vec::with_capacity(groups.len());
    let mut total_size = 0u64;

    for (idx, group) in groups.iter().enumerate() {
        let archive_name = format!("airgap-transfer-{:03}.tar.zst", idx + 1);
        let archive_path = opts.output_dir.join(&archive_name);
        let entry_names = write_archive(&archive_path, group, opts.compression_level)?;

        let archive_size = std::fs::metadata(&archive_path)?.len();
        let archive_sha256 = sha256_file(&archive_path)?;
        write_sidecar(&archive_path, &archive_sha256)?;

        total_size += archive_size;
        archive_descriptors.push(ArchiveDescriptor {
            name: archive_name,
            size: archive_size,
            sha256: archive_sha256,
            files: entry_names,
        });
    }

    let file_inventory: Vec<FileInventoryEntry> = groups
        .iter()
        .flatten()
        .map(|f| FileInventoryEntry {
            provider: f.provider.clone(),
            path: f.rel_path.clone(),
            size: f.size,
            sha256: f.sha256.clone(),
        })
        .collect();

    let manifest = TransferManifest {
        version: "1.0".to_string(),
        created: chrono::Utc::now().to_rfc3339(),
        source_host: hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string()),
        providers: provider_summaries,
        archives: archive_descriptors,
        total_archives: groups.len() as u64,
        total_size: file_inventory.iter().map(|f| f.size).sum(),
        file_inventory,
    };

    let manifest_path = opts.output_dir.join(MANIFEST_FILENAME);
    let manifest_json = serde_json::to_string_pretty(&manifest)?;
    std::fs::write(&manifest_path, &manifest_json)?;
    let manifest_sha256 = sha256_file(&manifest_path)?;
    write_sidecar(&manifest_path, &manifest_sha256)?;

    write_readme(&opts.output_dir, &manifest)?;

    crate::db::models::transfer::complete(
        conn,
        &transfer.id,
        "completed",
        groups.len() as i64,
        total_size as i64,
        Some(&manifest_sha256),
    )?;

    Ok(ExportReport {
        transfer_id: transfer.id,
        archive_count: groups.len() as u64,
        total_size,
        manifest_sha256,
    })
}

/// Roll to a new archive when adding the next file would exceed the split
/// size, unless the current archive is still empty.
fn pack_into_groups(files: Vec<FileToPack>, split_size: u64) -> Vec<Vec<FileToPack>> {
    let mut groups: Vec<Vec<FileToPack>> = Vec::new();
    let mut current: Vec<FileToPack> = Vec::new();
    let mut current_size = 0u64;

    for file in files {
        if !current.is_empty() && current_size + file.size > split_size {
            groups.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += file.size;
        current.push(file);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

fn write_archive(archive_path: &Path, group: &[FileToPack], compression_level: i32) -> Result<Vec<String>, CoreError> {
    let file = File::create(archive_path)?;
    let encoder = zstd::Encoder::new(file, compression_level)?;
    let mut builder = tar::Builder::new(encoder);
    let mut entry_names = Vec::with_capacity(group.len());

    for entry in group {
        let entry_name = format!("{}/{}", entry.provider, entry.rel_path);
        let mut source = File::open(&entry.abs_path)?;
        builder.append_file(&entry_name, &mut source)?;
        entry_names.push(entry_name);
    }

    let encoder = builder.into_inner()?;
    let file = encoder.finish()?;
    file.sync_all().ok();
    Ok(entry_names)
}

fn write_sidecar(path: &Path, digest: &str) -> Result<(), CoreError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let sidecar_path = path.with_file_name(format!("{name}.sha256"));
    let mut file = File::create(&sidecar_path)?;
    write!(file, "{digest}  {name}\n")?;
    Ok(())
}

fn write_readme(output_dir: &Path, manifest: &TransferManifest) -> Result<(), CoreError> {
    let readme = format!(
        "AIRGAP TRANSFER PACKAGE\n\
         =======================\n\n\
         Created: {created}\n\
         Source host: {host}\n\
         Archives: {archive_count}\n\
         Total size: {total_size} bytes\n\n\
         IMPORT PROCEDURE\n\
         -----------------\n\
         1. Copy this entire directory to the destination host.\n\
         2. Run the import command against this directory, e.g.:\n\
         \n    airgap-agent import --source <this-directory>\n\n\
         3. The importer verifies every archive against {manifest} before\n\
         extracting anything, and is safe to re-run.\n",
        created = manifest.created,
        host = manifest.source_host,
        archive_count = manifest.total_archives,
        total_size = manifest.total_size,
        manifest = MANIFEST_FILENAME,
    );
    std::fs::write(output_dir.join("TRANSFER-README.txt"), readme)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::file_record;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE file_records (
                id TEXT PRIMARY KEY, provider TEXT NOT NULL, path TEXT NOT NULL,
                size INTEGER NOT NULL, sha256 TEXT NOT NULL, last_modified TEXT NOT NULL,
                last_verified TEXT NOT NULL, sync_run_id TEXT, UNIQUE(provider, path));
             CREATE TABLE provider_configs (
                id TEXT PRIMARY KEY, name TEXT NOT NULL UNIQUE, type TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1, config_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now')));
             CREATE TABLE transfers (
                id TEXT PRIMARY KEY, direction TEXT NOT NULL, status TEXT NOT NULL DEFAULT 'running',
                dir_path TEXT NOT NULL, archive_count INTEGER NOT NULL DEFAULT 0,
                total_size INTEGER NOT NULL DEFAULT 0, manifest_sha256 TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')), completed_at TEXT);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn export_splits_by_size_and_writes_sidecars() {
        let conn = setup_db();
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(data_dir.join("epel")).unwrap();

        for (name, size) in [("a.rpm", 20usize), ("b.rpm", 20), ("c.rpm", 20), ("big.iso", 1000)] {
            let path = data_dir.join("epel").join(name);
            std::fs::write(&path, vec![b'x'; size]).unwrap();
            let digest = sha256_file(&path).unwrap();
            file_record::upsert(&conn, "epel", name, size as i64, &digest, "2024-01-01", None).unwrap();
        }

        let output_dir = dir.path().join("out");
        let opts = ExportOptions {
            output_dir: output_dir.clone(),
            providers: vec!["epel".to_string()],
            split_size: 50,
            compression: "zstd".to_string(),
            compression_level: 3,
        };

        let report = export(&conn, &data_dir, &opts).unwrap();
        assert!(report.archive_count >= 2);

        let manifest_path = output_dir.join(MANIFEST_FILENAME);
        assert!(manifest_path.exists());
        assert!(output_dir.join(format!("{MANIFEST_FILENAME}.sha256")).exists());

        let manifest: TransferManifest =
            serde_json::from_str(&std::fs::read_to_string(&manifest_path).unwrap()).unwrap();
        assert_eq!(manifest.archives.len() as u64, report.archive_count);

        for archive in &manifest.archives {
            let archive_path = output_dir.join(&archive.name);
            assert!(archive_path.exists());
            let sidecar = output_dir.join(format!("{}.sha256", archive.name));
            assert!(sidecar.exists());
            let digest = sha256_file(&archive_path).unwrap();
            assert_eq!(digest, archive.sha256);
        }
    }

    #[test]
    fn export_rejects_unsupported_compression() {
        let conn = setup_db();
        let dir = tempfile::tempdir().unwrap();
        let opts = ExportOptions {
            output_dir: dir.path().join("out"),
            providers: vec!["epel".to_string()],
            split_size: 50,
            compression: "gzip".to_string(),
            compression_level: 3,
        };
        assert!(export(&conn, dir.path(), &opts).is_err());
    }

    #[test]
    fn export_fails_when_nothing_survives() {
        let conn = setup_db();
        let dir = tempfile::tempdir().unwrap();
        let opts = ExportOptions {
            output_dir: dir.path().join("out"),
            providers: vec!["epel".to_string()],
            split_size: 50,
            compression: "zstd".to_string(),
            compression_level: 3,
        };
        assert!(export(&conn, dir.path(), &opts).is_err());
    }
}
