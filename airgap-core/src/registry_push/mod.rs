//! Pushes a locally cached OCI image (manifests + blobs under the data
//! directory) to a remote registry by staging a temporary `oci-layout` and
//! shelling out to an external `copy`-style tool, following the subprocess
//! invocation conventions of the teacher's deployment service.

use crate::error::CoreError;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

pub struct RegistryTarget {
    pub endpoint: String,
    pub repo_prefix: Option<String>,
    pub insecure: bool,
    pub credentials: Option<(String, String)>,
    pub copy_tool_path: PathBuf,
}

pub struct PushOptions {
    pub data_dir: PathBuf,
    pub source_provider: String,
    pub image_name: String,
    /// The reference configured for this image: a tag, a digest, or `None`
    /// to auto-detect the root manifest.
    pub reference: Option<String>,
    pub target: RegistryTarget,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PushReport {
    pub repository: String,
    pub tag_or_digest: String,
    pub manifests_staged: u64,
    pub blobs_staged: u64,
}

struct ManifestNode {
    digest: String,
    media_type: String,
    children: Vec<String>,
    blob_refs: Vec<String>,
    raw: Value,
}

pub async fn push_image(opts: &PushOptions) -> Result<PushReport, CoreError> {
    let image_root = opts.data_dir.join(&opts.source_provider).join(&opts.image_name);

    let nodes = scan_manifests(&image_root)?;
    if nodes.is_empty() {
        return Err(CoreError::NotFound(format!(
            "no manifests found for image {:?} under {}",
            opts.image_name,
            image_root.display()
        )));
    }

    let configured_digest = opts
        .reference
        .as_deref()
        .filter(|r| r.contains(':') && nodes.contains_key(*r));
    let root_digest = determine_root(&nodes, configured_digest)?;

    let order = post_order(&nodes, &root_digest);
    let blob_digests = collect_blob_digests(&nodes, &order);
    verify_blobs_present(&image_root, &blob_digests)?;

    let staging = tempfile::tempdir().map_err(CoreError::LocalIo)?;
    let (manifests_staged, blobs_staged) = stage_layout(
        &image_root,
        staging.path(),
        &nodes,
        &order,
        &blob_digests,
        &root_digest,
        opts.reference.as_deref(),
    )?;

    let source_repo = opts.image_name.trim_matches('/');
    let dest_repo = dest_repository(opts.target.repo_prefix.as_deref(), source_repo);
    let tag_or_digest = opts
        .reference
        .clone()
        .filter(|r| !r.contains(':'))
        .unwrap_or_else(|| sanitize_digest_tag(&root_digest));

    invoke_copy_tool(&opts.target, staging.path(), &dest_repo, &tag_or_digest).await?;

    Ok(PushReport {
        repository: dest_repo,
        tag_or_digest,
        manifests_staged,
        blobs_staged,
    })
}

/// Scans `<image_root>/manifests/<algo>/<hash>.json`, parsing each manifest's
/// media type and the digests it references (child manifests for an index,
/// config/layer blobs for a leaf manifest).
fn scan_manifests(image_root: &Path) -> Result<HashMap<String, ManifestNode>, CoreError> {
    let manifests_dir = image_root.join("manifests");
    let mut nodes = HashMap::new();

    if !manifests_dir.is_dir() {
        return Ok(nodes);
    }

    for algo_entry in std::fs::read_dir(&manifests_dir)? {
        let algo_entry = algo_entry?;
        if !algo_entry.file_type()?.is_dir() {
            continue;
        }
        let algo = algo_entry.file_name().to_string_lossy().to_string();

        for file_entry in std::fs::read_dir(algo_entry.path())? {
            let file_entry = file_entry?;
            let path = file_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let hash = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let digest = format!("{algo}:{hash}");

            let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
            let media_type = raw
                .get("mediaType")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();

            let mut children = Vec::new();
            let mut blob_refs = Vec::new();

            if let Some(manifest_list) = raw.get("manifests").and_then(|v| v.as_array()) {
                for m in manifest_list {
                    if let Some(d) = m.get("digest").and_then(|v| v.as_str()) {
                        children.push(d.to_string());
                    }
                }
            }
            if let Some(config) = raw.get("config").and_then(|c| c.get("digest")).and_then(|v| v.as_str()) {
                blob_refs.push(config.to_string());
            }
            if let Some(layers) = raw.get("layers").and_then(|v| v.as_array()) {
                for l in layers {
                    if let Some(d) = l.get("digest").and_then(|v| v.as_str()) {
                        blob_refs.push(d.to_string());
                    }
                }
            }

            nodes.insert(
                digest.clone(),
                ManifestNode {
                    digest,
                    media_type,
                    children,
                    blob_refs,
                    raw,
                },
            );
        }
    }

    Ok(nodes)
}

/// The root is the configured digest if given; otherwise the unique digest
/// with no inbound references; otherwise the unique index-media-type
/// manifest; otherwise ambiguous.
fn determine_root(
    nodes: &HashMap<String, ManifestNode>,
    configured_digest: Option<&str>,
) -> Result<String, CoreError> {
    if let Some(d) = configured_digest {
        return Ok(d.to_string());
    }

    let referenced: HashSet<&str> = nodes
        .values()
        .flat_map(|n| n.children.iter().map(|c| c.as_str()))
        .collect();

    let unreferenced: Vec<&str> = nodes
        .keys()
        .map(|k| k.as_str())
        .filter(|k| !referenced.contains(k))
        .collect();

    if unreferenced.len() == 1 {
        return Ok(unreferenced[0].to_string());
    }

    let index_candidates: Vec<&str> = nodes
        .values()
        .filter(|n| n.media_type.contains("index") || n.media_type.contains("manifest.list"))
        .map(|n| n.digest.as_str())
        .collect();

    if index_candidates.len() == 1 {
        return Ok(index_candidates[0].to_string());
    }

    Err(CoreError::Invalid(
        "ambiguous root manifest: multiple unreferenced or index candidates".to_string(),
    ))
}

/// Post-order traversal from `root`, tolerant of re-visited nodes via a
/// seen-set so shared child manifests only appear once and before any
/// parent that references them.
fn post_order(nodes: &HashMap<String, ManifestNode>, root: &str) -> Vec<String> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    visit(nodes, root, &mut seen, &mut order);
    order
}

fn visit(nodes: &HashMap<String, ManifestNode>, digest: &str, seen: &mut HashSet<String>, order: &mut Vec<String>) {
    if seen.contains(digest) {
        return;
    }
    seen.insert(digest.to_string());

    if let Some(node) = nodes.get(digest) {
        for child in &node.children {
            visit(nodes, child, seen, order);
        }
    }
    order.push(digest.to_string());
}

fn collect_blob_digests(nodes: &HashMap<String, ManifestNode>, order: &[String]) -> BTreeSet<String> {
    let mut digests = BTreeSet::new();
    for d in order {
        if let Some(node) = nodes.get(d) {
            for b in &node.blob_refs {
                digests.insert(b.clone());
            }
        }
    }
    digests
}

fn verify_blobs_present(image_root: &Path, blob_digests: &BTreeSet<String>) -> Result<(), CoreError> {
    for digest in blob_digests {
        if blob_path(image_root, digest).is_file() {
            continue;
        }
        return Err(CoreError::NotFound(format!("blob not found locally: {digest}")));
    }
    Ok(())
}

fn blob_path(image_root: &Path, digest: &str) -> PathBuf {
    let (algo, hash) = digest.split_once(':').unwrap_or(("sha256", digest));
    image_root.join("blobs").join(algo).join(hash)
}

fn manifest_path(image_root: &Path, digest: &str) -> PathBuf {
    let (algo, hash) = digest.split_once(':').unwrap_or(("sha256", digest));
    image_root.join("manifests").join(algo).join(format!("{hash}.json"))
}

fn layout_blob_path(layout_dir: &Path, digest: &str) -> PathBuf {
    let (algo, hash) = digest.split_once(':').unwrap_or(("sha256", digest));
    layout_dir.join("blobs").join(algo).join(hash)
}

fn stage_layout(
    image_root: &Path,
    layout_dir: &Path,
    nodes: &HashMap<String, ManifestNode>,
    manifest_order: &[String],
    blob_digests: &BTreeSet<String>,
    root_digest: &str,
    reference_tag: Option<&str>,
) -> Result<(u64, u64), CoreError> {
    let mut manifests_staged = 0u64;
    for digest in manifest_order {
        let src = manifest_path(image_root, digest);
        let dst = layout_blob_path(layout_dir, digest);
        hardlink_or_copy(&src, &dst)?;
        manifests_staged += 1;
    }

    let mut blobs_staged = 0u64;
    for digest in blob_digests {
        let src = blob_path(image_root, digest);
        let dst = layout_blob_path(layout_dir, digest);
        hardlink_or_copy(&src, &dst)?;
        blobs_staged += 1;
    }

    std::fs::write(
        layout_dir.join("oci-layout"),
        serde_json::to_vec(&serde_json::json!({ "imageLayoutVersion": "1.0.0" }))?,
    )?;

    let root = nodes
        .get(root_digest)
        .ok_or_else(|| CoreError::Other(anyhow::anyhow!("root manifest {root_digest} missing from scan")))?;

    let mut manifest_descriptor = serde_json::json!({
        "mediaType": if root.media_type.is_empty() { "application/vnd.oci.image.manifest.v1+json" } else { &root.media_type },
        "digest": root_digest,
        "size": serde_json::to_vec(&root.raw)?.len(),
    });
    if let Some(tag) = reference_tag.filter(|t| !t.contains(':')) {
        manifest_descriptor["annotations"] =
            serde_json::json!({ "org.opencontainers.image.ref.name": tag });
    }

    let index = serde_json::json!({
        "schemaVersion": 2,
        "manifests": [manifest_descriptor],
    });
    std::fs::write(layout_dir.join("index.json"), serde_json::to_vec(&index)?)?;

    Ok((manifests_staged, blobs_staged))
}

fn hardlink_or_copy(src: &Path, dst: &Path) -> Result<(), CoreError> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if std::fs::hard_link(src, dst).is_ok() {
        return Ok(());
    }
    std::fs::copy(src, dst)?;
    Ok(())
}

fn dest_repository(prefix: Option<&str>, source_repo: &str) -> String {
    match prefix {
        Some(p) if !p.trim_matches('/').is_empty() => {
            format!("{}/{}", p.trim_matches('/'), source_repo.trim_matches('/'))
        }
        _ => source_repo.trim_matches('/').to_string(),
    }
}

fn sanitize_digest_tag(digest: &str) -> String {
    format!("digest-{}", digest.replace(':', "-"))
}

async fn invoke_copy_tool(
    target: &RegistryTarget,
    layout_dir: &Path,
    dest_repo: &str,
    tag_or_digest: &str,
) -> Result<(), CoreError> {
    let dest_url = format!("docker://{}/{}:{}", target.endpoint, dest_repo, tag_or_digest);

    let mut cmd = tokio::process::Command::new(&target.copy_tool_path);
    cmd.arg("copy").arg("--all").arg(layout_dir).arg(&dest_url);

    if target.insecure {
        cmd.arg("--dest-tls-verify=false");
    }
    if let Some((user, password)) = &target.credentials {
        cmd.arg("--dest-creds").arg(format!("{user}:{password}"));
    }

    let output = cmd
        .output()
        .await
        .map_err(|e| CoreError::External(format!("copy tool unavailable: {e}")))?;

    if !output.status.success() {
        return Err(CoreError::External(format!(
            "copy tool exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    tracing::info!(dest = %dest_url, "pushed image to registry");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_manifest(image_root: &Path, digest: &str, body: &Value) {
        let path = manifest_path(image_root, digest);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, serde_json::to_vec(body).unwrap()).unwrap();
    }

    fn write_blob(image_root: &Path, digest: &str, content: &[u8]) {
        let path = blob_path(image_root, digest);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
    }

    fn build_single_platform_image(image_root: &Path) -> String {
        let config_digest = "sha256:cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc";
        let layer_digest = "sha256:1111111111111111111111111111111111111111111111111111111111111";
        write_blob(image_root, config_digest, b"{}");
        write_blob(image_root, layer_digest, b"layer-bytes");

        let manifest_digest = "sha256:2222222222222222222222222222222222222222222222222222222222222";
        write_manifest(
            image_root,
            manifest_digest,
            &serde_json::json!({
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "config": { "digest": config_digest },
                "layers": [{ "digest": layer_digest }],
            }),
        );
        manifest_digest.to_string()
    }

    #[test]
    fn determine_root_picks_unreferenced_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let image_root = dir.path().join("img");
        let manifest_digest = build_single_platform_image(&image_root);

        let nodes = scan_manifests(&image_root).unwrap();
        let root = determine_root(&nodes, None).unwrap();
        assert_eq!(root, manifest_digest);
    }

    #[test]
    fn post_order_visits_children_before_index() {
        let dir = tempfile::tempdir().unwrap();
        let image_root = dir.path().join("img");
        let child_digest = build_single_platform_image(&image_root);

        let index_digest = "sha256:9999999999999999999999999999999999999999999999999999999999999";
        write_manifest(
            &image_root,
            index_digest,
            &serde_json::json!({
                "mediaType": "application/vnd.oci.image.index.v1+json",
                "manifests": [{ "digest": child_digest, "mediaType": "application/vnd.oci.image.manifest.v1+json" }],
            }),
        );

        let nodes = scan_manifests(&image_root).unwrap();
        let root = determine_root(&nodes, None).unwrap();
        assert_eq!(root, index_digest);

        let order = post_order(&nodes, &root);
        let child_pos = order.iter().position(|d| d == &child_digest).unwrap();
        let root_pos = order.iter().position(|d| d == &root).unwrap();
        assert!(child_pos < root_pos);
    }

    #[test]
    fn missing_blob_fails_before_staging() {
        let dir = tempfile::tempdir().unwrap();
        let image_root = dir.path().join("img");
        let manifest_digest = "sha256:3333333333333333333333333333333333333333333333333333333333333";
        write_manifest(
            &image_root,
            manifest_digest,
            &serde_json::json!({
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "layers": [{ "digest": "sha256:4444444444444444444444444444444444444444444444444444444444444" }],
            }),
        );

        let nodes = scan_manifests(&image_root).unwrap();
        let order = post_order(&nodes, manifest_digest);
        let blobs = collect_blob_digests(&nodes, &order);
        assert!(verify_blobs_present(&image_root, &blobs).is_err());
    }

    #[test]
    fn dest_repository_trims_and_joins_prefix() {
        assert_eq!(dest_repository(Some("/mirror/"), "/epel/images/"), "mirror/epel/images");
        assert_eq!(dest_repository(None, "epel/images"), "epel/images");
        assert_eq!(dest_repository(Some("  "), "epel"), "epel");
    }

    #[test]
    fn sanitize_digest_tag_replaces_colon() {
        assert_eq!(
            sanitize_digest_tag("sha256:abcd"),
            "digest-sha256-abcd"
        );
    }

    #[tokio::test]
    async fn push_image_invokes_copy_tool_and_reports_counts() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        build_single_platform_image(&data_dir.join("images").join("epel-base"));

        let script_path = dir.path().join("fake-copy.sh");
        std::fs::write(&script_path, "#!/bin/sh\nexit 0\n").unwrap();
        let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script_path, perms).unwrap();

        let opts = PushOptions {
            data_dir,
            source_provider: "images".to_string(),
            image_name: "epel-base".to_string(),
            reference: None,
            target: RegistryTarget {
                endpoint: "registry.example.internal".to_string(),
                repo_prefix: Some("mirror".to_string()),
                insecure: true,
                credentials: Some(("user".to_string(), "pass".to_string())),
                copy_tool_path: script_path,
            },
        };

        let report = push_image(&opts).await.unwrap();
        assert_eq!(report.repository, "mirror/epel-base");
        assert_eq!(report.manifests_staged, 1);
        assert_eq!(report.blobs_staged, 2);
    }

    #[tokio::test]
    async fn push_image_fails_when_copy_tool_exits_nonzero() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        build_single_platform_image(&data_dir.join("images").join("epel-base"));

        let script_path = dir.path().join("fake-copy.sh");
        std::fs::write(&script_path, "#!/bin/sh\necho boom >&2\nexit 1\n").unwrap();
        let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script_path, perms).unwrap();

        let opts = PushOptions {
            data_dir,
            source_provider: "images".to_string(),
            image_name: "epel-base".to_string(),
            reference: None,
            target: RegistryTarget {
                endpoint: "registry.example.internal".to_string(),
                repo_prefix: None,
                insecure: false,
                credentials: None,
                copy_tool_path: script_path,
            },
        };

        assert!(push_image(&opts).await.is_err());
    }
}
