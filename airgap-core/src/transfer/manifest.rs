//! `airgap-manifest.json`: the serialized, non-store artifact describing an
//! export. Unknown fields are ignored on read for forward compatibility —
//! `#[serde(default)]` throughout, no `deny_unknown_fields`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MANIFEST_VERSION: &str = "1.0";
pub const MANIFEST_FILENAME: &str = "airgap-manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProviderSummary {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_tag: Option<String>,
    #[serde(default)]
    pub file_count: u64,
    #[serde(default)]
    pub total_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ArchiveDescriptor {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub sha256: String,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FileInventoryEntry {
    pub provider: String,
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TransferManifest {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub source_host: String,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSummary>,
    #[serde(default)]
    pub archives: Vec<ArchiveDescriptor>,
    #[serde(default)]
    pub total_archives: u64,
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub file_inventory: Vec<FileInventoryEntry>,
}

fn default_version() -> String {
    MANIFEST_VERSION.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let mut providers = BTreeMap::new();
        providers.insert(
            "epel".to_string(),
            ProviderSummary {
                type_tag: Some("epel_mirror".into()),
                file_count: 2,
                total_size: 40,
            },
        );
        let manifest = TransferManifest {
            version: "1.0".into(),
            created: "2024-01-01T00:00:00Z".into(),
            source_host: "host1".into(),
            providers,
            archives: vec![ArchiveDescriptor {
                name: "airgap-transfer-001.tar.zst".into(),
                size: 40,
                sha256: "abc".into(),
                files: vec!["epel/a".into(), "epel/b".into()],
            }],
            total_archives: 1,
            total_size: 40,
            file_inventory: vec![FileInventoryEntry {
                provider: "epel".into(),
                path: "a".into(),
                size: 20,
                sha256: "aaa".into(),
            }],
        };

        let json = serde_json::to_string(&manifest).unwrap();
        let parsed: TransferManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(manifest, parsed);
    }

    #[test]
    fn unknown_fields_are_ignored_on_read() {
        let json = r#"{"version":"1.0","created":"x","source_host":"h","providers":{},"archives":[],"total_archives":0,"total_size":0,"file_inventory":[],"future_field":"ignored"}"#;
        let manifest: TransferManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.version, "1.0");
    }

    #[test]
    fn omitted_provider_type_is_permitted() {
        let json = r#"{"file_count":1,"total_size":10}"#;
        let summary: ProviderSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.type_tag, None);
    }
}
