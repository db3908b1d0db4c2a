//! Per-project metadata persisted as `.opencode-meta.json` inside the
//! workspace directory.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const META_FILE: &str = ".opencode-meta.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default)]
    pub auto_created: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Read a workspace's metadata. A missing or unparsable file reads as the
/// empty record.
pub async fn read_meta(workspace: &Path) -> ProjectMeta {
    let path = workspace.join(META_FILE);
    match tokio::fs::read(&path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparsable project metadata");
            ProjectMeta::default()
        }),
        Err(_) => ProjectMeta::default(),
    }
}

pub async fn write_meta(workspace: &Path, meta: &ProjectMeta) -> Result<()> {
    write_json_atomic(&workspace.join(META_FILE), meta).await
}

/// Serialize `value` as pretty JSON into a sibling temp file, then rename it
/// over `path`.
pub(crate) async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).context("Failed to serialize JSON")?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("JSON path has no file name")?;
    let tmp = path.with_file_name(format!("{}.tmp", file_name));
    tokio::fs::write(&tmp, &json)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_meta_reads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_meta(dir.path()).await, ProjectMeta::default());
    }

    #[tokio::test]
    async fn test_corrupt_meta_reads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(META_FILE), "{not json").unwrap();
        assert_eq!(read_meta(dir.path()).await, ProjectMeta::default());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let meta = ProjectMeta {
            repo: Some("https://github.com/acme/demo.git".into()),
            description: "demo".into(),
            created_at: Some(Utc::now()),
            created_by: Some("ana".into()),
            auto_created: true,
            port: Some(4101),
            password: Some("abc".into()),
        };
        write_meta(dir.path(), &meta).await.unwrap();
        assert_eq!(read_meta(dir.path()).await, meta);
        assert!(!dir.path().join(".opencode-meta.json.tmp").exists());
    }

    #[test]
    fn test_meta_uses_camel_case_keys() {
        let meta = ProjectMeta {
            auto_created: true,
            created_by: Some("ana".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["autoCreated"], true);
        assert_eq!(json["createdBy"], "ana");
        assert!(json.get("port").is_none());
    }

    #[test]
    fn test_meta_reads_partial_records() {
        let meta: ProjectMeta =
            serde_json::from_str(r#"{"repo":"https://x/y.git","port":4100}"#).unwrap();
        assert_eq!(meta.port, Some(4100));
        assert!(!meta.auto_created);
        assert!(meta.password.is_none());
    }
}
