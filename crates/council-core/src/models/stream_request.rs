use std::path::PathBuf;

use serde::Serialize;

/// Which stream a turn opens.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnMode {
    /// Full three-stage council
    #[default]
    Council,
    /// Single-model chat; the server emits Stage 3 events only
    Chat,
}

/// Scoping sent along with every message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StreamContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub departments: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub playbooks: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachment_ids: Vec<String>,
}

/// A file the user attached to a message, not yet uploaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl AttachmentFile {
    /// Read a file from disk, guessing the mime type from its extension.
    pub async fn from_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let bytes = tokio::fs::read(&path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment".to_string());
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let mime_type = match ext.as_str() {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "webp" => "image/webp",
            "pdf" => "application/pdf",
            _ => "application/octet-stream",
        }
        .to_string();

        Ok(Self {
            file_name,
            mime_type,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_serializes_only_set_fields() {
        let context = StreamContext {
            business_id: Some("acme".to_string()),
            roles: vec!["cfo".to_string()],
            ..Default::default()
        };
        let json = serde_json::to_value(&context).unwrap();
        assert_eq!(json, serde_json::json!({"business_id": "acme", "roles": ["cfo"]}));
    }

    #[tokio::test]
    async fn test_attachment_from_path_guesses_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chart.PNG");
        tokio::fs::write(&path, b"fake").await.unwrap();

        let file = AttachmentFile::from_path(&path).await.unwrap();
        assert_eq!(file.file_name, "chart.PNG");
        assert_eq!(file.mime_type, "image/png");
        assert_eq!(file.bytes, b"fake");
    }
}
