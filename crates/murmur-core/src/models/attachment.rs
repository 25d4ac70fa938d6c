use serde::{Deserialize, Serialize};

/// NIP-92 file attachment. Carried as opaque metadata on outgoing messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment {
    pub url: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Extra `key value` entries appended to the imeta tag verbatim.
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
}

impl FileAttachment {
    pub fn new(url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime_type: mime_type.into(),
            size: None,
            name: None,
            tags: Vec::new(),
        }
    }

    /// Render as an `imeta` tag: `["imeta", "url …", "m …", "size …", …]`.
    pub fn to_imeta_tag(&self) -> Vec<String> {
        let mut tag = vec![
            "imeta".to_string(),
            format!("url {}", self.url),
            format!("m {}", self.mime_type),
        ];
        if let Some(size) = self.size {
            tag.push(format!("size {}", size));
        }
        if let Some(name) = &self.name {
            tag.push(format!("name {}", name));
        }
        for extra in &self.tags {
            if !extra.is_empty() {
                tag.push(extra.join(" "));
            }
        }
        tag
    }
}
