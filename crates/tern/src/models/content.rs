use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextContent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContent {
    /// Base64 encoded image bytes
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedResource {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64 encoded payload for binary resources
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
/// Content returned by a tool server
pub enum Content {
    Text(TextContent),
    Image(ImageContent),
    Resource(EmbeddedResource),
}

impl Content {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Content::Text(TextContent { text: text.into() })
    }

    pub fn image<S: Into<String>, T: Into<String>>(data: S, mime_type: T) -> Self {
        Content::Image(ImageContent {
            data: data.into(),
            mime_type: mime_type.into(),
        })
    }

    pub fn resource_text<S: Into<String>, T: Into<String>>(uri: S, text: T) -> Self {
        Content::Resource(EmbeddedResource {
            uri: uri.into(),
            mime_type: None,
            text: Some(text.into()),
            blob: None,
        })
    }

    /// Get the text content if this is a TextContent variant, or a text resource
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(&text.text),
            Content::Resource(resource) => resource.text.as_deref(),
            Content::Image(_) => None,
        }
    }

    /// Get the image content if this is an ImageContent variant
    pub fn as_image(&self) -> Option<(&str, &str)> {
        match self {
            Content::Image(image) => Some((&image.data, &image.mime_type)),
            _ => None,
        }
    }

    /// A short human readable rendering, used when content has to be folded into text
    pub fn summary(&self) -> String {
        match self {
            Content::Text(text) => text.text.clone(),
            Content::Image(image) => format!("[image: {}]", image.mime_type),
            Content::Resource(resource) => match &resource.text {
                Some(text) => text.clone(),
                None => format!(
                    "[resource: {} ({})]",
                    resource.uri,
                    resource.mime_type.as_deref().unwrap_or("application/octet-stream")
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_serialization_is_tagged() {
        let value = serde_json::to_value(Content::text("hello")).unwrap();
        assert_eq!(value, json!({"type": "text", "text": "hello"}));

        let value = serde_json::to_value(Content::image("aGk=", "image/png")).unwrap();
        assert_eq!(
            value,
            json!({"type": "image", "data": "aGk=", "mimeType": "image/png"})
        );
    }

    #[test]
    fn test_as_text_covers_text_resources() {
        assert_eq!(Content::text("a").as_text(), Some("a"));
        assert_eq!(
            Content::resource_text("file:///a.txt", "body").as_text(),
            Some("body")
        );
        assert_eq!(Content::image("x", "image/png").as_text(), None);
    }

    #[test]
    fn test_summary_describes_binary_content() {
        assert_eq!(Content::image("x", "image/jpeg").summary(), "[image: image/jpeg]");
        let blob = Content::Resource(EmbeddedResource {
            uri: "file:///a.bin".to_string(),
            mime_type: None,
            text: None,
            blob: Some("AAAA".to_string()),
        });
        assert_eq!(
            blob.summary(),
            "[resource: file:///a.bin (application/octet-stream)]"
        );
    }
}
