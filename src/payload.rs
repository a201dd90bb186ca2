//! Decoding of the data the mini-app posts back through `web_app_data`.
//!
//! The web app sends a JSON object whose `image` field is a data URL
//! (`data:image/<subtype>;base64,<body>`) and whose optional `filename` names
//! the file to deliver. Anything that is valid JSON but carries no image is
//! handed back untouched so the caller can echo it.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::debug;

pub const DEFAULT_FILENAME: &str = "card.png";
pub const DEFAULT_MIME: &str = "image/png";

const MAX_FILENAME_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("image is not a data URL (missing ',' separator)")]
    MalformedDataUrl,

    #[error("image body is not valid base64: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("image body decodes to zero bytes")]
    EmptyImage,
}

/// Recognized fields of a mini-app payload. Fields of the wrong JSON type
/// are treated as absent; everything else lands in `extra`.
#[derive(Debug, Default, Deserialize)]
pub struct WebAppPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    pub image: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub filename: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

impl WebAppPayload {
    /// View `value` as a payload. Non-object values yield an empty payload.
    pub fn from_value(value: &Value) -> Self {
        Self::deserialize(value).unwrap_or_default()
    }
}

/// A decoded image ready to be uploaded as a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAttachment {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime: String,
}

#[derive(Debug, PartialEq)]
pub enum DecodeOutcome {
    Image(DecodedAttachment),
    /// Valid JSON without a `data:image` field, returned exactly as parsed.
    NotAnImage(Value),
}

/// Decode the raw `web_app_data` text.
pub fn decode(raw: &str) -> Result<DecodeOutcome, DecodeError> {
    let value: Value = serde_json::from_str(raw)?;
    let payload = WebAppPayload::from_value(&value);

    let image = match payload.image.as_deref() {
        Some(image) if image.starts_with("data:image") => image,
        _ => {
            debug!(
                "Payload carries no image ({} other field(s))",
                payload.extra.len()
            );
            return Ok(DecodeOutcome::NotAnImage(value));
        }
    };

    let (header, body) = image
        .split_once(',')
        .ok_or(DecodeError::MalformedDataUrl)?;

    let mime = parse_image_mime(header).unwrap_or(DEFAULT_MIME).to_string();
    let filename = resolve_filename(payload.filename.as_deref(), &mime);
    let bytes = STANDARD.decode(body.trim())?;
    if bytes.is_empty() {
        return Err(DecodeError::EmptyImage);
    }

    Ok(DecodeOutcome::Image(DecodedAttachment {
        bytes,
        filename,
        mime,
    }))
}

/// Extract `image/<subtype>` from a `data:image/<subtype>;base64` header.
fn parse_image_mime(header: &str) -> Option<&str> {
    let mime = header.strip_prefix("data:")?.strip_suffix(";base64")?;
    let subtype = mime.strip_prefix("image/")?;
    let is_token = !subtype.is_empty()
        && subtype
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.' | '_'));
    is_token.then_some(mime)
}

fn resolve_filename(requested: Option<&str>, mime: &str) -> String {
    let mut name = requested
        .map(sanitize_filename)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string());

    if !name.contains('.') {
        let subtype = mime.split_once('/').map_or("png", |(_, subtype)| subtype);
        name.push('.');
        name.push_str(subtype);
    }

    name
}

/// Reduce a client-supplied name to a bare file name: last path component,
/// no control characters, no leading dots, bounded length.
pub fn sanitize_filename(raw: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    cleaned
        .trim()
        .trim_start_matches('.')
        .trim()
        .chars()
        .take(MAX_FILENAME_LEN)
        .collect()
}
