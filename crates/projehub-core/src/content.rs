//! Inline file content stored as `data:` URIs.
//!
//! Every stored file body is a self-describing `data:<mime>;base64,<payload>`
//! string, so a record can be handed to a browser as a download source
//! without any further lookup.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::{Error, Result};

const FALLBACK_MIME: &str = "application/octet-stream";

/// A decoded `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[must_use]
pub fn encode_data_uri(mime_type: &str, bytes: &[u8]) -> String {
    let mime_type = if mime_type.trim().is_empty() {
        FALLBACK_MIME
    } else {
        mime_type
    };
    format!("data:{mime_type};base64,{}", STANDARD.encode(bytes))
}

pub fn decode_data_uri(uri: &str) -> Result<DataUri> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| Error::InvalidContent("missing data: prefix".to_string()))?;

    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| Error::InvalidContent("missing payload separator".to_string()))?;

    let mime_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| Error::InvalidContent("only base64 payloads are supported".to_string()))?;

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| Error::InvalidContent(e.to_string()))?;

    Ok(DataUri {
        mime_type: if mime_type.is_empty() {
            FALLBACK_MIME.to_string()
        } else {
            mime_type.to_string()
        },
        bytes,
    })
}

/// Byte length of the payload carried by a `data:` URI, computed from the
/// base64 text without decoding it.
#[must_use]
pub fn decoded_len(uri: &str) -> u64 {
    let Some((_, payload)) = uri.split_once(',') else {
        return 0;
    };
    let padding = payload.bytes().rev().take_while(|b| *b == b'=').count();
    ((payload.len() / 4) * 3).saturating_sub(padding) as u64
}
