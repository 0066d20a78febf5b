//! Decoding of completed-job output into images.
//!
//! Deployed workers disagree on the shape of `output`. Observed forms:
//!
//! - a JSON *string* that must be parsed again: `"{\"image\": \"<b64>\"}"`
//! - an object: `{"image": "<b64>"}` or `{"images": ["<b64>", ...]}`
//! - an array: `["<b64>", ...]` or `[{"image": "<b64>"}, ...]`
//!
//! Any of them may carry a `data:image/...;base64,` prefix. All are accepted;
//! the first image is the result and any others are kept alongside.

use std::path::Path;

use base64::{Engine as _, engine::general_purpose};
use image::ImageFormat;
use serde_json::Value;

use crate::error::{AvatarError, AvatarResult};

/// How deep string-encoded JSON is unwrapped.
const MAX_NESTING: usize = 2;

/// A decoded result image, held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultImage {
    bytes: Vec<u8>,
    format: ImageFormat,
    extra: Vec<Vec<u8>>,
}

impl ResultImage {
    /// Decode one base64 payload and sniff its format.
    pub fn from_base64(payload: &str) -> AvatarResult<Self> {
        Ok(Self {
            bytes: decode_payload(payload)?,
            format: ImageFormat::Png,
            extra: Vec::new(),
        }
        .sniffed()?)
    }

    fn sniffed(mut self) -> AvatarResult<Self> {
        self.format = image::guess_format(&self.bytes).map_err(|e| {
            AvatarError::decode("result image", format!("payload is not a recognised image: {}", e))
        })?;
        Ok(self)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Additional images when the job produced more than one.
    pub fn extra(&self) -> &[Vec<u8>] {
        &self.extra
    }

    pub fn mime(&self) -> &'static str {
        self.format.to_mime_type()
    }

    pub fn extension(&self) -> &'static str {
        self.format.extensions_str().first().copied().unwrap_or("img")
    }

    /// `data:` URL suitable for direct display.
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime(),
            general_purpose::STANDARD.encode(&self.bytes)
        )
    }

    /// Write the primary image to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> AvatarResult<()> {
        let path = path.as_ref();
        std::fs::write(path, &self.bytes).map_err(|e| AvatarError::io_at("write result", path, e))
    }
}

/// Extract the result from a completed job's `output`.
///
/// `Ok(None)` means the output carries no image yet (keep polling);
/// an error means an image was present but could not be decoded.
pub fn decode_output(output: &Value) -> AvatarResult<Option<ResultImage>> {
    let mut payloads = Vec::new();
    collect_payloads(output, 0, &mut payloads);

    let mut iter = payloads.into_iter();
    let Some(first) = iter.next() else {
        return Ok(None);
    };
    let mut result = ResultImage::from_base64(&first)?;
    for payload in iter {
        result.extra.push(decode_payload(&payload)?);
    }
    Ok(Some(result))
}

fn collect_payloads(value: &Value, depth: usize, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                if depth < MAX_NESTING {
                    if let Ok(inner) = serde_json::from_str::<Value>(trimmed) {
                        collect_payloads(&inner, depth + 1, out);
                    }
                }
            } else if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        }
        Value::Object(map) => {
            if let Some(Value::String(image)) = map.get("image") {
                out.push(image.clone());
            }
            if let Some(Value::Array(images)) = map.get("images") {
                for item in images {
                    collect_item(item, out);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_item(item, out);
            }
        }
        _ => {}
    }
}

fn collect_item(item: &Value, out: &mut Vec<String>) {
    match item {
        Value::String(s) if !s.trim().is_empty() => out.push(s.trim().to_string()),
        Value::Object(map) => {
            if let Some(Value::String(image)) = map.get("image") {
                out.push(image.clone());
            }
        }
        _ => {}
    }
}

fn decode_payload(payload: &str) -> AvatarResult<Vec<u8>> {
    let body = match payload.find(";base64,") {
        Some(idx) if payload.starts_with("data:") => &payload[idx + ";base64,".len()..],
        _ => payload,
    };
    let cleaned: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = general_purpose::STANDARD.decode(cleaned.as_bytes())?;
    if bytes.is_empty() {
        return Err(AvatarError::decode("result image", "payload decoded to zero bytes"));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tiny_png_b64() -> String {
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 0, 0, 255]));
        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        general_purpose::STANDARD.encode(buf.into_inner())
    }

    #[test]
    fn string_encoded_json_is_unwrapped() {
        let b64 = tiny_png_b64();
        let output = Value::String(json!({ "image": b64 }).to_string());
        let result = decode_output(&output).unwrap().unwrap();
        assert_eq!(result.format(), ImageFormat::Png);
        assert_eq!(result.extension(), "png");
        assert!(result.data_url().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn structured_array_is_accepted() {
        let b64 = tiny_png_b64();
        let output = json!([{ "image": b64 }, { "image": b64 }]);
        let result = decode_output(&output).unwrap().unwrap();
        assert_eq!(result.extra().len(), 1);
    }

    #[test]
    fn images_field_and_data_url_prefix() {
        let b64 = format!("data:image/png;base64,{}", tiny_png_b64());
        let output = json!({ "images": [b64] });
        let result = decode_output(&output).unwrap().unwrap();
        assert_eq!(result.mime(), "image/png");
    }

    #[test]
    fn output_without_image_is_not_ready() {
        assert!(decode_output(&json!({ "progress": 0.5 })).unwrap().is_none());
        assert!(decode_output(&Value::Null).unwrap().is_none());
        assert!(decode_output(&Value::String(r#"{"status":"ok"}"#.into())).unwrap().is_none());
    }

    #[test]
    fn garbage_payload_is_a_decode_error() {
        let err = decode_output(&json!({ "image": "!!not base64!!" })).unwrap_err();
        assert_eq!(err.category(), "decode");

        let not_image = general_purpose::STANDARD.encode(b"plain text, not pixels");
        let err = decode_output(&json!({ "image": not_image })).unwrap_err();
        assert_eq!(err.category(), "decode");
    }
}
