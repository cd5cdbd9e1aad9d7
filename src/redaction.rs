use crate::constants::SENSITIVE_HEADERS;
use crate::types::{FormPart, RequestBody, RequestDescriptor};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::io::Write;

lazy_static! {
    static ref REDACTION_REGEX: Regex = Regex::new(
        r"(?i)(sk-[A-Za-z0-9_\-]{20,}|Bearer\s+[^\s]+|x-api-key:\s*[^\s]+|([?&](?:key|api_key|token)=)[^&\s]+)"
    )
    .expect("redaction regex is valid");
}

const REDACTED: &str = "[REDACTED]";

/// Masks credential-shaped substrings in free text.
pub fn redact_text(input: &str) -> String {
    REDACTION_REGEX
        .replace_all(input, |caps: &regex::Captures| match caps.get(2) {
            // Keep the query parameter name so the URL stays readable
            Some(param) => format!("{}{}", param.as_str(), REDACTED),
            None => REDACTED.to_string(),
        })
        .into_owned()
}

fn is_secret_key(key: &str) -> bool {
    let k = key.to_lowercase();
    k.contains("key")
        || k.contains("token")
        || k.contains("secret")
        || k.contains("password")
        || k == "authorization"
}

/// Secret-named fields masked, large inline payloads (image data) elided.
pub fn redact_value(v: &mut Value) {
    match v {
        Value::Object(map) => {
            for (k, val) in map.iter_mut() {
                if is_secret_key(k) && val.is_string() {
                    *val = Value::String(REDACTED.to_string());
                } else {
                    redact_value(val);
                }
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(redact_value),
        Value::String(s) => {
            if s.starts_with("data:") && s.len() > 100 {
                *s = "[REDACTED-DATA]".to_string();
            } else {
                let masked = redact_text(s);
                if masked != *s {
                    *s = masked;
                }
            }
        }
        _ => {}
    }
}

/// Copy of a request that is safe to log.
pub fn redact_descriptor(descriptor: &RequestDescriptor) -> RequestDescriptor {
    let headers = descriptor
        .headers
        .iter()
        .map(|(k, v)| {
            let sensitive = SENSITIVE_HEADERS
                .iter()
                .any(|h| h.eq_ignore_ascii_case(k));
            let value = if sensitive {
                REDACTED.to_string()
            } else {
                redact_text(v)
            };
            (k.clone(), value)
        })
        .collect();

    let body = descriptor.body.as_ref().map(|body| match body {
        RequestBody::Json(value) => {
            let mut value = value.clone();
            redact_value(&mut value);
            RequestBody::Json(value)
        }
        RequestBody::Raw(text) => RequestBody::Raw(redact_text(text)),
        RequestBody::Form(parts) => RequestBody::Raw(redact_text(&FormPart::join(parts))),
    });

    RequestDescriptor {
        method: descriptor.method.clone(),
        url: redact_text(&descriptor.url),
        headers,
        body,
    }
}

/// Log sink wrapper that scrubs secrets from every formatted line.
pub struct RedactingWriter<W: Write> {
    inner: W,
}

impl<W: Write> RedactingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let input = String::from_utf8_lossy(buf);
        let redacted = redact_text(&input);
        self.inner.write_all(redacted.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
