//! Placeholder replacement across strings and arbitrarily nested JSON.

use crate::constants::IMAGE_VAR;
use crate::str_utils::normalize_var_name;
use crate::types::{FormPart, RequestBody, RequestDescriptor};
use crate::variables::{VariableSet, PLACEHOLDER_REGEX};
use regex::Captures;
use serde_json::Value;

/// Resolved values for one request: caller variables, the reserved text
/// placeholders and the image payloads.
#[derive(Debug, Clone, Copy)]
pub struct SubstitutionContext<'a> {
    pub vars: &'a VariableSet,
    pub images: &'a [String],
}

impl<'a> SubstitutionContext<'a> {
    pub fn new(vars: &'a VariableSet, images: &'a [String]) -> Self {
        Self { vars, images }
    }

    fn lookup(&self, name: &str) -> Option<String> {
        let name = normalize_var_name(name);
        if name == IMAGE_VAR {
            return Some(
                self.images
                    .first()
                    .map(|img| raw_base64(img).to_string())
                    .unwrap_or_default(),
            );
        }
        self.vars.get(&name).map(str::to_string)
    }
}

/// Drops a `data:<mime>;base64,` prefix so the payload can be embedded in a
/// template that supplies its own framing.
pub fn raw_base64(image: &str) -> &str {
    if image.starts_with("data:") {
        if let Some((_, payload)) = image.split_once(";base64,") {
            return payload;
        }
    }
    image
}

fn replace_with<F>(text: &str, ctx: &SubstitutionContext<'_>, encode: F) -> String
where
    F: Fn(&str) -> String,
{
    PLACEHOLDER_REGEX
        .replace_all(text, |caps: &Captures| match ctx.lookup(&caps[1]) {
            Some(value) => encode(&value),
            None => {
                tracing::debug!("Leaving unresolved placeholder {} in place", &caps[0]);
                caps[0].to_string()
            }
        })
        .into_owned()
}

/// Single pass: substituted values are never scanned for placeholders again.
pub fn substitute_str(text: &str, ctx: &SubstitutionContext<'_>) -> String {
    replace_with(text, ctx, str::to_string)
}

/// Like [`substitute_str`] but escapes each value for use inside a JSON
/// string literal.
pub fn substitute_json_str(text: &str, ctx: &SubstitutionContext<'_>) -> String {
    replace_with(text, ctx, json_escape)
}

/// Substitutes each form part, URL-encoding the values inserted into parts
/// from `--data-urlencode`.
pub fn substitute_form(parts: &[FormPart], ctx: &SubstitutionContext<'_>) -> String {
    parts
        .iter()
        .map(|part| {
            if part.encode_values {
                replace_with(&part.text, ctx, |v| urlencoding::encode(v).into_owned())
            } else {
                substitute_str(&part.text, ctx)
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn json_escape(value: &str) -> String {
    let quoted = Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

fn is_pure_placeholder(text: &str, name: &str) -> bool {
    match PLACEHOLDER_REGEX.captures(text) {
        Some(caps) => {
            let whole = caps.get(0).map(|m| m.start() == 0 && m.end() == text.len());
            whole == Some(true) && normalize_var_name(&caps[1]) == name
        }
        None => false,
    }
}

pub fn substitute_value(value: &Value, ctx: &SubstitutionContext<'_>) -> Value {
    match value {
        Value::String(s) => Value::String(substitute_str(s, ctx)),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    // `["{{IMAGE}}"]` expands to one element per image
                    Value::String(s) if is_pure_placeholder(s, IMAGE_VAR) => {
                        out.extend(
                            ctx.images
                                .iter()
                                .map(|img| Value::String(raw_base64(img).to_string())),
                        );
                    }
                    other => out.push(substitute_value(other, ctx)),
                }
            }
            Value::Array(out)
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                out.insert(substitute_str(key, ctx), substitute_value(val, ctx));
            }
            Value::Object(out)
        }
        _ => value.clone(),
    }
}

fn looks_like_json(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with('{') || trimmed.starts_with('[')
}

pub fn substitute_body(body: &RequestBody, ctx: &SubstitutionContext<'_>) -> RequestBody {
    match body {
        RequestBody::Json(value) => RequestBody::Json(substitute_value(value, ctx)),
        RequestBody::Raw(text) if looks_like_json(text) => {
            // Unquoted placeholders (`"max_tokens": {{MAX}}`) only become
            // valid JSON after substitution.
            let substituted = substitute_json_str(text, ctx);
            match serde_json::from_str::<Value>(&substituted) {
                Ok(value) => RequestBody::Json(value),
                Err(_) => RequestBody::Raw(substituted),
            }
        }
        RequestBody::Raw(text) => RequestBody::Raw(substitute_str(text, ctx)),
        RequestBody::Form(parts) => RequestBody::Raw(substitute_form(parts, ctx)),
    }
}

pub fn substitute_descriptor(
    descriptor: &RequestDescriptor,
    ctx: &SubstitutionContext<'_>,
) -> RequestDescriptor {
    RequestDescriptor {
        method: descriptor.method.clone(),
        url: substitute_str(&descriptor.url, ctx),
        headers: descriptor
            .headers
            .iter()
            .map(|(k, v)| (substitute_str(k, ctx), substitute_str(v, ctx)))
            .collect(),
        body: descriptor.body.as_ref().map(|b| substitute_body(b, ctx)),
    }
}

/// Placeholders still present anywhere in the descriptor.
pub fn unresolved_placeholders(descriptor: &RequestDescriptor) -> Vec<String> {
    let mut texts = vec![descriptor.url.clone()];
    for (k, v) in &descriptor.headers {
        texts.push(k.clone());
        texts.push(v.clone());
    }
    match &descriptor.body {
        Some(RequestBody::Json(v)) => texts.push(v.to_string()),
        Some(RequestBody::Raw(s)) => texts.push(s.clone()),
        Some(RequestBody::Form(parts)) => texts.push(FormPart::join(parts)),
        None => {}
    }

    let mut names = Vec::new();
    for text in &texts {
        for name in crate::variables::extract_placeholders(text) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> VariableSet {
        let mut v = VariableSet::new();
        v.insert("api_key", "sk-123");
        v.insert("MODEL", "gpt-x");
        v.with_reserved(Some("be brief"), "say \"hi\"")
    }

    #[test]
    fn test_substitute_nested_json() {
        let vars = vars();
        let ctx = SubstitutionContext::new(&vars, &[]);
        let body = json!({
            "model": "{{MODEL}}",
            "n": 2,
            "stream": true,
            "meta": {"tags": ["{{model}}", null, {"{{MODEL}}_key": "v"}]},
            "system": "{{SYSTEM_PROMPT}}"
        });
        assert_eq!(
            substitute_value(&body, &ctx),
            json!({
                "model": "gpt-x",
                "n": 2,
                "stream": true,
                "meta": {"tags": ["gpt-x", null, {"gpt-x_key": "v"}]},
                "system": "be brief"
            })
        );
    }

    #[test]
    fn test_unresolved_left_literal() {
        let vars = VariableSet::new();
        let ctx = SubstitutionContext::new(&vars, &[]);
        assert_eq!(substitute_str("k={{MISSING}}", &ctx), "k={{MISSING}}");
    }

    #[test]
    fn test_values_are_not_rescanned() {
        let mut vars = VariableSet::new();
        vars.insert("A", "{{B}}");
        vars.insert("B", "nope");
        let ctx = SubstitutionContext::new(&vars, &[]);
        assert_eq!(substitute_str("{{A}}", &ctx), "{{B}}");
    }

    #[test]
    fn test_image_array_expansion() {
        let vars = VariableSet::new();
        let images = vec!["data:image/jpeg;base64,AAAA".to_string(), "BBBB".to_string()];
        let ctx = SubstitutionContext::new(&vars, &images);
        let body = json!({"images": ["{{IMAGE}}"], "first": "{{IMAGE}}"});
        assert_eq!(
            substitute_value(&body, &ctx),
            json!({"images": ["AAAA", "BBBB"], "first": "AAAA"})
        );

        let none: Vec<String> = Vec::new();
        let ctx = SubstitutionContext::new(&vars, &none);
        assert_eq!(
            substitute_value(&body, &ctx),
            json!({"images": [], "first": ""})
        );
    }

    #[test]
    fn test_raw_json_body_reparsed_with_escaping() {
        let mut vars = vars();
        vars.insert("MAX", "128");
        let ctx = SubstitutionContext::new(&vars, &[]);
        let body = RequestBody::Raw(r#"{"prompt": "{{TEXT}}", "max_tokens": {{MAX}}}"#.into());
        assert_eq!(
            substitute_body(&body, &ctx),
            RequestBody::Json(json!({"prompt": "say \"hi\"", "max_tokens": 128}))
        );
    }

    #[test]
    fn test_form_body_substituted_as_text() {
        let vars = vars();
        let ctx = SubstitutionContext::new(&vars, &[]);
        let body = RequestBody::Raw("model={{MODEL}}".into());
        assert_eq!(substitute_body(&body, &ctx), RequestBody::Raw("model=gpt-x".into()));
    }

    #[test]
    fn test_form_values_encoded_only_in_urlencode_parts() {
        let v = vars();
        let ctx = SubstitutionContext::new(&v, &[]);
        let body = RequestBody::Form(vec![
            FormPart::literal("model={{MODEL}}"),
            FormPart::encoded("prompt={{TEXT}}"),
        ]);
        assert_eq!(
            substitute_body(&body, &ctx),
            RequestBody::Raw("model=gpt-x&prompt=say%20%22hi%22".into())
        );
    }

    #[test]
    fn test_descriptor_url_and_headers() {
        let vars = vars();
        let ctx = SubstitutionContext::new(&vars, &[]);
        let d = RequestDescriptor {
            method: "POST".into(),
            url: "https://x.test/{{MODEL}}?key={{API_KEY}}".into(),
            headers: vec![("Authorization".into(), "Bearer {{API_KEY}}".into())],
            body: None,
        };
        let out = substitute_descriptor(&d, &ctx);
        assert_eq!(out.url, "https://x.test/gpt-x?key=sk-123");
        assert_eq!(out.header("authorization"), Some("Bearer sk-123"));
        assert!(unresolved_placeholders(&out).is_empty());
    }
}
