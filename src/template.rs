//! Decomposes a pasted `curl` command into a [`RequestDescriptor`].
//!
//! Nothing here runs a shell. The template goes through a small word
//! splitter that understands the quoting people actually paste (single
//! quotes, double quotes with backslash escapes, `\` line continuations) and
//! then through a flag grammar that covers the request-shaping subset of
//! curl's options.

use crate::types::{FormPart, RequestBody, RequestDescriptor, Result, WirecastError};
use crate::variables::PLACEHOLDER_REGEX;
use base64::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagKind {
    Method,
    Header,
    Data,
    DataRaw,
    DataUrlencode,
    Json,
    Url,
    User,
    UserAgent,
    Referer,
    Cookie,
    /// Transfer options that take a value but do not shape the request.
    IgnoredWithValue,
    /// Transfer switches such as `--silent`.
    IgnoredSwitch,
}

impl FlagKind {
    fn takes_value(self) -> bool {
        !matches!(self, FlagKind::IgnoredSwitch)
    }
}

fn short_flag(c: char) -> Option<FlagKind> {
    match c {
        'X' => Some(FlagKind::Method),
        'H' => Some(FlagKind::Header),
        'd' => Some(FlagKind::Data),
        'u' => Some(FlagKind::User),
        'A' => Some(FlagKind::UserAgent),
        'e' => Some(FlagKind::Referer),
        'b' => Some(FlagKind::Cookie),
        'o' | 'm' | 'w' | 'x' | 'r' | 'y' | 'Y' => Some(FlagKind::IgnoredWithValue),
        's' | 'S' | 'L' | 'k' | 'i' | 'v' | 'f' | 'N' | 'g' | '#' => {
            Some(FlagKind::IgnoredSwitch)
        }
        _ => None,
    }
}

fn long_flag(name: &str) -> Option<FlagKind> {
    match name {
        "request" => Some(FlagKind::Method),
        "header" => Some(FlagKind::Header),
        "data" | "data-binary" | "data-ascii" => Some(FlagKind::Data),
        "data-raw" => Some(FlagKind::DataRaw),
        "data-urlencode" => Some(FlagKind::DataUrlencode),
        "json" => Some(FlagKind::Json),
        "url" => Some(FlagKind::Url),
        "user" => Some(FlagKind::User),
        "user-agent" => Some(FlagKind::UserAgent),
        "referer" => Some(FlagKind::Referer),
        "cookie" => Some(FlagKind::Cookie),
        "output" | "max-time" | "connect-timeout" | "retry" | "retry-delay" | "write-out"
        | "proxy" | "cacert" | "cert" | "limit-rate" | "speed-time" | "speed-limit" => {
            Some(FlagKind::IgnoredWithValue)
        }
        "silent" | "show-error" | "location" | "insecure" | "include" | "verbose"
        | "compressed" | "no-buffer" | "fail" | "globoff" | "http1.1" | "http2" | "ipv4"
        | "ipv6" | "progress-bar" | "no-progress-meter" => Some(FlagKind::IgnoredSwitch),
        _ => None,
    }
}

/// Long options that shape the body or headers but are not supported. An
/// unknown flag in this family means the request cannot be reconstructed.
fn is_shaping_lookalike(name: &str) -> bool {
    name.starts_with("data") || name.starts_with("header") || name.starts_with("form")
}

fn parse_error(msg: impl Into<String>) -> crate::types::ObservedError {
    WirecastError::TemplateParse(msg.into()).into()
}

/// Splits command text into words the way a POSIX shell would, without
/// expansion or execution.
pub fn split_command_words(text: &str) -> Result<Vec<String>> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mode {
        Normal,
        SingleQuoted,
        DoubleQuoted,
    }

    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut mode = Mode::Normal;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match mode {
            Mode::Normal => match ch {
                '\'' => {
                    mode = Mode::SingleQuoted;
                    in_word = true;
                }
                '"' => {
                    mode = Mode::DoubleQuoted;
                    in_word = true;
                }
                '\\' => match chars.next() {
                    Some('\n') => {}
                    Some('\r') => {
                        if chars.peek() == Some(&'\n') {
                            chars.next();
                        }
                    }
                    Some(next) => {
                        current.push(next);
                        in_word = true;
                    }
                    None => return Err(parse_error("Trailing backslash at end of template")),
                },
                c if c.is_whitespace() => {
                    if in_word {
                        out.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                _ => {
                    current.push(ch);
                    in_word = true;
                }
            },
            Mode::SingleQuoted => {
                if ch == '\'' {
                    mode = Mode::Normal;
                } else {
                    current.push(ch);
                }
            }
            Mode::DoubleQuoted => match ch {
                '"' => mode = Mode::Normal,
                '\\' => match chars.peek().copied() {
                    Some(next @ ('"' | '\\' | '$' | '`')) => {
                        current.push(next);
                        chars.next();
                    }
                    Some('\n') => {
                        chars.next();
                    }
                    _ => current.push('\\'),
                },
                _ => current.push(ch),
            },
        }
    }

    match mode {
        Mode::SingleQuoted => return Err(parse_error("Unterminated single-quoted string")),
        Mode::DoubleQuoted => return Err(parse_error("Unterminated double-quoted string")),
        Mode::Normal => {}
    }
    if in_word {
        out.push(current);
    }
    if out.is_empty() {
        return Err(parse_error("Empty request template"));
    }
    Ok(out)
}

#[derive(Default)]
struct CurlRequestBuilder {
    method: Option<String>,
    url: Option<String>,
    headers: Vec<(String, String)>,
    data_parts: Vec<FormPart>,
    json_flag: bool,
}

impl CurlRequestBuilder {
    fn apply(&mut self, kind: FlagKind, flag: &str, value: String) -> Result<()> {
        match kind {
            FlagKind::Method => {
                let method = value.trim().to_ascii_uppercase();
                if method.is_empty() {
                    return Err(parse_error(format!("Option {} requires a method", flag)));
                }
                self.method = Some(method);
            }
            FlagKind::Header => {
                let (name, val) = value.split_once(':').ok_or_else(|| {
                    parse_error(format!(
                        "Invalid header {:?} (expected \"Name: value\")",
                        value
                    ))
                })?;
                let name = name.trim();
                if name.is_empty() {
                    return Err(parse_error(format!("Header {:?} has an empty name", value)));
                }
                self.headers
                    .push((name.to_string(), val.trim_start().to_string()));
            }
            FlagKind::Data => {
                if value.starts_with('@') {
                    return Err(parse_error(format!(
                        "Reading the request body from a file ({}) is not supported",
                        value
                    )));
                }
                self.data_parts.push(FormPart::literal(value));
            }
            FlagKind::DataRaw => self.data_parts.push(FormPart::literal(value)),
            FlagKind::DataUrlencode => self.data_parts.push(urlencode_part(&value)?),
            FlagKind::Json => {
                if value.starts_with('@') {
                    return Err(parse_error(format!(
                        "Reading the request body from a file ({}) is not supported",
                        value
                    )));
                }
                self.json_flag = true;
                self.data_parts.push(FormPart::literal(value));
            }
            FlagKind::Url => self.set_url(value)?,
            FlagKind::User => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(value.as_bytes());
                self.headers
                    .push(("Authorization".to_string(), format!("Basic {}", encoded)));
            }
            FlagKind::UserAgent => self.headers.push(("User-Agent".to_string(), value)),
            FlagKind::Referer => self.headers.push(("Referer".to_string(), value)),
            FlagKind::Cookie => self.headers.push(("Cookie".to_string(), value)),
            FlagKind::IgnoredWithValue => {
                tracing::debug!("Ignoring transfer option {} {:?}", flag, value);
            }
            FlagKind::IgnoredSwitch => {}
        }
        Ok(())
    }

    fn set_url(&mut self, url: String) -> Result<()> {
        if let Some(existing) = &self.url {
            return Err(parse_error(format!(
                "Multiple URLs in template ({} and {})",
                existing, url
            )));
        }
        self.url = Some(url);
        Ok(())
    }

    fn finish(self) -> Result<RequestDescriptor> {
        let url = self
            .url
            .ok_or_else(|| parse_error("Template does not contain a URL"))?;

        let body = if self.data_parts.is_empty() {
            None
        } else if self.data_parts.iter().any(|p| p.encode_values) {
            Some(RequestBody::Form(self.data_parts))
        } else {
            Some(parse_body(&FormPart::join(&self.data_parts)))
        };

        let mut descriptor = RequestDescriptor {
            method: self.method.unwrap_or_else(|| "POST".to_string()),
            url,
            headers: self.headers,
            body,
        };
        if self.json_flag {
            descriptor.set_header_if_absent("Content-Type", "application/json");
            descriptor.set_header_if_absent("Accept", "application/json");
        }
        Ok(descriptor)
    }
}

/// JSON bodies become structured values; anything else stays raw so that
/// string-level substitution can still run on it.
/// URL-encodes the literal text around placeholders. The placeholders stay
/// intact and their values are encoded during substitution.
fn encode_literal_segments(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut last = 0;
    for m in PLACEHOLDER_REGEX.find_iter(content) {
        out.push_str(&urlencoding::encode(&content[last..m.start()]));
        out.push_str(m.as_str());
        last = m.end();
    }
    out.push_str(&urlencoding::encode(&content[last..]));
    out
}

/// `--data-urlencode` value forms: `content`, `=content` and `name=content`
/// encode the content; `@file` and `name@file` read a file, which is
/// rejected. Whichever of `=` and `@` comes first decides the form.
fn urlencode_part(value: &str) -> Result<FormPart> {
    match value.find(['=', '@']) {
        Some(i) if value[i..].starts_with('@') => Err(parse_error(format!(
            "Reading the request body from a file ({}) is not supported",
            value
        ))),
        Some(0) => Ok(FormPart::encoded(encode_literal_segments(&value[1..]))),
        Some(i) => Ok(FormPart::encoded(format!(
            "{}={}",
            &value[..i],
            encode_literal_segments(&value[i + 1..])
        ))),
        None => Ok(FormPart::encoded(encode_literal_segments(value))),
    }
}

pub fn parse_body(text: &str) -> RequestBody {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => RequestBody::Json(value),
        Err(e) => {
            tracing::debug!("Template body is not JSON, keeping it raw: {}", e);
            RequestBody::Raw(text.to_string())
        }
    }
}

fn take_value(
    flag: &str,
    attached: Option<String>,
    words: &mut std::vec::IntoIter<String>,
) -> Result<String> {
    match attached {
        Some(v) => Ok(v),
        None => words
            .next()
            .ok_or_else(|| parse_error(format!("Option {} requires a value", flag))),
    }
}

pub fn parse_template(template: &str) -> Result<RequestDescriptor> {
    let words = split_command_words(template)?;
    let mut words = words.into_iter();
    let mut builder = CurlRequestBuilder::default();
    let mut positional_only = false;

    let mut first = true;
    while let Some(word) = words.next() {
        if first {
            first = false;
            if word.eq_ignore_ascii_case("curl") {
                continue;
            }
        }

        if positional_only || word == "-" || !word.starts_with('-') {
            builder.set_url(word)?;
            continue;
        }
        if word == "--" {
            positional_only = true;
            continue;
        }

        if let Some(long) = word.strip_prefix("--") {
            let (name, attached) = match long.split_once('=') {
                Some((n, v)) => (n, Some(v.to_string())),
                None => (long, None),
            };
            match long_flag(name) {
                Some(kind) if kind.takes_value() => {
                    let flag = format!("--{}", name);
                    let value = take_value(&flag, attached, &mut words)?;
                    builder.apply(kind, &flag, value)?;
                }
                Some(_) => {}
                None if is_shaping_lookalike(name) => {
                    return Err(parse_error(format!("Unsupported option --{}", name)));
                }
                None => tracing::warn!("Ignoring unknown curl option --{}", name),
            }
            continue;
        }

        // Short option cluster: `-sSL`, `-XPOST`, `-d{...}`
        let cluster: Vec<char> = word[1..].chars().collect();
        let mut i = 0;
        while i < cluster.len() {
            let c = cluster[i];
            match short_flag(c) {
                Some(kind) if kind.takes_value() => {
                    let rest: String = cluster[i + 1..].iter().collect();
                    let attached = if rest.is_empty() { None } else { Some(rest) };
                    let flag = format!("-{}", c);
                    let value = take_value(&flag, attached, &mut words)?;
                    builder.apply(kind, &flag, value)?;
                    break;
                }
                Some(_) => {}
                None if c == 'F' || c == 'T' => {
                    return Err(parse_error(format!("Unsupported option -{}", c)));
                }
                None => tracing::warn!("Ignoring unknown curl option -{}", c),
            }
            i += 1;
        }
    }

    builder.finish()
}
