//! Dotted / bracketed paths used to find generated text inside a JSON
//! response, e.g. `choices[0].delta.content` or `candidates.0.content.parts.0.text`.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Object key; an all-digit key also indexes arrays.
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContentPath {
    segments: Vec<PathSegment>,
}

impl ContentPath {
    /// Never fails: anything that does not parse as an index is a key.
    pub fn parse(path: &str) -> Self {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = path.trim().chars();

        fn flush(current: &mut String, segments: &mut Vec<PathSegment>) {
            if !current.is_empty() {
                segments.push(PathSegment::Key(std::mem::take(current)));
            }
        }

        while let Some(ch) = chars.next() {
            match ch {
                '.' => flush(&mut current, &mut segments),
                '[' => {
                    flush(&mut current, &mut segments);
                    let mut inner = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == ']' {
                            closed = true;
                            break;
                        }
                        inner.push(c);
                    }
                    if !closed {
                        tracing::debug!("Unclosed bracket in content path {:?}", path);
                    }
                    let inner = inner.trim();
                    let quoted = inner
                        .strip_prefix('"')
                        .and_then(|s| s.strip_suffix('"'))
                        .or_else(|| inner.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')));
                    match quoted {
                        Some(key) => segments.push(PathSegment::Key(key.to_string())),
                        None => match inner.parse::<usize>() {
                            Ok(i) => segments.push(PathSegment::Index(i)),
                            Err(_) if !inner.is_empty() => {
                                segments.push(PathSegment::Key(inner.to_string()))
                            }
                            Err(_) => {}
                        },
                    }
                }
                _ => current.push(ch),
            }
        }
        flush(&mut current, &mut segments);
        Self { segments }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut node = root;
        for segment in &self.segments {
            node = match (segment, node) {
                (PathSegment::Index(i), Value::Array(items)) => items.get(*i)?,
                (PathSegment::Key(k), Value::Object(map)) => map.get(k)?,
                (PathSegment::Key(k), Value::Array(items)) => items.get(k.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(node)
    }

    /// The string at this path, or empty when missing or not a string.
    pub fn resolve_text(&self, root: &Value) -> String {
        match self.resolve(root) {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        }
    }
}

impl From<&str> for ContentPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}
