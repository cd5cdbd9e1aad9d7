use std::borrow::Cow;

/// Safely returns a prefix of the string with at most `max_chars` characters.
/// This respects UTF-8 character boundaries.
pub fn prefix_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Truncates to `max_chars` characters, appending an ellipsis when cut.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> Cow<'_, str> {
    let prefix = prefix_chars(s, max_chars);
    if prefix.len() == s.len() {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(format!("{}…", prefix))
    }
}

/// Uppercases a variable name the way placeholders are matched.
pub fn normalize_var_name(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}
