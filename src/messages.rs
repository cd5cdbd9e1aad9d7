//! Rebuilds the conversation array of a chat-style request body.
//!
//! The template's conversation array is split at its user slot, the first
//! entry that references `{{TEXT}}` or `{{IMAGE}}`. Entries before the slot
//! form the prefix, of which only non-empty `system`/`developer` entries
//! survive. The history follows, then the substituted slot entry, so the new
//! user message keeps whatever shape the provider's template gives it.
//! Entries after the slot are dropped. A template with a preserved system
//! entry therefore yields `history + 2` entries rather than `history + 1`.
//! When no entry references the reserved text placeholders, the whole array
//! counts as prefix and the user message is appended as `{role, content}`.

use crate::constants::{IMAGE_VAR, MESSAGES_KEYS, PRESERVED_TEMPLATE_ROLES, TEXT_VAR};
use crate::substitution::{substitute_body, SubstitutionContext};
use crate::types::{Message, RequestBody, Result, Role, WirecastError};
use crate::variables::{extract_placeholders, references_image, VariableSet};
use serde_json::{json, Value};

/// Images are only accepted by templates that have somewhere to put them.
pub fn check_image_capability(template: &str, images: &[String]) -> Result<()> {
    if !images.is_empty() && !references_image(template) {
        return Err(WirecastError::UnsupportedImageInput {
            count: images.len(),
        }
        .into());
    }
    Ok(())
}

fn escape_pointer_token(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// JSON pointer to the first array under a recognized key, found
/// depth-first.
pub fn messages_pointer(body: &Value) -> Option<String> {
    match body {
        Value::Object(map) => {
            if let Some((key, _)) = map
                .iter()
                .find(|(k, v)| MESSAGES_KEYS.contains(&k.as_str()) && v.is_array())
            {
                return Some(format!("/{}", escape_pointer_token(key)));
            }
            map.iter().find_map(|(key, child)| {
                messages_pointer(child).map(|rest| format!("/{}{}", escape_pointer_token(key), rest))
            })
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, item)| messages_pointer(item).map(|rest| format!("/{}{}", i, rest))),
        _ => None,
    }
}

pub fn find_messages_array(body: &mut Value) -> Option<&mut Vec<Value>> {
    let pointer = messages_pointer(body)?;
    body.pointer_mut(&pointer).and_then(Value::as_array_mut)
}

/// Position of the first entry referencing `{{TEXT}}` or `{{IMAGE}}`.
pub fn user_slot_index(entries: &[Value]) -> Option<usize> {
    entries.iter().position(|entry| {
        extract_placeholders(&entry.to_string())
            .iter()
            .any(|name| name == TEXT_VAR || name == IMAGE_VAR)
    })
}

/// Locates the user slot in the unsubstituted template body. Caller
/// variables are resolved so bodies that only parse after substitution can
/// still be inspected, while `{{TEXT}}` and `{{IMAGE}}` stay visible as
/// markers.
pub fn locate_user_slot(template_body: &RequestBody, vars: &VariableSet) -> Option<usize> {
    let mut markers = vars.clone();
    markers.insert(TEXT_VAR, format!("{{{{{}}}}}", TEXT_VAR));
    let images = vec![format!("{{{{{}}}}}", IMAGE_VAR)];
    let ctx = SubstitutionContext::new(&markers, &images);
    match substitute_body(template_body, &ctx) {
        RequestBody::Json(mut body) => find_messages_array(&mut body).and_then(|e| user_slot_index(e)),
        RequestBody::Raw(_) | RequestBody::Form(_) => None,
    }
}

fn message_entry(role: Role, content: &str) -> Value {
    json!({ "role": role.as_str(), "content": content })
}

fn is_preserved_template_entry(entry: &Value) -> bool {
    let role = entry.get("role").and_then(Value::as_str).unwrap_or_default();
    if !PRESERVED_TEMPLATE_ROLES.contains(&role) {
        return false;
    }
    match entry.get("content") {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

/// Preserved prefix entries, the history, then the user entry. History
/// order is preserved and history images are not resent. `template_entries`
/// must already be substituted so the slot entry carries the real text and
/// images.
pub fn build_message_sequence(
    template_entries: &[Value],
    history: &[Message],
    user_message: &str,
    user_slot: Option<usize>,
) -> Vec<Value> {
    let (prefix, slot_entry) = match user_slot.and_then(|i| template_entries.get(i).map(|e| (i, e))) {
        Some((i, entry)) => (&template_entries[..i], Some(entry.clone())),
        None => (template_entries, None),
    };
    if let Some(i) = user_slot {
        let dropped = template_entries.len().saturating_sub(i + 1);
        if dropped > 0 {
            tracing::debug!("Dropping {} template entries after the user slot", dropped);
        }
    }

    let mut out: Vec<Value> = prefix
        .iter()
        .filter(|e| is_preserved_template_entry(e))
        .cloned()
        .collect();
    out.extend(history.iter().map(|m| message_entry(m.role, &m.content)));
    out.push(slot_entry.unwrap_or_else(|| message_entry(Role::User, user_message)));
    out
}

/// Replaces the recognized conversation array in place. Returns false and
/// leaves the body untouched when the body has no such key.
pub fn apply_message_sequence(
    body: &mut Value,
    history: &[Message],
    user_message: &str,
    user_slot: Option<usize>,
) -> bool {
    match find_messages_array(body) {
        Some(array) => {
            let rebuilt = build_message_sequence(array, history, user_message, user_slot);
            tracing::debug!(
                "Rebuilt conversation array: {} history + 1 new message ({} total)",
                history.len(),
                rebuilt.len()
            );
            *array = rebuilt;
            true
        }
        None => false,
    }
}
