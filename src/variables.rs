//! Placeholder discovery and the resolved variable map.
//!
//! Placeholders use `{{NAME}}` syntax. Names are matched case-insensitively
//! and always handled upper-cased, so `{{api_key}}` and `{{API_KEY}}` refer
//! to the same variable. The double braces never collide with JSON object
//! braces because a JSON key or value cannot start directly after `{{`.

use crate::constants::{IMAGE_VAR, RESERVED_VARS, SYSTEM_PROMPT_VAR, TEXT_VAR};
use crate::str_utils::normalize_var_name;
use crate::types::{Result, WirecastError};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    pub(crate) static ref PLACEHOLDER_REGEX: Regex =
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("Invalid placeholder regex");
}

/// Distinct placeholder names in first-occurrence order, upper-cased.
pub fn extract_placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER_REGEX.captures_iter(template) {
        let name = normalize_var_name(&caps[1]);
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

pub fn is_reserved(name: &str) -> bool {
    RESERVED_VARS.contains(&name)
}

/// Placeholders the caller must supply: everything except the reserved names.
pub fn required_variables(template: &str) -> Vec<String> {
    extract_placeholders(template)
        .into_iter()
        .filter(|name| !is_reserved(name))
        .collect()
}

pub fn references_image(template: &str) -> bool {
    extract_placeholders(template)
        .iter()
        .any(|name| name == IMAGE_VAR)
}

/// Upper-cased name → value map used during substitution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableSet {
    values: HashMap<String, String>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(raw: &HashMap<String, String>) -> Self {
        let mut set = Self::new();
        for (name, value) in raw {
            set.insert(name, value);
        }
        set
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(normalize_var_name(name), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(&normalize_var_name(name))
            .map(|v| v.as_str())
    }

    /// Like `get`, but treats blank values as absent.
    pub fn get_non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|v| !v.trim().is_empty())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Adds the pipeline-supplied text placeholders. `IMAGE` is handled
    /// structurally by the substitution engine, not as a string value.
    pub fn with_reserved(mut self, system_prompt: Option<&str>, user_text: &str) -> Self {
        self.insert(SYSTEM_PROMPT_VAR, system_prompt.unwrap_or_default());
        self.insert(TEXT_VAR, user_text);
        self
    }
}

/// Fails on the first non-reserved placeholder lacking a non-empty value.
/// Runs against the raw template so omissions are caught even when the
/// template itself would not parse.
pub fn validate_required(template: &str, vars: &VariableSet) -> Result<()> {
    for name in required_variables(template) {
        if vars.get_non_empty(&name).is_none() {
            tracing::debug!("Required variable {} is missing or empty", name);
            return Err(WirecastError::MissingVariable { name }.into());
        }
    }
    Ok(())
}
