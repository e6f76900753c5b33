//! Field-name translation between client and backend conventions.
//!
//! Records travel through the engine in client convention (`camelCase`)
//! while the backend stores columns in `snake_case`. A [`FieldMap`] declares
//! the mapping for the keys a collection knows about and falls back to a
//! rule-based transform for everything else:
//!
//! - camel → snake inserts `_` at the boundaries `[a-z0-9]→[A-Z]` and
//!   `[A-Z]→[A-Z][a-z]`, then lowercases ASCII letters
//!   (`HTTPServer` → `http_server`, `userID` → `user_id`).
//! - snake → camel removes an underscore that follows a non-underscore
//!   character and precedes an ASCII lowercase letter, uppercasing that
//!   letter. Leading, doubled and trailing underscores are kept, as is an
//!   underscore before a digit (`_private` → `_private`, `line_2` → `line_2`).
//!
//! Both directions are idempotent on keys already in the target convention.

use crate::record::Fields;
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

/// Client-only keys holding nested child collections.
///
/// These are assembled on the client and must never be written as columns.
pub const DEFAULT_EXCLUDED: &[&str] = &["subtasks", "milestones", "checklist", "children"];

static LOWER_UPPER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("static regex"));
static ACRONYM_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Z]+)([A-Z][a-z])").expect("static regex"));

static STANDARD: Lazy<FieldMap> = Lazy::new(FieldMap::new);

/// Convert one client-convention key to backend convention.
pub fn camel_to_snake(key: &str) -> Cow<'_, str> {
    if !key.bytes().any(|b| b.is_ascii_uppercase()) {
        return Cow::Borrowed(key);
    }
    let split = LOWER_UPPER.replace_all(key, "${1}_${2}");
    let split = ACRONYM_WORD.replace_all(&split, "${1}_${2}");
    Cow::Owned(split.to_ascii_lowercase())
}

/// Convert one backend-convention key to client convention.
pub fn snake_to_camel(key: &str) -> Cow<'_, str> {
    if !key.contains('_') {
        return Cow::Borrowed(key);
    }

    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars().peekable();
    let mut prev: Option<char> = None;

    while let Some(c) = chars.next() {
        if c == '_' && matches!(prev, Some(p) if p != '_') {
            if let Some(&next) = chars.peek() {
                if next.is_ascii_lowercase() {
                    chars.next();
                    out.push(next.to_ascii_uppercase());
                    prev = Some(next);
                    continue;
                }
            }
        }
        out.push(c);
        prev = Some(c);
    }

    Cow::Owned(out)
}

/// Translate a backend row to client convention using the standard field map.
pub fn to_client_form(row: &Fields) -> Fields {
    STANDARD.to_client_form(row)
}

/// Translate a client record to backend convention using the standard field
/// map, dropping excluded keys.
pub fn to_backend_form(record: &Fields) -> Fields {
    STANDARD.to_backend_form(record)
}

/// Declared field mapping for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMap {
    to_backend: HashMap<String, String>,
    to_client: HashMap<String, String>,
    excluded: HashSet<String>,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldMap {
    /// A field map excluding [`DEFAULT_EXCLUDED`] and no declared pairs.
    pub fn new() -> Self {
        Self {
            to_backend: HashMap::new(),
            to_client: HashMap::new(),
            excluded: DEFAULT_EXCLUDED.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// A field map with no exclusions at all.
    pub fn empty() -> Self {
        Self {
            to_backend: HashMap::new(),
            to_client: HashMap::new(),
            excluded: HashSet::new(),
        }
    }

    /// Declare an explicit `client` ↔ `backend` key pair.
    pub fn with_field(mut self, client: impl Into<String>, backend: impl Into<String>) -> Self {
        let client = client.into();
        let backend = backend.into();
        self.to_backend.insert(client.clone(), backend.clone());
        self.to_client.insert(backend, client);
        self
    }

    /// Exclude a client-only key from backend writes.
    pub fn with_excluded(mut self, client_key: impl Into<String>) -> Self {
        self.excluded.insert(client_key.into());
        self
    }

    /// Whether a client key is dropped on the way to the backend.
    pub fn is_excluded(&self, client_key: &str) -> bool {
        self.excluded.contains(client_key)
    }

    /// The backend name for a client key.
    pub fn backend_key<'a>(&'a self, client_key: &'a str) -> Cow<'a, str> {
        match self.to_backend.get(client_key) {
            Some(declared) => Cow::Borrowed(declared.as_str()),
            None => camel_to_snake(client_key),
        }
    }

    /// The client name for a backend key.
    pub fn client_key<'a>(&'a self, backend_key: &'a str) -> Cow<'a, str> {
        match self.to_client.get(backend_key) {
            Some(declared) => Cow::Borrowed(declared.as_str()),
            None => snake_to_camel(backend_key),
        }
    }

    /// Rewrite top-level keys of a backend row to client convention.
    pub fn to_client_form(&self, row: &Fields) -> Fields {
        row.iter()
            .map(|(key, value)| (self.client_key(key).into_owned(), value.clone()))
            .collect()
    }

    /// Rewrite top-level keys of a client record to backend convention,
    /// dropping excluded keys.
    pub fn to_backend_form(&self, record: &Fields) -> Fields {
        record
            .iter()
            .filter(|(key, _)| !self.is_excluded(key))
            .map(|(key, value)| (self.backend_key(key).into_owned(), value.clone()))
            .collect()
    }
}
