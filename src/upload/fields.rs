//! Bounded accumulation of form field values.

use encoding_rs::{Encoding, REPLACEMENT, UTF_8};
use mime_guess::mime::{self, Mime};
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::warn;

use super::{FieldSection, UploadOptions};
use crate::{Result, UploadError};

/// Ordered mapping from field name to its values.
///
/// Keys keep first-insertion order; every value counts toward the limit,
/// including repeats of the same key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFieldSet {
    entries: Vec<(String, Vec<String>)>,
    value_count: usize,
}

impl FormFieldSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `key`.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key, vec![value])),
        }
        self.value_count += 1;
    }

    /// All values for `key`.
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, values)| values.as_slice())
    }

    /// First value for `key`.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no values have been added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of values across all keys.
    pub fn value_count(&self) -> usize {
        self.value_count
    }

    /// Iterate keys and their values in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(k, values)| (k.as_str(), values.as_slice()))
    }
}

impl Serialize for FormFieldSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, values) in &self.entries {
            map.serialize_entry(key, values)?;
        }
        map.end()
    }
}

/// Collects field sections into a bounded [`FormFieldSet`].
#[derive(Debug)]
pub struct FieldAccumulator {
    fields: FormFieldSet,
    value_count_limit: usize,
    value_length_limit: usize,
}

impl FieldAccumulator {
    /// Create an empty accumulator bound to the given limits.
    pub fn new(options: &UploadOptions) -> Self {
        Self {
            fields: FormFieldSet::new(),
            value_count_limit: options.value_count_limit,
            value_length_limit: options.value_length_limit,
        }
    }

    /// Read one field section to completion and append its value.
    ///
    /// Fails with `LimitExceeded` without reading the body when the set is
    /// already full; values accepted earlier stay in the set.
    pub async fn accumulate(&mut self, section: FieldSection<'_>) -> Result<()> {
        let FieldSection {
            key,
            content_type,
            mut body,
        } = section;

        if self.fields.value_count() >= self.value_count_limit {
            warn!(key = %key, limit = self.value_count_limit, "form value count limit exceeded");
            return Err(UploadError::LimitExceeded(format!(
                "form value count limit {} exceeded",
                self.value_count_limit
            )));
        }

        let mut raw = Vec::new();
        while let Some(chunk) = body.chunk().await? {
            if raw.len() + chunk.len() > self.value_length_limit {
                return Err(UploadError::LimitExceeded(format!(
                    "form value length limit {} exceeded for {key}",
                    self.value_length_limit
                )));
            }
            raw.extend_from_slice(&chunk);
        }

        let encoding = resolve_encoding(content_type.as_deref());
        let (decoded, _, _) = encoding.decode(&raw);
        self.fields.append(key, normalize_value(decoded.into_owned()));
        Ok(())
    }

    /// Values accumulated so far.
    pub fn fields(&self) -> &FormFieldSet {
        &self.fields
    }

    /// Consume the accumulator, returning its values.
    pub fn into_fields(self) -> FormFieldSet {
        self.fields
    }
}

/// Pick the text encoding declared by a section's content type.
///
/// Missing or unknown charsets (UTF-7 has no label) fall back to UTF-8, as
/// does the `replacement` encoding that labels such as ISO-2022-KR map to.
/// A byte-order mark in the value still wins over the declared charset.
fn resolve_encoding(content_type: Option<&str>) -> &'static Encoding {
    content_type
        .and_then(|ct| ct.parse::<Mime>().ok())
        .and_then(|m| {
            m.get_param(mime::CHARSET)
                .and_then(|charset| Encoding::for_label(charset.as_str().as_bytes()))
        })
        .filter(|encoding| *encoding != REPLACEMENT)
        .unwrap_or(UTF_8)
}

/// Clients post the literal `undefined` for unset inputs.
fn normalize_value(value: String) -> String {
    if value.eq_ignore_ascii_case("undefined") {
        String::new()
    } else {
        value
    }
}
