use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::de::{self, DeserializeOwned, Deserializer, Visitor};
use serde_json::{Map, Value};

// ==============================================================================
// Settings
// ==============================================================================

/// Object key convention applied to serialized output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyCase {
    /// Keep the names produced by the type's `Serialize` impl.
    #[default]
    AsIs,
    CamelCase,
    SnakeCase,
}

/// Per-type serialization behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializerSettings {
    pub key_case: KeyCase,
    /// Drop `null` object members from serialized output.
    pub omit_nulls: bool,
    /// Accept `//` and `/* */` comments and numbers written as strings
    /// when reading.
    pub permissive: bool,
}

impl SerializerSettings {
    /// The fixed configuration used by the fallback path.
    pub const BASELINE: Self = Self {
        key_case: KeyCase::AsIs,
        omit_nulls: false,
        permissive: false,
    };

    pub(super) fn rewrites_output(&self) -> bool {
        self.omit_nulls || self.key_case != KeyCase::AsIs
    }
}

impl Default for SerializerSettings {
    fn default() -> Self {
        Self {
            key_case: KeyCase::AsIs,
            omit_nulls: false,
            permissive: true,
        }
    }
}

// ==============================================================================
// Type Profile
// ==============================================================================

/// Resolved settings for one Rust type plus a running size hint used to
/// pre-size output buffers.
#[derive(Debug)]
pub(super) struct TypeProfile {
    pub(super) type_name: &'static str,
    pub(super) settings: SerializerSettings,
    /// Serialized names of the type's own fields. Empty for anything that
    /// is not a struct; key rewrites only ever touch these names.
    fields: &'static [&'static str],
    size_hint: AtomicUsize,
}

impl TypeProfile {
    pub(super) fn new(
        type_name: &'static str,
        settings: SerializerSettings,
        fields: &'static [&'static str],
    ) -> Self {
        Self {
            type_name,
            settings,
            fields,
            size_hint: AtomicUsize::new(0),
        }
    }

    pub(super) fn size_hint(&self) -> usize {
        self.size_hint.load(Ordering::Relaxed)
    }

    pub(super) fn observe_size(&self, len: usize) {
        self.size_hint.store(len, Ordering::Relaxed);
    }

    /// Apply key renaming and null omission to the type's own fields.
    /// Nested values, including map keys, are left untouched.
    pub(super) fn rewrite_output(&self, value: Value) -> Value {
        let Value::Object(map) = value else {
            return value;
        };
        let mut out = Map::with_capacity(map.len());
        for (key, child) in map {
            let own_field = self.fields.contains(&key.as_str());
            if own_field && self.settings.omit_nulls && child.is_null() {
                continue;
            }
            let key = if own_field {
                convert_key(&key, self.settings.key_case)
            } else {
                key
            };
            out.insert(key, child);
        }
        Value::Object(out)
    }

    /// Map top-level keys written in the profile's key case back to the
    /// type's field names. Unknown keys are kept as they are.
    pub(super) fn normalize_input_keys(&self, value: Value) -> Value {
        let Value::Object(map) = value else {
            return value;
        };
        let renamed: HashMap<String, &'static str> = self
            .fields
            .iter()
            .map(|field| (convert_key(field, self.settings.key_case), *field))
            .collect();
        Value::Object(
            map.into_iter()
                .map(|(key, child)| match renamed.get(&key) {
                    Some(field) => ((*field).to_owned(), child),
                    None => (key, child),
                })
                .collect(),
        )
    }
}

/// Serialized field names of `T` when it deserializes as a struct, found by
/// asking its `Deserialize` impl which fields it expects.
pub(super) fn struct_fields<T: DeserializeOwned>() -> &'static [&'static str] {
    struct FieldCapture<'a> {
        fields: &'a mut Option<&'static [&'static str]>,
    }

    impl<'de> Deserializer<'de> for FieldCapture<'_> {
        type Error = serde::de::value::Error;

        fn deserialize_any<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value, Self::Error> {
            Err(de::Error::custom("not a struct"))
        }

        fn deserialize_struct<V: Visitor<'de>>(
            self,
            _name: &'static str,
            fields: &'static [&'static str],
            _visitor: V,
        ) -> Result<V::Value, Self::Error> {
            *self.fields = Some(fields);
            Err(de::Error::custom("field names captured"))
        }

        serde::forward_to_deserialize_any! {
            bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
            bytes byte_buf option unit unit_struct newtype_struct seq tuple
            tuple_struct map enum identifier ignored_any
        }
    }

    let mut fields = None;
    let _ = T::deserialize(FieldCapture {
        fields: &mut fields,
    });
    fields.unwrap_or(&[])
}

// ==============================================================================
// Value Rewrites
// ==============================================================================

/// Turn strings that hold a plain JSON number into numbers.
pub(super) fn coerce_numeric_strings(value: Value) -> Value {
    match value {
        Value::String(s) => match serde_json::from_str::<serde_json::Number>(s.trim()) {
            Ok(number) => Value::Number(number),
            Err(_) => Value::String(s),
        },
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, child)| (key, coerce_numeric_strings(child)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(coerce_numeric_strings).collect()),
        other => other,
    }
}

fn convert_key(key: &str, case: KeyCase) -> String {
    match case {
        KeyCase::AsIs => key.to_owned(),
        KeyCase::CamelCase => {
            let mut out = String::with_capacity(key.len());
            let mut upper_next = false;
            for ch in key.chars() {
                if ch == '_' {
                    upper_next = !out.is_empty();
                } else if upper_next {
                    out.extend(ch.to_uppercase());
                    upper_next = false;
                } else {
                    out.push(ch);
                }
            }
            out
        }
        KeyCase::SnakeCase => {
            let mut out = String::with_capacity(key.len() + 4);
            for (i, ch) in key.chars().enumerate() {
                if ch.is_uppercase() {
                    if i > 0 && !out.ends_with('_') {
                        out.push('_');
                    }
                    out.extend(ch.to_lowercase());
                } else {
                    out.push(ch);
                }
            }
            out
        }
    }
}

/// Remove `//` line comments and `/* */` block comments outside string
/// literals. Returns `None` when the input contains no comment.
pub(super) fn strip_comments(input: &[u8]) -> Option<Vec<u8>> {
    if !input.windows(2).any(|w| w == b"//" || w == b"/*") {
        return None;
    }

    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    let mut in_string = false;
    while i < input.len() {
        let b = input[i];
        if in_string {
            out.push(b);
            if b == b'\\' && i + 1 < input.len() {
                out.push(input[i + 1]);
                i += 2;
                continue;
            }
            if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match (b, input.get(i + 1).copied()) {
            (b'"', _) => {
                in_string = true;
                out.push(b);
                i += 1;
            }
            (b'/', Some(b'/')) => {
                while i < input.len() && input[i] != b'\n' {
                    i += 1;
                }
            }
            (b'/', Some(b'*')) => {
                i += 2;
                while i + 1 < input.len() && !(input[i] == b'*' && input[i + 1] == b'/') {
                    i += 1;
                }
                i = (i + 2).min(input.len());
                out.push(b' ');
            }
            _ => {
                out.push(b);
                i += 1;
            }
        }
    }
    Some(out)
}
