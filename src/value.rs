//! JSON value helpers
//!
//! Context ids and results travel through the engine as `serde_json::Value`. This module holds
//! the few structural operations the identity model and result combination need:
//! shape checks, case-insensitive key alignment, deep merge and canonical rendering.

use serde_json::{Map, Value};

/// How property names are folded when rendering a canonical string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFolding {
    /// camelCase, used for values already aligned to a bound type's field names.
    CamelCase,
    /// Fully lower-cased, used for free-form values of unbound names.
    Lowercase,
}

impl KeyFolding {
    fn fold(self, name: &str) -> String {
        match self {
            KeyFolding::CamelCase => camel_case(name),
            KeyFolding::Lowercase => name.to_lowercase(),
        }
    }
}

/// Short description of a value's JSON type, for error messages.
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Find the key in `map` equal to `name` ignoring case.
pub fn find_key_ignore_case(map: &Map<String, Value>, name: &str) -> Option<String> {
    if map.contains_key(name) {
        return Some(name.to_string());
    }
    let lowered = name.to_lowercase();
    map.keys().find(|key| key.to_lowercase() == lowered).cloned()
}

/// Rename the properties of `value` to the spelling used in `template`, recursively.
///
/// Properties without a counterpart in the template are kept as they are.
pub fn align_keys(value: Value, template: &Value) -> Value {
    match (value, template) {
        (Value::Object(map), Value::Object(template_map)) => {
            let mut aligned = Map::with_capacity(map.len());
            for (key, inner) in map {
                match find_key_ignore_case(template_map, &key) {
                    Some(template_key) => {
                        let inner = align_keys(inner, &template_map[&template_key]);
                        aligned.insert(template_key, inner);
                    }
                    None => {
                        aligned.insert(key, inner);
                    }
                }
            }
            Value::Object(aligned)
        }
        (value, _) => value,
    }
}

/// Deep-merge `overlay` into `base`.
///
/// Property names match ignoring case (the first spelling seen is kept), nulls in the overlay
/// are ignored, arrays are concatenated, nested objects merge recursively and any other value
/// in the overlay replaces the one in `base`.
pub fn merge_into(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, incoming) in overlay {
        if incoming.is_null() {
            continue;
        }

        let Some(existing_key) = find_key_ignore_case(base, key) else {
            base.insert(key.clone(), incoming.clone());
            continue;
        };

        let Some(existing) = base.get_mut(&existing_key) else {
            continue;
        };
        match (existing, incoming) {
            (Value::Object(existing_map), Value::Object(incoming_map)) => {
                merge_into(existing_map, incoming_map);
            }
            (Value::Array(existing_items), Value::Array(incoming_items)) => {
                existing_items.extend(incoming_items.iter().cloned());
            }
            (existing, incoming) => {
                *existing = incoming.clone();
            }
        }
    }
}

/// Merge a sequence of partial objects, in order, into one object.
///
/// Non-object partials are skipped; callers validate shape before merging.
pub fn merge_all<'a, I>(partials: I) -> Value
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut merged = Map::new();
    for partial in partials {
        if let Value::Object(map) = partial {
            merge_into(&mut merged, map);
        }
    }
    Value::Object(merged)
}

/// Render a value as a deterministic, structurally normalized JSON string.
///
/// Object properties are folded, sorted ignoring case, and dropped when they hold a default
/// value (null, false or zero). Array elements are rendered canonically and sorted, at every
/// nesting level, so element order never affects the output.
pub fn canonical_json(value: &Value, folding: KeyFolding) -> String {
    let mut out = String::new();
    write_canonical(value, folding, &mut out);
    out
}

fn write_canonical(value: &Value, folding: KeyFolding, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut properties: Vec<(String, String)> = map
                .iter()
                .filter(|(_, inner)| !is_default(inner))
                .map(|(name, inner)| (folding.fold(name), canonical_json(inner, folding)))
                .collect();
            properties.sort_by(|(a, a_value), (b, b_value)| {
                a.to_lowercase()
                    .cmp(&b.to_lowercase())
                    .then_with(|| a.cmp(b))
                    .then_with(|| a_value.cmp(b_value))
            });

            out.push('{');
            for (index, (name, rendered)) in properties.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(name.clone()).to_string());
                out.push(':');
                out.push_str(rendered);
            }
            out.push('}');
        }
        Value::Array(items) => {
            let mut rendered: Vec<String> = items
                .iter()
                .map(|item| canonical_json(item, folding))
                .collect();
            rendered.sort();

            out.push('[');
            out.push_str(&rendered.join(","));
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn is_default(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        _ => false,
    }
}

/// camelCase a property name: the leading run of upper-case characters is lowered, keeping
/// the last one of the run when it starts the next word (`URLValue` becomes `urlValue`).
pub fn camel_case(name: &str) -> String {
    let mut chars: Vec<char> = name.chars().collect();
    if !chars.first().is_some_and(|c| c.is_uppercase()) {
        return name.to_string();
    }

    for index in 0..chars.len() {
        if index == 1 && !chars[index].is_uppercase() {
            break;
        }
        let has_next = index + 1 < chars.len();
        if index > 0 && has_next && !chars[index + 1].is_uppercase() {
            break;
        }
        chars[index] = chars[index].to_lowercase().next().unwrap_or(chars[index]);
    }
    chars.into_iter().collect()
}
