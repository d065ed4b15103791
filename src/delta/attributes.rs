//! Formatting attributes carried by retain and insert operations
//!
//! A `null` value on a retain removes the attribute when composed onto an
//! insert. The four functions mirror the delta-level operations of the same
//! name and are only ever called from there.

use serde_json::Value;
use std::collections::BTreeMap;

/// Attribute map (empty means "no attributes")
pub type Attributes = BTreeMap<String, Value>;

/// Attributes resulting from applying `b` after `a`
///
/// With `keep_null` the removal markers survive, which is what a retain
/// composed onto another retain needs.
pub fn compose(a: &Attributes, b: &Attributes, keep_null: bool) -> Attributes {
    let mut out: Attributes = b
        .iter()
        .filter(|(_, v)| keep_null || !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for (key, value) in a {
        if !b.contains_key(key) {
            out.insert(key.clone(), value.clone());
        }
    }

    out
}

/// Attributes that turn `a` into `b`
pub fn diff(a: &Attributes, b: &Attributes) -> Attributes {
    let mut out = Attributes::new();

    for key in a.keys().chain(b.keys()) {
        if a.get(key) != b.get(key) {
            let value = b.get(key).cloned().unwrap_or(Value::Null);
            out.insert(key.clone(), value);
        }
    }

    out
}

/// Attributes that undo `attrs` applied over `base`
pub fn invert(attrs: &Attributes, base: &Attributes) -> Attributes {
    let mut out = Attributes::new();

    for (key, value) in base {
        if let Some(applied) = attrs.get(key) {
            if applied != value {
                out.insert(key.clone(), value.clone());
            }
        }
    }

    for (key, value) in attrs {
        if !base.contains_key(key) && !value.is_null() {
            out.insert(key.clone(), Value::Null);
        }
    }

    out
}

/// Rebase `b` over a concurrent `a`
///
/// When `a` has priority its keys win and are dropped from `b`.
pub fn transform(a: &Attributes, b: &Attributes, priority: bool) -> Attributes {
    if !priority || a.is_empty() {
        return b.clone();
    }

    b.iter()
        .filter(|(k, _)| !a.contains_key(*k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
