//! Attribute normalization applied to every write.
//!
//! Rules, in order:
//! 1. attributes whose value is `null` or `""` are dropped
//! 2. in list values, `null` and `""` elements are dropped, and the
//!    attribute too if nothing is left
//! 3. a leading byte-order mark is stripped from the name; the values are
//!    merged into the attribute of the clean name
//! 4. every remaining scalar becomes a singleton list
//!
//! Merged values keep the key order of the input map, so values of the clean
//! name come before values of its BOM-prefixed twin.

use crate::product::{Attributes, CREATED};
use serde_json::{Map, Value};
use tracing::warn;

const BOM: char = '\u{feff}';

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Normalizes raw write attributes.
pub fn normalize(raw: &Map<String, Value>) -> Attributes {
    let mut attributes = Attributes::new();

    for (key, value) in raw {
        let name = key.trim_start_matches(BOM);
        if name.is_empty() {
            warn!(attribute = %key.escape_debug(), "dropping attribute without a name");
            continue;
        }
        if name == CREATED {
            warn!("ignoring reserved attribute in write params");
            continue;
        }

        let values: Vec<Value> = match value {
            Value::Array(items) => items.iter().filter(|v| !is_blank(v)).cloned().collect(),
            scalar if is_blank(scalar) => Vec::new(),
            scalar => vec![scalar.clone()],
        };
        if values.is_empty() {
            continue;
        }

        attributes
            .entry(name.to_string())
            .or_default()
            .extend(values);
    }

    attributes
}
