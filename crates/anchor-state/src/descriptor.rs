//! Image extraction from deployment descriptors.
//!
//! Agents answer a deploy with the descriptor they installed. It is either
//! a compose-style document (`services.<name>.image`) or a flat document
//! with an `images` list; both may arrive as YAML or JSON (JSON is a YAML
//! subset, so one parser covers both).

use serde_yaml::Value;

/// Image references named by `descriptor`, in document order, deduplicated.
///
/// Returns an empty list when the descriptor cannot be parsed.
pub fn images(descriptor: &str) -> Vec<String> {
    let Ok(doc) = serde_yaml::from_str::<Value>(descriptor) else {
        return Vec::new();
    };

    let mut found: Vec<String> = Vec::new();
    let mut push = |image: &str| {
        if !image.is_empty() && !found.iter().any(|i| i == image) {
            found.push(image.to_string());
        }
    };

    if let Some(list) = doc.get("images").and_then(Value::as_sequence) {
        for item in list {
            if let Some(image) = item.as_str() {
                push(image);
            }
        }
    }

    if let Some(services) = doc.get("services").and_then(Value::as_mapping) {
        for (_, service) in services {
            if let Some(image) = service.get("image").and_then(Value::as_str) {
                push(image);
            }
        }
    }

    found
}
