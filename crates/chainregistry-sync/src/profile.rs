//! Classification fields pulled out of a verified document.

use serde_json::Value;

use chainregistry_core::{EntityProfile, ProfilePaths};

/// First pointer in `paths` that resolves to a non-empty string.
fn first_string(doc: &Value, paths: &[String]) -> Option<String> {
    paths
        .iter()
        .filter_map(|p| doc.pointer(p))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn extract_profile(doc: &Value, paths: &ProfilePaths) -> EntityProfile {
    let field = |p: &[String]| first_string(doc, p).unwrap_or_else(|| EntityProfile::UNKNOWN.to_string());
    EntityProfile {
        entity_type: field(&paths.entity_type),
        category: field(&paths.category),
        display_name: field(&paths.display_name),
        country: field(&paths.country),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn uses_first_matching_pointer() {
        let doc = json!({
            "type": "bank",
            "organization": {"name": "Acme Bank", "category": "finance"},
            "address": {"country": "NL"}
        });
        let p = extract_profile(&doc, &ProfilePaths::default());
        assert_eq!(p.entity_type, "bank");
        assert_eq!(p.category, "finance");
        assert_eq!(p.display_name, "Acme Bank");
        assert_eq!(p.country, "NL");
    }

    #[test]
    fn missing_and_non_string_fields_are_unknown() {
        let doc = json!({"name": "", "country": 31});
        let p = extract_profile(&doc, &ProfilePaths::default());
        assert_eq!(p, EntityProfile::default());
    }
}
