//! Reward name -> action resolution

use std::collections::BTreeMap;

/// Normalize a reward name or category key for matching.
///
/// Surrounding whitespace is trimmed and the text is case-folded.
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Look up the action bound to a reward display name.
///
/// The table is read as-is on every call so console edits apply to the next event.
pub fn resolve(display_name: &str, bindings: &BTreeMap<String, String>) -> Option<String> {
    let wanted = normalize(display_name);
    bindings
        .iter()
        .find(|(name, _)| normalize(name) == wanted)
        .map(|(_, action)| action.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("Pet the Dog".to_string(), "e".to_string()),
            ("Run".to_string(), "w".to_string()),
        ])
    }

    #[test]
    fn test_resolve_ignores_case_and_whitespace() {
        let bindings = table();
        for name in ["Pet the Dog", "pet the dog ", "  PET THE DOG", "\tpEt tHe DoG\n"] {
            assert_eq!(resolve(name, &bindings).as_deref(), Some("e"), "name: {:?}", name);
        }
    }

    #[test]
    fn test_resolve_stored_name_with_whitespace() {
        let bindings = BTreeMap::from([(" Jump ".to_string(), "space".to_string())]);
        assert_eq!(resolve("jump", &bindings).as_deref(), Some("space"));
    }

    #[test]
    fn test_resolve_no_binding() {
        assert_eq!(resolve("Hydrate", &table()), None);
        assert_eq!(resolve("", &table()), None);
    }

    #[test]
    fn test_inner_whitespace_is_significant() {
        assert_eq!(resolve("Petthe Dog", &table()), None);
    }
}
