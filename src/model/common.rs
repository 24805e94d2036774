use uuid::Uuid;

pub type Id = String;

/// Sentinel for "no data available". Never an empty string, never null.
pub const PLACEHOLDER: &str = "-";

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

pub fn placeholder() -> String {
    PLACEHOLDER.to_string()
}

pub fn is_placeholder(value: &str) -> bool {
    value == PLACEHOLDER
}

/// Maps blank input onto the placeholder; everything else is kept trimmed.
pub fn or_placeholder(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        placeholder()
    } else {
        trimmed.to_string()
    }
}

/// Returns `Some(value)` unless the value is the placeholder.
pub fn known(value: &str) -> Option<&str> {
    if is_placeholder(value) {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_become_placeholder() {
        assert_eq!(or_placeholder(""), "-");
        assert_eq!(or_placeholder("   "), "-");
        assert_eq!(or_placeholder("  Fluke "), "Fluke");
    }

    #[test]
    fn known_filters_placeholder() {
        assert_eq!(known("-"), None);
        assert_eq!(known("SN-1"), Some("SN-1"));
    }
}
