use once_cell::sync::Lazy;
use regex::Regex;

static TRAILING_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+)\]$").expect("valid tag regex"));

/// Index carried by a trailing `[<n>]` tag, ignoring surrounding whitespace.
pub fn trailing_tag(text: &str) -> Option<u32> {
    TRAILING_TAG
        .captures(text.trim())
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Text with a trailing tag removed.
pub fn strip_tag(text: &str) -> String {
    let trimmed = text.trim();
    match TRAILING_TAG.find(trimmed) {
        Some(m) => trimmed[..m.start()].trim_end().to_string(),
        None => trimmed.to_string(),
    }
}

pub fn tag_text(original: &str, index: u32) -> String {
    let original = original.trim();
    if original.is_empty() {
        format!("[{index}]")
    } else {
        format!("{original} [{index}]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_trailing_tags_only() {
        assert_eq!(trailing_tag("Name [12]"), Some(12));
        assert_eq!(trailing_tag("[3]  "), Some(3));
        assert_eq!(trailing_tag("[3] Name"), None);
        assert_eq!(trailing_tag("Name [x]"), None);
        assert_eq!(trailing_tag(""), None);
    }

    #[test]
    fn tagging_and_stripping_are_inverse() {
        assert_eq!(tag_text("Name", 1), "Name [1]");
        assert_eq!(tag_text("  ", 2), "[2]");
        assert_eq!(strip_tag("Name [1]"), "Name");
        assert_eq!(strip_tag("[2]"), "");
        assert_eq!(strip_tag("plain"), "plain");
    }
}
