//! Decides whether a body is worth capturing as text.

const PARSEABLE_MARKERS: &[&str] = &["json", "text", "xml", "x-www-form-urlencoded"];

/// Returns `true` when the raw `Content-Type` value mentions a textual format.
///
/// This is a case-insensitive substring test, not a MIME parse:
/// `blah/xml/blih` is parseable, `jsan` is not, and neither is `""`.
pub fn is_parseable(content_type: &str) -> bool {
    if content_type.is_empty() {
        return false;
    }
    let lowered = content_type.to_ascii_lowercase();
    PARSEABLE_MARKERS.iter().any(|m| lowered.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_observed_values() {
        let cases = [
            ("json", true),
            ("application/json", true),
            ("apPlication/JSON", true),
            ("jsan", false),
            ("text/plain", true),
            ("", false),
            ("blah/xml/blih", true),
            ("x-www-form-urlencoded", true),
        ];
        for (input, expected) in cases {
            assert_eq!(is_parseable(input), expected, "input: {input:?}");
        }
    }

    #[test]
    fn binary_types_are_not_parseable() {
        assert!(!is_parseable("application/octet-stream"));
        assert!(!is_parseable("image/png"));
        assert!(!is_parseable("multipart/form-data; boundary=abc"));
    }

    #[test]
    fn parameters_do_not_hide_the_type() {
        assert!(is_parseable("application/json; charset=utf-8"));
        assert!(is_parseable("Application/X-WWW-Form-Urlencoded"));
    }
}
