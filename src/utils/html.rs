// src/utils/html.rs

/// Sanitizes author-supplied rich text (vignettes, question stems, answer options).
///
/// Keeps formatting tags such as `<b>`, `<p>`, `<img>` and strips scripts,
/// iframes and event-handler attributes. Takers render this markup directly.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

/// Same as [`clean_html`] for optional fields.
pub fn clean_optional(input: Option<&str>) -> Option<String> {
    input.map(clean_html)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_keeps_formatting() {
        let cleaned = clean_html("<p>A 45-year-old <b>male</b></p><script>alert(1)</script>");
        assert_eq!(cleaned, "<p>A 45-year-old <b>male</b></p>");
    }

    #[test]
    fn strips_event_handlers() {
        let cleaned = clean_html(r#"<img src="x.png" onerror="steal()">"#);
        assert!(!cleaned.contains("onerror"));
    }

    #[test]
    fn optional_passthrough() {
        assert_eq!(clean_optional(None), None);
        assert_eq!(clean_optional(Some("plain")), Some("plain".to_string()));
    }
}
