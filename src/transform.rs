//! URL transform-segment rewriting.
//!
//! Stored-object URLs may contain a literal `/t/` transform segment; render
//! surfaces inject a quality token after it to request cheaper thumbnail
//! variants. The rewrite is pure and idempotent so any number of surfaces
//! can apply it to the same URL.

/// Insert `quality` as a path segment immediately after the `/t/` marker.
///
/// URLs without the marker, or with more than one occurrence of it, pass
/// through unchanged. Re-applying the same quality token is a no-op.
pub fn with_quality(url: &str, quality: &str) -> String {
    let Some((base, rest)) = url.split_once("/t/") else {
        return url.to_string();
    };
    if rest.contains("/t/") {
        return url.to_string();
    }
    if rest == quality || rest.starts_with(&format!("{quality}/")) {
        return url.to_string();
    }
    format!("{base}/t/{quality}/{rest}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_the_quality_segment() {
        assert_eq!(
            with_quality("https://media.example.com/t/photo.jpg", "q_80"),
            "https://media.example.com/t/q_80/photo.jpg"
        );
        assert_eq!(
            with_quality("https://media.example.com/t/photo.jpg", "q_60"),
            "https://media.example.com/t/q_60/photo.jpg"
        );
    }

    #[test]
    fn passes_through_urls_without_a_marker() {
        assert_eq!(
            with_quality("http://localhost:8080/file/123-cat.jpg", "q_80"),
            "http://localhost:8080/file/123-cat.jpg"
        );
        assert_eq!(with_quality("", "q_80"), "");
    }

    #[test]
    fn leaves_ambiguous_urls_alone() {
        let url = "https://media.example.com/t/one/t/two.jpg";
        assert_eq!(with_quality(url, "q_80"), url);
    }

    #[test]
    fn is_idempotent() {
        let once = with_quality("https://media.example.com/t/photo.jpg", "q_80");
        let twice = with_quality(&once, "q_80");
        assert_eq!(once, twice);

        // a bare quality segment with no trailing filename is also stable
        let url = "https://media.example.com/t/q_80";
        assert_eq!(with_quality(url, "q_80"), url);
    }
}
