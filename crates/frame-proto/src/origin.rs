use url::{Origin, Url};

const RECOGNIZED_SCHEMES: &[&str] = &["https://", "http://"];

/// Reduces a configured endpoint to the origin a message sender reports.
///
/// Full URLs collapse to `scheme://host[:port]`. Anything else, including
/// strings that fail to parse, is returned untouched so a bad config only
/// causes comparisons to miss instead of failing outright.
pub fn resolve_origin(endpoint: &str) -> String {
    if !has_recognized_scheme(endpoint) {
        return endpoint.to_string();
    }
    match Url::parse(endpoint) {
        Ok(url) => match url.origin() {
            origin @ Origin::Tuple(..) => origin.ascii_serialization(),
            Origin::Opaque(_) => endpoint.to_string(),
        },
        Err(_) => endpoint.to_string(),
    }
}

fn has_recognized_scheme(endpoint: &str) -> bool {
    RECOGNIZED_SCHEMES.iter().any(|scheme| {
        endpoint
            .get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_path_query_and_fragment() {
        assert_eq!(
            resolve_origin("https://www.example.com/mini-projects/codeblock?x=1#top"),
            "https://www.example.com"
        );
    }

    #[test]
    fn keeps_explicit_port_and_drops_default() {
        assert_eq!(resolve_origin("http://localhost:3000/demo"), "http://localhost:3000");
        assert_eq!(resolve_origin("https://example.com:443/"), "https://example.com");
    }

    #[test]
    fn bare_origin_is_fixed_point() {
        for origin in ["https://example.com", "http://127.0.0.1:8080", "example.com", "*"] {
            assert_eq!(resolve_origin(origin), origin);
            assert_eq!(resolve_origin(&resolve_origin(origin)), resolve_origin(origin));
        }
    }

    #[test]
    fn scheme_match_is_case_insensitive() {
        assert_eq!(resolve_origin("HTTPS://Example.COM/page"), "https://example.com");
    }

    #[test]
    fn malformed_urls_degrade_to_raw_string() {
        for raw in ["https://", "http://exa mple.com/", "https://[::1"] {
            assert_eq!(resolve_origin(raw), raw);
        }
    }

    #[test]
    fn unrecognized_schemes_pass_through() {
        assert_eq!(resolve_origin("ftp://files.example.com/a"), "ftp://files.example.com/a");
        assert_eq!(resolve_origin(""), "");
    }
}
