use http::header::{HeaderMap, CONNECTION};
use http::Version;

/// Whether any `Connection` header lists `token` (case-insensitive).
pub(crate) fn has_connection_token(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Whether a message with these headers ends the persistent connection.
///
/// HTTP/1.0 messages close unless they ask for keep-alive.
pub(crate) fn wants_close(version: Version, headers: &HeaderMap) -> bool {
    if has_connection_token(headers, "close") {
        return true;
    }
    version == Version::HTTP_10 && !has_connection_token(headers, "keep-alive")
}

#[cfg(test)]
mod test {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_connection_tokens() {
        let mut headers = HeaderMap::new();
        headers.append(CONNECTION, HeaderValue::from_static("Upgrade, Close"));

        assert!(has_connection_token(&headers, "close"));
        assert!(has_connection_token(&headers, "upgrade"));
        assert!(!has_connection_token(&headers, "keep-alive"));
        assert!(wants_close(Version::HTTP_11, &headers));
    }

    #[test]
    fn test_http10_default_close() {
        let mut headers = HeaderMap::new();
        assert!(wants_close(Version::HTTP_10, &headers));
        assert!(!wants_close(Version::HTTP_11, &headers));

        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        assert!(!wants_close(Version::HTTP_10, &headers));
    }
}
