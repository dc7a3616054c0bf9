use http::HeaderMap;

/// Check the client key against the configured one.
///
/// Accepted locations: `Authorization: Bearer <k>`, `x-goog-api-key: <k>`,
/// `x-api-key: <k>`, or `?key=<k>`. Comparison is constant-time.
pub fn verify_client_key(headers: &HeaderMap, query: Option<&str>, expected: &str) -> bool {
    for candidate in extract_keys(headers, query) {
        if constant_time_eq(candidate.as_bytes(), expected.as_bytes()) {
            return true;
        }
    }
    false
}

fn extract_keys(headers: &HeaderMap, query: Option<&str>) -> Vec<String> {
    let mut keys = Vec::new();

    if let Some(auth) = header_str(headers, "authorization") {
        let auth = auth.trim();
        if let Some(token) = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
        {
            keys.push(token.trim().to_string());
        }
    }
    if let Some(key) = header_str(headers, "x-goog-api-key") {
        keys.push(key.trim().to_string());
    }
    if let Some(key) = header_str(headers, "x-api-key") {
        keys.push(key.trim().to_string());
    }
    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some(value) = pair.strip_prefix("key=")
                && !value.is_empty()
            {
                keys.push(value.to_string());
            }
        }
    }

    keys
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Length-leaking only; every byte is always compared.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn accepts_all_three_locations() {
        let expected = "sk-test";
        assert!(verify_client_key(
            &headers(&[("authorization", "Bearer sk-test")]),
            None,
            expected
        ));
        assert!(verify_client_key(
            &headers(&[("x-goog-api-key", "sk-test")]),
            None,
            expected
        ));
        assert!(verify_client_key(
            &headers(&[]),
            Some("alt=sse&key=sk-test"),
            expected
        ));
    }

    #[test]
    fn rejects_wrong_or_missing_key() {
        assert!(!verify_client_key(
            &headers(&[("authorization", "Bearer nope")]),
            None,
            "sk-test"
        ));
        assert!(!verify_client_key(&headers(&[]), None, "sk-test"));
        assert!(!verify_client_key(
            &headers(&[("authorization", "sk-test")]),
            None,
            "sk-test"
        ));
    }
}
