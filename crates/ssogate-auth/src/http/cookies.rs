//! Inbound `Cookie` header helpers.

use axum::http::header::COOKIE;
use axum::http::{HeaderMap, HeaderValue};

fn pairs(header: &str) -> impl Iterator<Item = (&str, &str)> {
    header.split(';').filter_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        Some((name.trim(), value.trim()))
    })
}

/// Returns the value of the first cookie called `name`.
///
/// Empty values are treated as absent.
#[must_use]
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(pairs)
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Removes every cookie called `name` from the `Cookie` headers.
///
/// Headers left empty are dropped entirely.
pub fn remove_cookie(headers: &mut HeaderMap, name: &str) {
    let rewritten: Vec<String> = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(|header| {
            pairs(header)
                .filter(|(key, _)| *key != name)
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join("; ")
        })
        .filter(|header| !header.is_empty())
        .collect();

    headers.remove(COOKIE);
    for header in rewritten {
        if let Ok(value) = HeaderValue::from_str(&header) {
            headers.append(COOKIE, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(values: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for value in values {
            headers.append(COOKIE, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn test_cookie_value() {
        let headers = headers(&["a=1; grp=abc", "other=2"]);
        assert_eq!(cookie_value(&headers, "grp").as_deref(), Some("abc"));
        assert_eq!(cookie_value(&headers, "other").as_deref(), Some("2"));
        assert!(cookie_value(&headers, "gr").is_none());
    }

    #[test]
    fn test_empty_cookie_is_absent() {
        let headers = headers(&["grp=; x=1"]);
        assert!(cookie_value(&headers, "grp").is_none());
    }

    #[test]
    fn test_remove_cookie() {
        let mut headers = headers(&["a=1; grp=abc; b=2", "grp=def"]);
        remove_cookie(&mut headers, "grp");
        assert!(cookie_value(&headers, "grp").is_none());
        let remaining: Vec<_> = headers
            .get_all(COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(remaining, vec!["a=1; b=2".to_string()]);
    }

    #[test]
    fn test_remove_last_cookie_drops_header() {
        let mut headers = headers(&["grp=abc"]);
        remove_cookie(&mut headers, "grp");
        assert!(headers.get(COOKIE).is_none());
    }
}
