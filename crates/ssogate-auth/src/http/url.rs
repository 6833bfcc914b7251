//! Form-urlencoded helpers on top of [`url::form_urlencoded`].

use ::url::form_urlencoded;

/// Encodes a single value for a query string or form body.
#[must_use]
pub fn url_encode(input: &str) -> String {
    form_urlencoded::byte_serialize(input.as_bytes()).collect()
}

/// Decodes a single form-urlencoded value.
///
/// `+` decodes to a space. Malformed escapes are kept literally and invalid
/// UTF-8 is replaced.
#[must_use]
pub fn url_decode(input: &str) -> String {
    // Separators must survive as data, not split the value.
    let escaped = input.replace('&', "%26").replace('=', "%3D");
    form_urlencoded::parse(escaped.as_bytes())
        .next()
        .map(|(value, _)| value.into_owned())
        .unwrap_or_default()
}

/// Returns the decoded value of the first `name` parameter in a query string.
///
/// A parameter present without `=` yields an empty string.
#[must_use]
pub fn query_param(query: &str, name: &str) -> Option<String> {
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
