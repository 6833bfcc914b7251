use std::time::Duration;

use cookie::{Cookie, SameSite};

fn base(name: String, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

/// Cookie carrying the session id for an authorization group.
pub(crate) fn session_cookie(group: &str, session_id: String, secure: bool) -> Cookie<'static> {
    base(group.to_string(), session_id, secure)
}

/// Short-lived cookie binding a pending login to this browser.
pub(crate) fn state_cookie(
    name: String,
    nonce: &str,
    ttl: Duration,
    secure: bool,
) -> Cookie<'static> {
    let mut cookie = base(name, nonce.to_string(), secure);
    let seconds = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
    cookie.set_max_age(cookie::time::Duration::seconds(seconds));
    cookie
}

/// Cookie instructing the browser to drop `name`.
pub(crate) fn removal_cookie(name: String, secure: bool) -> Cookie<'static> {
    let mut cookie = base(name, String::new(), secure);
    cookie.make_removal();
    cookie
}
