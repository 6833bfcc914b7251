//! Axum adapter for the flow controller.
//!
//! ```ignore
//! use axum::{Router, middleware::from_fn_with_state};
//! use ssogate_auth::middleware::sso_middleware;
//!
//! let app = Router::new()
//!     .fallback(proxy_handler)
//!     .layer(from_fn_with_state(controller.clone(), sso_middleware));
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::header::{CACHE_CONTROL, LOCATION, SET_COOKIE};
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::flow::{AuthController, Decision, GatewayRequest, Redirect, strip_identity_headers};

/// Runs every request through [`AuthController::handle`].
///
/// Allowed requests continue with `X-Remote-User` / `X-Profile-*` headers
/// set and the [`Identity`](crate::flow::Identity) in the request
/// extensions. Client-supplied identity headers are always stripped.
pub async fn sso_middleware(
    State(controller): State<Arc<AuthController>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let client_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |info| info.0.ip());

    let (mut parts, body) = req.into_parts();
    let mut gateway_req = GatewayRequest::new(
        parts.method.clone(),
        parts.uri.clone(),
        std::mem::take(&mut parts.headers),
        client_addr,
    );

    let decision = controller.handle(&mut gateway_req).await;
    parts.headers = gateway_req.into_headers();
    strip_identity_headers(&mut parts.headers);

    match decision {
        Decision::Continue => next.run(Request::from_parts(parts, body)).await,
        Decision::Allow(identity) => {
            identity.apply_headers(&mut parts.headers);
            let mut req = Request::from_parts(parts, body);
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Decision::Redirect(redirect) => redirect_response(&redirect),
        Decision::Deny(status) => status.into_response(),
    }
}

/// Renders a redirect as `302 Found` with its cookies.
#[must_use]
pub fn redirect_response(redirect: &Redirect) -> Response {
    let Ok(location) = HeaderValue::from_str(&redirect.location) else {
        tracing::error!(location = %redirect.location, "Redirect target is not a valid header");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let mut response = StatusCode::FOUND.into_response();
    let headers = response.headers_mut();
    headers.insert(LOCATION, location);
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    for cookie in &redirect.cookies {
        if let Ok(value) = HeaderValue::from_str(&cookie.encoded().to_string()) {
            headers.append(SET_COOKIE, value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_response() {
        let redirect = Redirect::new("/data/file.nc").with_cookie(
            cookie::Cookie::build(("grp", "abc")).path("/").build(),
        );
        let response = redirect_response(&redirect);
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get(LOCATION).unwrap(), "/data/file.nc");
        assert_eq!(response.headers().get(CACHE_CONTROL).unwrap(), "no-store");
        assert_eq!(
            response.headers().get(SET_COOKIE).unwrap(),
            "grp=abc; Path=/"
        );
    }

    #[test]
    fn test_invalid_location_is_server_error() {
        let response = redirect_response(&Redirect::new("/bad\nheader"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
