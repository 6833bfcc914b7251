//! Authorization code exchange against the identity provider.
//!
//! The token endpoint answers with a JSON document carrying the user id and
//! either an inline `profile` object or an `endpoint` the profile can be
//! fetched from with the returned bearer `access_token`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use axum::http::header::{ACCEPT, AUTHORIZATION};
use axum::http::{HeaderMap, HeaderValue};
use tracing::{debug, instrument};
use url::{Url, form_urlencoded};

use crate::config::{GatewayConfig, LocationPolicy, ProviderConfig};
use crate::error::GatewayError;
use crate::http::{HttpExchange, HttpResponse, ServerAddress};
use crate::json::{JsonDocument, JsonNode, JsonType};
use crate::session::UID_ATTRIBUTE;
use crate::transport::TransportClient;

/// Identity vouched for by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityAssertion {
    pub uid: String,
    /// Scalar profile attributes, `uid` included.
    pub profile: BTreeMap<String, String>,
}

/// Exchanges authorization codes for identities.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Redeem `code` for the identity it was issued to.
    ///
    /// A response without a user id is an error.
    async fn exchange_code(
        &self,
        code: &str,
        policy: &LocationPolicy,
    ) -> Result<IdentityAssertion, GatewayError>;
}

/// [`IdentityProvider`] speaking the URS-style OAuth2 protocol over TLS.
#[derive(Debug, Clone)]
pub struct OAuthProvider {
    config: ProviderConfig,
    server: ServerAddress,
    http: HttpExchange,
}

impl OAuthProvider {
    /// Creates a provider client.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the authentication server URL is not
    /// a usable `https` URL.
    pub fn new(config: ProviderConfig, http: HttpExchange) -> Result<Self, GatewayError> {
        let server = ServerAddress::from_url(&config.auth_server)
            .map_err(|e| GatewayError::configuration(e.to_string()))?;
        Ok(Self {
            config,
            server,
            http,
        })
    }

    /// Builds the TLS client and provider from gateway configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the trust store cannot be assembled
    /// or the authentication server URL is unusable.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let transport = TransportClient::new(&config.transport)
            .map_err(|e| GatewayError::configuration(e.to_string()))?;
        let http = HttpExchange::new(transport, config.transport.max_response_bytes);
        Self::new(config.provider.clone(), http)
    }

    async fn fetch_profile(
        &self,
        endpoint: &str,
        access_token: &str,
    ) -> Result<HttpResponse, GatewayError> {
        let (server, path) = if endpoint.starts_with("https://") {
            let url = Url::parse(endpoint).map_err(|e| {
                GatewayError::provider(format!("invalid profile endpoint '{endpoint}': {e}"))
            })?;
            let server = ServerAddress::from_url(&url)?;
            let path = match url.query() {
                Some(query) => format!("{}?{query}", url.path()),
                None => url.path().to_string(),
            };
            (server, path)
        } else if endpoint.starts_with('/') {
            (self.server.clone(), endpoint.to_string())
        } else {
            return Err(GatewayError::provider(format!(
                "invalid profile endpoint '{endpoint}'"
            )));
        };

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {access_token}"))
                .map_err(|_| GatewayError::provider("access token is not a valid header value"))?,
        );
        debug!(host = %server.host, path = %path, "Fetching user profile");
        let response = self.http.get(&server, &path, &headers).await?;
        check_response(&response, "profile endpoint")?;
        Ok(response)
    }
}

#[async_trait]
impl IdentityProvider for OAuthProvider {
    #[instrument(skip_all, fields(group = %policy.authorization_group))]
    async fn exchange_code(
        &self,
        code: &str,
        policy: &LocationPolicy,
    ) -> Result<IdentityAssertion, GatewayError> {
        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "authorization_code")
            .append_pair("code", code)
            .append_pair("redirect_uri", policy.redirect_url.as_str())
            .finish();

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(credentials) = &policy.client_credentials {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Basic {credentials}")).map_err(|_| {
                    GatewayError::configuration("client_credentials is not a valid header value")
                })?,
            );
        }

        let response = self
            .http
            .post(&self.server, &self.config.token_path, &headers, &body)
            .await?;
        check_response(&response, "token endpoint")?;

        let token = JsonDocument::parse(&response.text())?;
        let root = token.root();

        if let Some(profile) = root.member_object("profile") {
            return assertion_from(root, Some(profile));
        }

        match (root.member_string("endpoint"), root.member_string("access_token")) {
            (Some(endpoint), Some(access_token)) => {
                let response = self.fetch_profile(&endpoint, &access_token).await?;
                let profile = JsonDocument::parse(&response.text())?;
                assertion_from(root, Some(profile.root()))
            }
            _ => assertion_from(root, None),
        }
    }
}

/// Maps a non-success status or a JSON `error` member to a provider error.
fn check_response(response: &HttpResponse, what: &str) -> Result<(), GatewayError> {
    let error = JsonDocument::parse(&response.text()).ok().and_then(|doc| {
        let root = doc.root();
        root.member_string("error").map(|error| {
            match root.member_string("error_description") {
                Some(description) => format!("{error}: {description}"),
                None => error,
            }
        })
    });

    if !response.status.is_success() {
        return Err(GatewayError::provider(format!(
            "{what} returned {}{}",
            response.status.as_u16(),
            error.map(|e| format!(" ({e})")).unwrap_or_default()
        )));
    }
    if let Some(error) = error {
        return Err(GatewayError::provider(format!("{what} reported {error}")));
    }
    Ok(())
}

fn assertion_from(
    token: JsonNode<'_>,
    profile: Option<JsonNode<'_>>,
) -> Result<IdentityAssertion, GatewayError> {
    let mut attributes: BTreeMap<String, String> = profile
        .filter(|node| node.node_type() == JsonType::Object)
        .map(|node| {
            node.scalar_members()
                .map(|(name, value)| (name.to_string(), value))
                .collect()
        })
        .unwrap_or_default();

    let uid = token
        .member_string(UID_ATTRIBUTE)
        .or_else(|| attributes.get(UID_ATTRIBUTE).cloned())
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| GatewayError::provider("identity provider response has no uid"))?;

    attributes.insert(UID_ATTRIBUTE.to_string(), uid.clone());
    Ok(IdentityAssertion {
        uid,
        profile: attributes,
    })
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;

    fn response(status: StatusCode, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HeaderMap::new(),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_assertion_from_inline_profile() {
        let doc = JsonDocument::parse(
            r#"{"uid":"alice","profile":{"email_address":"a@example.com","age":30,"nested":{}}}"#,
        )
        .unwrap();
        let root = doc.root();
        let assertion = assertion_from(root, root.member_object("profile")).unwrap();
        assert_eq!(assertion.uid, "alice");
        assert_eq!(assertion.profile.get("email_address").unwrap(), "a@example.com");
        assert_eq!(assertion.profile.get("age").unwrap(), "30");
        assert_eq!(assertion.profile.get("uid").unwrap(), "alice");
        assert!(!assertion.profile.contains_key("nested"));
    }

    #[test]
    fn test_uid_from_profile_document() {
        let token = JsonDocument::parse(r#"{"access_token":"t"}"#).unwrap();
        let profile = JsonDocument::parse(r#"{"uid":"bob","first_name":"Bob"}"#).unwrap();
        let assertion = assertion_from(token.root(), Some(profile.root())).unwrap();
        assert_eq!(assertion.uid, "bob");
        assert_eq!(assertion.profile.get("first_name").unwrap(), "Bob");
    }

    #[test]
    fn test_missing_uid_is_provider_error() {
        let doc = JsonDocument::parse(r#"{"access_token":"t","profile":{"name":"x"}}"#).unwrap();
        let root = doc.root();
        let err = assertion_from(root, root.member_object("profile")).unwrap_err();
        assert!(matches!(err, GatewayError::Provider { .. }));
        assert!(err.to_string().contains("no uid"));
    }

    #[test]
    fn test_empty_uid_is_provider_error() {
        let doc = JsonDocument::parse(r#"{"uid":""}"#).unwrap();
        assert!(assertion_from(doc.root(), None).is_err());
    }

    #[test]
    fn test_check_response_rejects_error_status() {
        let err = check_response(
            &response(
                StatusCode::BAD_REQUEST,
                r#"{"error":"invalid_grant","error_description":"code expired"}"#,
            ),
            "token endpoint",
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Identity provider error: token endpoint returned 400 (invalid_grant: code expired)"
        );
    }

    #[test]
    fn test_check_response_rejects_error_member_on_success() {
        let err = check_response(
            &response(StatusCode::OK, r#"{"error":"access_denied"}"#),
            "token endpoint",
        )
        .unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    #[test]
    fn test_check_response_accepts_success() {
        assert!(
            check_response(&response(StatusCode::OK, r#"{"uid":"a"}"#), "token endpoint").is_ok()
        );
        assert!(check_response(&response(StatusCode::OK, "not json"), "token endpoint").is_ok());
    }

    #[test]
    fn test_plain_http_server_is_configuration_error() {
        let transport = TransportClient::new(&crate::config::TransportConfig::default()).unwrap();
        let http = HttpExchange::new(transport, 1024);
        let config = ProviderConfig::new(Url::parse("http://idp.example.com").unwrap());
        let err = OAuthProvider::new(config, http).unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
    }
}
