use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::cookies::{removal_cookie, session_cookie, state_cookie};
use super::fingerprint::client_fingerprint;
use super::request::GatewayRequest;
use super::state::{StateToken, constant_time_eq};
use super::{Decision, Identity, Redirect};
use crate::config::{GatewayConfig, LocationPolicy};
use crate::error::{ErrorCategory, GatewayError};
use crate::provider::IdentityProvider;
use crate::session::{SessionRecord, SessionStore, StoreError};

/// Drives requests through the single-sign-on flow.
///
/// Cheap to share: hold it in an `Arc` and call it from any task.
pub struct AuthController {
    config: Arc<GatewayConfig>,
    sessions: Arc<dyn SessionStore>,
    provider: Arc<dyn IdentityProvider>,
}

impl AuthController {
    #[must_use]
    pub fn new(
        config: Arc<GatewayConfig>,
        sessions: Arc<dyn SessionStore>,
        provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            config,
            sessions,
            provider,
        }
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    // =========================================================================
    // Entry point
    // =========================================================================

    /// Runs all hooks for a request in order: callback, logout, session
    /// check.
    ///
    /// Requests outside every configured location yield
    /// [`Decision::Continue`].
    pub async fn handle(&self, req: &mut GatewayRequest) -> Decision {
        let decision = self.intercept_callback(req).await;
        if !decision.is_continue() {
            return decision;
        }

        let Some(policy) = self.config.location_for_path(req.path()) else {
            return Decision::Continue;
        };

        self.intercept_logout(req, policy).await;
        self.authenticate(req, policy).await
    }

    // =========================================================================
    // Hooks
    // =========================================================================

    /// Completes a login when the request hits a configured redirect URL.
    ///
    /// Returns [`Decision::Continue`] for any other path.
    #[instrument(skip_all, fields(path = %req.path()))]
    pub async fn intercept_callback(&self, req: &GatewayRequest) -> Decision {
        let Some(policy) = self.config.location_for_redirect(req.path()) else {
            return Decision::Continue;
        };

        match self.complete_login(req, policy).await {
            Ok(redirect) => Decision::Redirect(redirect),
            Err(err) => {
                let state_cookie = req
                    .query_param("state")
                    .and_then(|raw| StateToken::decode(&raw).ok())
                    .map(|state| policy.state_cookie_name(state.nonce()));
                self.login_failed(&err, policy, state_cookie)
            }
        }
    }

    /// Destroys the session when the request hits the location's logout
    /// path and strips the session cookie from the request.
    ///
    /// Always returns [`Decision::Continue`]; the request proceeds as
    /// unauthenticated.
    pub async fn intercept_logout(
        &self,
        req: &mut GatewayRequest,
        policy: &LocationPolicy,
    ) -> Decision {
        let Some(logout_path) = policy.logout_path.as_deref() else {
            return Decision::Continue;
        };
        if req.path() != logout_path {
            return Decision::Continue;
        }

        if let Some(session_id) = req.cookie(&policy.authorization_group) {
            match self.sessions.destroy(&session_id).await {
                Ok(()) => info!(group = %policy.authorization_group, "Session logged out"),
                Err(e) => warn!(error = %e, "Failed to destroy session on logout"),
            }
        }
        req.remove_cookie(&policy.authorization_group);
        Decision::Continue
    }

    /// Checks the session for a protected request and decides how to
    /// proceed.
    ///
    /// A valid session allows the request. Without one the configured
    /// anonymous user is allowed, or the browser is sent to the identity
    /// provider. A failing session store denies the request.
    #[instrument(skip_all, fields(group = %policy.authorization_group))]
    pub async fn authenticate(&self, req: &GatewayRequest, policy: &LocationPolicy) -> Decision {
        if let Some(session_id) = req.cookie(&policy.authorization_group) {
            match self.validate_session(&session_id, req, policy).await {
                Ok(Some(identity)) => return Decision::Allow(identity),
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "Session check failed");
                    return Decision::Deny(e.status_code());
                }
            }
        }

        if let Some(user) = &policy.anonymous_user {
            debug!(user = %user, "No session, allowing anonymous user");
            return Decision::Allow(Identity::anonymous(user.clone()));
        }

        match self.login_redirect(req, policy) {
            Ok(redirect) => Decision::Redirect(redirect),
            Err(e) => {
                error!(error = %e, "Cannot build login redirect");
                Decision::Deny(e.status_code())
            }
        }
    }

    /// Removes sessions no location would still accept.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the session store fails.
    pub async fn purge_expired(&self) -> Result<usize, GatewayError> {
        let (idle, active) = self.purge_thresholds();
        let removed = self.sessions.purge_expired(idle, active).await?;
        if removed > 0 {
            info!(removed, "Purged expired sessions");
        }
        Ok(removed)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn validate_session(
        &self,
        session_id: &str,
        req: &GatewayRequest,
        policy: &LocationPolicy,
    ) -> Result<Option<Identity>, GatewayError> {
        let now = OffsetDateTime::now_utc();
        let mut record = match self.sessions.read(session_id).await {
            Ok(record) => record,
            Err(StoreError::NotFound) => {
                debug!("Session cookie does not reference a session");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(reason) = rejection_reason(&record, req, policy, now) {
            info!(reason, "Session rejected");
            if let Err(e) = self.sessions.destroy(session_id).await {
                warn!(error = %e, "Failed to destroy rejected session");
            }
            return Ok(None);
        }

        record.touch(now);
        match self.sessions.write(session_id, &record).await {
            Ok(()) => {}
            Err(StoreError::NotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let user = record.uid().unwrap_or_default().to_string();
        Ok(Some(Identity::from_session(
            &user,
            &record,
            &policy.profile_attributes,
        )))
    }

    fn login_redirect(
        &self,
        req: &GatewayRequest,
        policy: &LocationPolicy,
    ) -> Result<Redirect, GatewayError> {
        let provider = &self.config.provider;
        let state = StateToken::new(req.original_url());

        let mut location = Url::parse(&provider.endpoint(&provider.auth_path)).map_err(|e| {
            GatewayError::configuration(format!("invalid authorization endpoint: {e}"))
        })?;
        {
            let mut pairs = location.query_pairs_mut();
            pairs
                .append_pair("client_id", &policy.client_id)
                .append_pair("redirect_uri", policy.redirect_url.as_str())
                .append_pair("response_type", "code")
                .append_pair("state", &state.encode());
            if policy.splash_disable {
                pairs.append_pair("splash", "false");
            }
        }

        debug!(original_url = %state.original_url(), "Redirecting to identity provider");
        Ok(Redirect::new(location.to_string()).with_cookie(state_cookie(
            policy.state_cookie_name(state.nonce()),
            state.nonce(),
            self.config.cookie.state_ttl,
            self.config.cookie.secure,
        )))
    }

    async fn complete_login(
        &self,
        req: &GatewayRequest,
        policy: &LocationPolicy,
    ) -> Result<Redirect, GatewayError> {
        let code = req
            .query_param("code")
            .filter(|code| !code.is_empty())
            .ok_or_else(|| GatewayError::protocol("callback has no code"))?;
        let raw_state = req
            .query_param("state")
            .filter(|state| !state.is_empty())
            .ok_or_else(|| GatewayError::state_mismatch("callback has no state"))?;
        let state = StateToken::decode(&raw_state)?;

        let expected = req
            .cookie(&policy.state_cookie_name(state.nonce()))
            .ok_or_else(|| GatewayError::state_mismatch("no state cookie"))?;
        if !constant_time_eq(&expected, state.nonce()) {
            return Err(GatewayError::state_mismatch(
                "state does not match this browser",
            ));
        }

        let assertion = self.provider.exchange_code(&code, policy).await?;

        let fingerprint = client_fingerprint(req.client_addr, policy.check_ip_octets);
        let record = SessionRecord::new(
            &policy.authorization_group,
            fingerprint,
            assertion.uid.clone(),
            assertion.profile,
        );
        let session_id = self.sessions.create(&record).await?;

        info!(uid = %assertion.uid, "User authenticated");
        let secure = self.config.cookie.secure;
        Ok(Redirect::new(state.original_url())
            .with_cookie(session_cookie(
                &policy.authorization_group,
                session_id,
                secure,
            ))
            .with_cookie(removal_cookie(
                policy.state_cookie_name(state.nonce()),
                secure,
            )))
    }

    fn login_failed(
        &self,
        err: &GatewayError,
        policy: &LocationPolicy,
        state_cookie: Option<String>,
    ) -> Decision {
        match err.category() {
            ErrorCategory::Transport => {
                error!(error = %err, "Identity provider unreachable");
            }
            ErrorCategory::Provider => warn!(error = %err, "Identity provider rejected login"),
            ErrorCategory::Protocol => warn!(error = %err, "Rejected callback"),
            ErrorCategory::Storage | ErrorCategory::Configuration => {
                error!(error = %err, "Login failed");
            }
        }

        if err.is_provider_failure() {
            if let Some(url) = &policy.access_error_url {
                let mut redirect = Redirect::new(url.clone());
                if let Some(name) = state_cookie {
                    redirect = redirect.with_cookie(removal_cookie(name, self.config.cookie.secure));
                }
                return Decision::Redirect(redirect);
            }
        }
        Decision::Deny(err.status_code())
    }

    /// The loosest timeouts across all locations. A location with a
    /// disabled timeout disables it for the sweep.
    fn purge_thresholds(&self) -> (Duration, Duration) {
        let locations = &self.config.locations;
        (
            loosest_timeout(locations, |l| l.idle_timeout),
            loosest_timeout(locations, |l| l.active_timeout),
        )
    }
}

fn loosest_timeout(
    locations: &[LocationPolicy],
    timeout: impl Fn(&LocationPolicy) -> Duration,
) -> Duration {
    let mut loosest = Duration::ZERO;
    for location in locations {
        let value = timeout(location);
        if value.is_zero() {
            return Duration::ZERO;
        }
        loosest = loosest.max(value);
    }
    loosest
}

fn rejection_reason(
    record: &SessionRecord,
    req: &GatewayRequest,
    policy: &LocationPolicy,
    now: OffsetDateTime,
) -> Option<&'static str> {
    if record.is_idle_expired(policy.idle_timeout, now) {
        Some("idle timeout")
    } else if record.is_absolute_expired(policy.active_timeout, now) {
        Some("session lifetime exceeded")
    } else if record.authorization_group != policy.authorization_group {
        Some("authorization group mismatch")
    } else if policy.check_ip_octets > 0
        && client_fingerprint(req.client_addr, policy.check_ip_octets)
            != record.client_ip_fingerprint
    {
        Some("client address mismatch")
    } else if record.uid().is_none() {
        Some("no user id")
    } else {
        None
    }
}
