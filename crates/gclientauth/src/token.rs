//! Tokens and the authorization-code exchange
//!
//! `Token` is the record handed back to the caller and written to the cache.
//! Its JSON shape matches the common OAuth2 token layout (`access_token`,
//! `token_type`, `refresh_token`, `expiry`), so cache files written by other
//! OAuth2 clients load here and vice versa.
//!
//! The exchange POSTs the authorization code to the token endpoint. The
//! provider invalidates a code on first use, successful or not, so nothing
//! here ever retries with the same code.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants::{EXPIRY_SKEW_SECS, GRANT_AUTHORIZATION_CODE};
use crate::credentials::OAuthConfig;
use crate::error::{Error, Result};

/// Unix timestamp of `0001-01-01T00:00:00Z`, written by some clients to
/// mean "no expiry".
const UNSET_EXPIRY_TIMESTAMP: i64 = -62_135_596_800;

/// An access token plus the metadata needed to judge and renew it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Absolute expiry. `None` means the token does not expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl Token {
    /// True iff the access token is non-empty and not (about to be) expired.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub(crate) fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && !self.expired_at(now)
    }

    fn expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            None => false,
            Some(expiry) if expiry.timestamp() == UNSET_EXPIRY_TIMESTAMP => false,
            Some(expiry) => expiry
                .checked_sub_signed(chrono::Duration::seconds(EXPIRY_SKEW_SECS))
                .is_none_or(|edge| edge < now),
        }
    }

    /// Token type, defaulting to `Bearer` when the endpoint omitted it.
    pub fn kind(&self) -> &str {
        match self.token_type.as_str() {
            "" => "Bearer",
            "bearer" => "Bearer",
            other => other,
        }
    }

    /// Value for an HTTP `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.kind(), self.access_token)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Response body of the token endpoint.
///
/// `expires_in` is a delta in seconds from the response time; it is turned
/// into an absolute `expiry` before the token is stored.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_token(self, now: DateTime<Utc>) -> Token {
        Token {
            access_token: self.access_token,
            token_type: self.token_type,
            refresh_token: self.refresh_token.filter(|r| !r.is_empty()),
            // An expires_in too large to represent is treated as no expiry.
            expiry: self
                .expires_in
                .filter(|secs| *secs > 0)
                .and_then(chrono::Duration::try_seconds)
                .and_then(|delta| now.checked_add_signed(delta)),
        }
    }
}

/// Trades an authorization code for a token.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn TokenExchanger>`).
pub trait TokenExchanger: Send + Sync {
    fn exchange<'a>(
        &'a self,
        config: &'a OAuthConfig,
        code: &'a str,
        code_verifier: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<Token>> + Send + 'a>>;
}

/// Exchanger talking to the real token endpoint over HTTP.
#[derive(Debug, Clone, Default)]
pub struct HttpExchanger {
    client: reqwest::Client,
}

impl HttpExchanger {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl TokenExchanger for HttpExchanger {
    fn exchange<'a>(
        &'a self,
        config: &'a OAuthConfig,
        code: &'a str,
        code_verifier: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<Token>> + Send + 'a>> {
        Box::pin(exchange_code(&self.client, config, code, code_verifier))
    }
}

/// Exchange an authorization code for a token (standard authorization-code
/// grant).
///
/// An empty code is rejected before any request is made. Any transport
/// failure, non-success status or malformed body is an `Error::Exchange`
/// carrying the code for diagnostics.
pub async fn exchange_code(
    client: &reqwest::Client,
    config: &OAuthConfig,
    code: &str,
    code_verifier: Option<&str>,
) -> Result<Token> {
    if code.is_empty() {
        return Err(Error::exchange(code, "no authorization code was received"));
    }

    let mut form = vec![
        ("grant_type", GRANT_AUTHORIZATION_CODE),
        ("code", code),
        ("redirect_uri", config.redirect_url.as_str()),
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.expose().as_str()),
    ];
    if let Some(verifier) = code_verifier {
        form.push(("code_verifier", verifier));
    }

    debug!(token_url = %config.token_url, "exchanging authorization code");
    let response = client
        .post(config.token_url.clone())
        .form(&form)
        .send()
        .await
        .map_err(|e| Error::exchange(code, format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::exchange(
            code,
            format!("token endpoint returned {status}: {body}"),
        ));
    }

    let body = response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::exchange(code, format!("invalid token response: {e}")))?;
    if body.access_token.is_empty() {
        return Err(Error::exchange(
            code,
            "server response missing access_token",
        ));
    }

    let token = body.into_token(Utc::now());
    info!(
        expiry = ?token.expiry,
        has_refresh_token = token.refresh_token.is_some(),
        "authorization code exchanged"
    );
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::parse_credential;
    use axum::Router;
    use axum::extract::Form;
    use axum::http::StatusCode;
    use axum::routing::post;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    fn token_at(expiry: Option<DateTime<Utc>>) -> Token {
        Token {
            access_token: "ya29.access".into(),
            token_type: "Bearer".into(),
            refresh_token: Some("1//refresh".into()),
            expiry,
        }
    }

    /// Spin up an in-process token endpoint and return a config pointing at it
    /// plus the captured form submissions.
    async fn mock_token_endpoint(
        status: StatusCode,
        body: &'static str,
    ) -> (OAuthConfig, Arc<Mutex<Vec<HashMap<String, String>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let app = Router::new().route(
            "/token",
            post(move |Form(form): Form<HashMap<String, String>>| {
                let recorder = recorder.clone();
                async move {
                    recorder.lock().unwrap().push(form);
                    (
                        status,
                        [(axum::http::header::CONTENT_TYPE, "application/json")],
                        body,
                    )
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let doc = format!(
            r#"{{"installed": {{
                "client_id": "cid",
                "client_secret": "csecret",
                "redirect_uris": ["urn:ietf:wg:oauth:2.0:oob"],
                "auth_uri": "http://{addr}/auth",
                "token_uri": "http://{addr}/token"
            }}}}"#
        );
        let (config, _) = parse_credential(doc.as_bytes(), &["scope-a".into()]).unwrap();
        (config, seen)
    }

    #[test]
    fn token_without_expiry_is_valid() {
        assert!(token_at(None).is_valid());
    }

    #[test]
    fn future_expiry_is_valid() {
        let token = token_at(Some(Utc::now() + chrono::Duration::hours(1)));
        assert!(token.is_valid());
    }

    #[test]
    fn past_expiry_is_invalid() {
        let token = token_at(Some(Utc::now() - chrono::Duration::minutes(5)));
        assert!(!token.is_valid());
    }

    #[test]
    fn expiry_within_skew_is_invalid() {
        let now = Utc::now();
        let token = token_at(Some(now + chrono::Duration::seconds(5)));
        assert!(!token.is_valid_at(now));
    }

    #[test]
    fn earliest_representable_expiry_is_expired() {
        assert!(!token_at(Some(DateTime::<Utc>::MIN_UTC)).is_valid());
    }

    #[test]
    fn empty_access_token_is_invalid() {
        let mut token = token_at(None);
        token.access_token.clear();
        assert!(!token.is_valid());
    }

    #[test]
    fn zero_time_expiry_means_no_expiry() {
        let json = r#"{"access_token":"at","token_type":"Bearer","expiry":"0001-01-01T00:00:00Z"}"#;
        let token: Token = serde_json::from_str(json).unwrap();
        assert!(token.is_valid());
    }

    #[test]
    fn deserializes_standard_token_json() {
        let json = r#"{
            "access_token": "ya29.a0",
            "token_type": "Bearer",
            "refresh_token": "1//0g",
            "expiry": "2031-04-05T10:20:30.123456789-07:00"
        }"#;
        let token: Token = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "ya29.a0");
        assert_eq!(token.refresh_token.as_deref(), Some("1//0g"));
        assert_eq!(
            token.expiry.unwrap().to_rfc3339(),
            "2031-04-05T17:20:30.123456789+00:00"
        );
    }

    #[test]
    fn serialization_omits_missing_refresh_token() {
        let mut token = token_at(None);
        token.refresh_token = None;
        let json = serde_json::to_string(&token).unwrap();
        assert!(json.contains("\"access_token\":\"ya29.access\""));
        assert!(!json.contains("refresh_token"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let debug = format!("{:?}", token_at(None));
        assert!(!debug.contains("ya29.access"), "leaked: {debug}");
        assert!(!debug.contains("1//refresh"), "leaked: {debug}");
    }

    #[test]
    fn authorization_header_defaults_to_bearer() {
        let mut token = token_at(None);
        token.token_type.clear();
        assert_eq!(token.authorization_header(), "Bearer ya29.access");
    }

    #[tokio::test]
    async fn exchange_posts_authorization_code_grant() {
        let (config, seen) = mock_token_endpoint(
            StatusCode::OK,
            r#"{"access_token":"at_new","token_type":"Bearer","refresh_token":"rt_new","expires_in":3600}"#,
        )
        .await;

        let before = Utc::now();
        let token = exchange_code(&reqwest::Client::new(), &config, "4/code", None)
            .await
            .unwrap();

        assert_eq!(token.access_token, "at_new");
        assert_eq!(token.refresh_token.as_deref(), Some("rt_new"));
        let expiry = token.expiry.unwrap();
        assert!(expiry >= before + chrono::Duration::seconds(3600));
        assert!(token.is_valid());

        let forms = seen.lock().unwrap();
        assert_eq!(forms.len(), 1);
        let form = &forms[0];
        assert_eq!(form["grant_type"], "authorization_code");
        assert_eq!(form["code"], "4/code");
        assert_eq!(form["client_id"], "cid");
        assert_eq!(form["client_secret"], "csecret");
        assert_eq!(form["redirect_uri"], "urn:ietf:wg:oauth:2.0:oob");
        assert!(!form.contains_key("code_verifier"));
    }

    #[tokio::test]
    async fn exchange_sends_code_verifier() {
        let (config, seen) =
            mock_token_endpoint(StatusCode::OK, r#"{"access_token":"at","expires_in":60}"#).await;

        exchange_code(&reqwest::Client::new(), &config, "c", Some("verifier-xyz"))
            .await
            .unwrap();

        assert_eq!(seen.lock().unwrap()[0]["code_verifier"], "verifier-xyz");
    }

    #[tokio::test]
    async fn rejected_code_is_exchange_error_with_code() {
        let (config, _) = mock_token_endpoint(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Bad Request"}"#,
        )
        .await;

        let err = exchange_code(&reqwest::Client::new(), &config, "used-code", None)
            .await
            .unwrap_err();
        match err {
            Error::Exchange { code, reason } => {
                assert_eq!(code, "used-code");
                assert!(reason.contains("invalid_grant"), "got: {reason}");
            }
            other => panic!("expected Exchange, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn huge_expires_in_means_no_expiry() {
        let (config, _) = mock_token_endpoint(
            StatusCode::OK,
            r#"{"access_token":"at","token_type":"Bearer","expires_in":9223372036854775}"#,
        )
        .await;

        let token = exchange_code(&reqwest::Client::new(), &config, "c", None)
            .await
            .unwrap();
        assert_eq!(token.expiry, None);
        assert!(token.is_valid());
    }

    #[test]
    fn expires_in_past_calendar_range_means_no_expiry() {
        let response = TokenResponse {
            access_token: "at".into(),
            token_type: String::new(),
            refresh_token: None,
            expires_in: Some(i64::MAX / 1000 - 1),
        };
        assert_eq!(response.into_token(Utc::now()).expiry, None);
    }

    #[tokio::test]
    async fn response_without_access_token_is_error() {
        let (config, _) = mock_token_endpoint(StatusCode::OK, r#"{"token_type":"Bearer"}"#).await;
        let err = exchange_code(&reqwest::Client::new(), &config, "c", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Exchange { .. }));
    }

    #[tokio::test]
    async fn empty_code_is_rejected_without_request() {
        let (config, seen) = mock_token_endpoint(StatusCode::OK, r#"{"access_token":"at"}"#).await;
        let err = exchange_code(&reqwest::Client::new(), &config, "", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Exchange { ref code, .. } if code.is_empty()));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_exchange_error() {
        let doc = r#"{"installed": {
            "client_id": "cid",
            "redirect_uris": ["urn:ietf:wg:oauth:2.0:oob"],
            "auth_uri": "http://127.0.0.1:1/auth",
            "token_uri": "http://127.0.0.1:1/token"
        }}"#;
        let (config, _) = parse_credential(doc.as_bytes(), &[]).unwrap();
        let err = HttpExchanger::default()
            .exchange(&config, "code", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Exchange { ref code, .. } if code == "code"));
    }
}
