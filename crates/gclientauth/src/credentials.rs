//! Client credential loading
//!
//! Reads the client-secret JSON downloaded from the provider's developer
//! console. The document wraps the client fields in exactly one of two
//! top-level keys, `installed` or `web`, and that key decides how the
//! authorization code is captured later on.

use std::path::Path;

use common::Secret;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::constants::{ACCESS_TYPE_OFFLINE, STATE_TOKEN};
use crate::error::{Error, Result};

/// Which kind of client the credential document describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// Desktop/"other" client: the user pastes the code back by hand.
    Installed,
    /// Web client: the provider redirects to a listener we run locally.
    Web,
}

/// Client configuration for one authorization flow.
///
/// `client_secret` is wrapped so it never shows up in logs or `Debug` output.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub auth_url: Url,
    pub token_url: Url,
    pub redirect_url: String,
    pub scopes: Vec<String>,
}

impl OAuthConfig {
    /// Build the consent-page URL.
    ///
    /// Requests offline access so the provider also issues a refresh token.
    /// Parameters are appended to whatever query `auth_url` already carries.
    pub fn auth_code_url(&self, code_challenge: Option<&str>) -> String {
        let mut url = self.auth_url.clone();
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("access_type", ACCESS_TYPE_OFFLINE);
            params.append_pair("client_id", &self.client_id);
            params.append_pair("redirect_uri", &self.redirect_url);
            params.append_pair("response_type", "code");
            params.append_pair("scope", &self.scopes.join(" "));
            params.append_pair("state", STATE_TOKEN);
            if let Some(challenge) = code_challenge {
                params.append_pair("code_challenge", challenge);
                params.append_pair("code_challenge_method", "S256");
            }
        }
        url.into()
    }
}

#[derive(Deserialize)]
struct CredentialDocument {
    #[serde(default)]
    installed: Option<ClientFields>,
    #[serde(default)]
    web: Option<ClientFields>,
}

#[derive(Deserialize)]
struct ClientFields {
    client_id: String,
    #[serde(default)]
    client_secret: Secret<String>,
    #[serde(default)]
    redirect_uris: Vec<String>,
    auth_uri: String,
    token_uri: String,
}

/// Read and parse a credential document from disk.
pub async fn load_credential(
    path: &Path,
    scopes: &[String],
) -> Result<(OAuthConfig, CredentialKind)> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| Error::Read(format!("{}: {e}", path.display())))?;
    let (config, kind) = parse_credential(&data, scopes)?;
    debug!(
        path = %path.display(),
        ?kind,
        client_id = %config.client_id,
        has_secret = !config.client_secret.is_empty(),
        "loaded client credential"
    );
    Ok((config, kind))
}

/// Parse an in-memory credential document.
///
/// Exactly one of `installed` / `web` must be present.
pub fn parse_credential(data: &[u8], scopes: &[String]) -> Result<(OAuthConfig, CredentialKind)> {
    let document: CredentialDocument =
        serde_json::from_slice(data).map_err(|e| Error::Parse(e.to_string()))?;

    let (fields, kind) = match (document.installed, document.web) {
        (Some(fields), None) => (fields, CredentialKind::Installed),
        (None, Some(fields)) => (fields, CredentialKind::Web),
        (Some(_), Some(_)) => {
            return Err(Error::Parse(
                "both \"installed\" and \"web\" credentials present".into(),
            ));
        }
        (None, None) => return Err(Error::Parse("no credentials found".into())),
    };

    let redirect_url = fields
        .redirect_uris
        .into_iter()
        .next()
        .ok_or_else(|| Error::Parse("missing redirect URL in the client credentials".into()))?;
    let auth_url = Url::parse(&fields.auth_uri)
        .map_err(|e| Error::Parse(format!("invalid auth_uri {:?}: {e}", fields.auth_uri)))?;
    let token_url = Url::parse(&fields.token_uri)
        .map_err(|e| Error::Parse(format!("invalid token_uri {:?}: {e}", fields.token_uri)))?;

    let config = OAuthConfig {
        client_id: fields.client_id,
        client_secret: fields.client_secret,
        auth_url,
        token_url,
        redirect_url,
        scopes: scopes.to_vec(),
    };
    Ok((config, kind))
}
