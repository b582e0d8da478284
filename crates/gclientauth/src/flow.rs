//! Authorization flow orchestration
//!
//! Pure state machine: receives events, returns (new_state, action).
//! `Authenticator::authorize` executes the I/O implied by each action.
//!
//! ```text
//! LoadingCredential -> CheckingCache -> Done (cached token)
//!                                    \-> AcquiringCode -> ExchangingToken -> PersistingToken -> Done
//! ```
//!
//! Any failure before `PersistingToken` ends in `Failed` and nothing is
//! written to the cache. A failed cache write is downgraded to a warning.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::acquire::{CodeAcquirer, CodeInput, LocalServerAcquirer, ManualAcquirer, stdin_input};
use crate::browser::{BrowserOpener, SystemBrowser};
use crate::cache;
use crate::constants::DEFAULT_CALLBACK_PORT;
use crate::credentials::{CredentialKind, OAuthConfig, load_credential};
use crate::error::{CacheWarning, Error, Result};
use crate::pkce::PkcePair;
use crate::token::{HttpExchanger, Token, TokenExchanger};

/// Where the returned token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Cache,
    Exchange,
}

/// Flow states.
#[derive(Debug)]
pub enum FlowState {
    LoadingCredential,
    CheckingCache { kind: CredentialKind },
    AcquiringCode { kind: CredentialKind },
    ExchangingToken,
    PersistingToken { token: Token },
    Done,
    Failed,
}

/// Events that drive state transitions.
#[derive(Debug)]
pub enum FlowEvent {
    /// Credential document parsed
    CredentialLoaded(CredentialKind),
    /// Cache read finished; `None` covers missing and unparseable files alike
    CacheLoaded(Option<Token>),
    /// User or redirect produced a code (possibly empty)
    CodeAcquired(String),
    /// Token endpoint issued a token
    TokenExchanged(Token),
    /// Token written to the cache
    Persisted,
    /// Cache write failed
    PersistFailed(CacheWarning),
    /// Any terminal failure
    Failed(Error),
}

/// Actions the driver should execute after a state transition.
#[derive(Debug)]
pub enum FlowAction {
    LoadCache,
    AcquireCode(CredentialKind),
    ExchangeCode(String),
    SaveToken(Token),
    Finish { token: Token, source: TokenSource },
    Abort(Error),
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: FlowState, event: FlowEvent) -> (FlowState, FlowAction) {
    match (state, event) {
        (_, FlowEvent::Failed(error)) => (FlowState::Failed, FlowAction::Abort(error)),

        (FlowState::LoadingCredential, FlowEvent::CredentialLoaded(kind)) => {
            (FlowState::CheckingCache { kind }, FlowAction::LoadCache)
        }

        (FlowState::CheckingCache { kind }, FlowEvent::CacheLoaded(cached)) => match cached
            .filter(|token| cache::is_valid(Some(token)))
        {
            Some(token) => (
                FlowState::Done,
                FlowAction::Finish {
                    token,
                    source: TokenSource::Cache,
                },
            ),
            _ => (
                FlowState::AcquiringCode { kind },
                FlowAction::AcquireCode(kind),
            ),
        },

        (FlowState::AcquiringCode { .. }, FlowEvent::CodeAcquired(code)) => {
            (FlowState::ExchangingToken, FlowAction::ExchangeCode(code))
        }

        (FlowState::ExchangingToken, FlowEvent::TokenExchanged(token)) => (
            FlowState::PersistingToken {
                token: token.clone(),
            },
            FlowAction::SaveToken(token),
        ),

        (
            FlowState::PersistingToken { token },
            FlowEvent::Persisted | FlowEvent::PersistFailed(_),
        ) => (
            FlowState::Done,
            FlowAction::Finish {
                token,
                source: TokenSource::Exchange,
            },
        ),

        (state, event) => {
            let error = Error::Flow(format!("unexpected {event:?} in state {state:?}"));
            (FlowState::Failed, FlowAction::Abort(error))
        }
    }
}

/// Inputs for one authorization run.
#[derive(Debug, Clone)]
pub struct AuthOptions {
    /// Client credential document (`installed` or `web`)
    pub credential_file: PathBuf,
    /// Token cache location; not validated, created or replaced as needed
    pub token_cache: PathBuf,
    pub scopes: Vec<String>,
    /// Try to open the consent page automatically (installed clients)
    pub browser: bool,
    /// Port for the local callback listener (web clients)
    pub port: String,
    /// Deadline for the token endpoint call. Code acquisition is never
    /// bounded.
    pub exchange_timeout: Option<Duration>,
    /// Add a PKCE challenge to the consent URL
    pub pkce: bool,
}

impl AuthOptions {
    pub fn new(
        credential_file: impl Into<PathBuf>,
        token_cache: impl Into<PathBuf>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            credential_file: credential_file.into(),
            token_cache: token_cache.into(),
            scopes,
            browser: false,
            port: DEFAULT_CALLBACK_PORT.to_owned(),
            exchange_timeout: None,
            pkce: false,
        }
    }
}

/// Successful outcome: a usable token and the client configuration needed to
/// call the provider's APIs with it.
#[derive(Debug)]
pub struct Authorized {
    pub token: Token,
    pub config: OAuthConfig,
    pub source: TokenSource,
    /// Set when the fresh token could not be cached
    pub cache_warning: Option<CacheWarning>,
}

/// Runs the authorization flow with pluggable collaborators.
pub struct Authenticator {
    options: AuthOptions,
    exchanger: Arc<dyn TokenExchanger>,
    opener: Arc<dyn BrowserOpener>,
    input: CodeInput,
}

impl Authenticator {
    /// Authenticator using the real token endpoint, system browser and stdin.
    pub fn new(options: AuthOptions) -> Self {
        Self {
            options,
            exchanger: Arc::new(HttpExchanger::default()),
            opener: Arc::new(SystemBrowser),
            input: stdin_input(),
        }
    }

    pub fn with_exchanger(mut self, exchanger: Arc<dyn TokenExchanger>) -> Self {
        self.exchanger = exchanger;
        self
    }

    pub fn with_browser_opener(mut self, opener: Arc<dyn BrowserOpener>) -> Self {
        self.opener = opener;
        self
    }

    pub fn with_code_input(mut self, input: CodeInput) -> Self {
        self.input = input;
        self
    }

    /// Credential kind strictly decides the strategy; there is no fallback
    /// between the two.
    fn acquirer_for(&self, kind: CredentialKind) -> Box<dyn CodeAcquirer> {
        match kind {
            CredentialKind::Installed => Box::new(ManualAcquirer::new(
                self.options.browser,
                self.opener.clone(),
                self.input.clone(),
            )),
            CredentialKind::Web => Box::new(LocalServerAcquirer::new(
                self.options.port.clone(),
                self.opener.clone(),
            )),
        }
    }

    /// Return a valid token, from the cache when possible, otherwise by
    /// running the three-legged flow and caching the result.
    pub async fn authorize(&self) -> Result<Authorized> {
        let options = &self.options;
        let (config, kind) = load_credential(&options.credential_file, &options.scopes).await?;
        let pkce = options.pkce.then(PkcePair::generate);
        let mut cache_warning = None;

        let (mut state, mut action) =
            handle_event(FlowState::LoadingCredential, FlowEvent::CredentialLoaded(kind));

        loop {
            debug!(?state, "authorization flow");
            let event = match action {
                FlowAction::LoadCache => {
                    FlowEvent::CacheLoaded(cache::load(&options.token_cache).await)
                }
                FlowAction::AcquireCode(kind) => {
                    info!(?kind, "no valid cached token, requesting authorization");
                    let auth_url = config.auth_code_url(pkce.as_ref().map(|p| p.challenge.as_str()));
                    match self.acquirer_for(kind).acquire_code(&auth_url, &config).await {
                        Ok(code) => FlowEvent::CodeAcquired(code),
                        Err(e) => FlowEvent::Failed(e),
                    }
                }
                FlowAction::ExchangeCode(code) => {
                    let verifier = pkce.as_ref().map(|p| p.verifier.as_str());
                    match self.exchange(&config, &code, verifier).await {
                        Ok(token) => FlowEvent::TokenExchanged(token),
                        Err(e) => FlowEvent::Failed(e),
                    }
                }
                FlowAction::SaveToken(token) => {
                    match cache::save_or_warn(&options.token_cache, &token).await {
                        None => FlowEvent::Persisted,
                        Some(warning) => {
                            cache_warning = Some(warning.clone());
                            FlowEvent::PersistFailed(warning)
                        }
                    }
                }
                FlowAction::Finish { token, source } => {
                    info!(?source, expiry = ?token.expiry, "authorization complete");
                    return Ok(Authorized {
                        token,
                        config,
                        source,
                        cache_warning,
                    });
                }
                FlowAction::Abort(error) => return Err(error),
            };
            (state, action) = handle_event(state, event);
        }
    }

    /// The exchange is the only step bounded by `exchange_timeout`.
    async fn exchange(
        &self,
        config: &OAuthConfig,
        code: &str,
        verifier: Option<&str>,
    ) -> Result<Token> {
        let exchange = self.exchanger.exchange(config, code, verifier);
        match self.options.exchange_timeout {
            Some(limit) => tokio::time::timeout(limit, exchange).await.map_err(|_| {
                Error::exchange(code, format!("token exchange timed out after {limit:?}"))
            })?,
            None => exchange.await,
        }
    }
}

/// Load-or-authorize with the default collaborators.
pub async fn get_token(options: AuthOptions) -> Result<Authorized> {
    Authenticator::new(options).authorize().await
}
