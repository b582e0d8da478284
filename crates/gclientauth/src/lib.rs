//! OAuth2 access tokens for command-line clients
//!
//! Obtains a token for calling a provider's APIs on behalf of a user and
//! caches it so the user is only asked once. Two client types are supported,
//! told apart by the credential document:
//! - `installed`: the consent URL is shown (or opened) and the user pastes
//!   the resulting code on standard input.
//! - `web`: a one-shot local HTTP listener on the redirect URL's host
//!   captures the code from the provider's redirect.
//!
//! Flow:
//! 1. `credentials::load_credential()` parses the client credential
//! 2. `cache::load()` returns a cached token; if it is still valid, done
//! 3. An `acquire::CodeAcquirer` picked by credential kind obtains a code
//! 4. `token::exchange_code()` trades the code for a token
//! 5. `cache::save()` persists it (failure is only a warning)
//!
//! `flow::Authenticator` runs all of the above; `get_token()` is the
//! one-call entry point.

pub mod acquire;
pub mod browser;
pub mod cache;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod flow;
pub mod pkce;
pub mod token;

pub use acquire::{CallbackServer, CodeAcquirer, LocalServerAcquirer, ManualAcquirer};
pub use browser::{BrowserOpener, OpenError, SystemBrowser};
pub use credentials::{CredentialKind, OAuthConfig, load_credential};
pub use error::{CacheWarning, Error, Result};
pub use flow::{AuthOptions, Authenticator, Authorized, TokenSource, get_token};
pub use token::{HttpExchanger, Token, TokenExchanger, exchange_code};
