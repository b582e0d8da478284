//! Fixed authorization parameters
//!
//! These values are part of the request shape the provider expects from
//! command-line clients and never change between runs.

/// Opaque anti-forgery value sent as `state` on the authorization URL.
pub const STATE_TOKEN: &str = "state-token";

/// `access_type` value asking the provider for a refresh token.
pub const ACCESS_TYPE_OFFLINE: &str = "offline";

/// Grant type used when trading an authorization code for a token.
pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";

/// Tokens are treated as expired this many seconds before their stated expiry
/// so a token is never handed out moments before it stops working.
pub const EXPIRY_SKEW_SECS: i64 = 10;

/// Default port for the local callback listener.
pub const DEFAULT_CALLBACK_PORT: &str = "8080";

/// Body returned to the browser once the code has been captured.
pub fn callback_response_body(code: &str) -> String {
    format!("Received code: {code}\r\nYou can now safely close this browser window.")
}
