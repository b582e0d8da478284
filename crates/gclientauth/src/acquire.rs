//! Capturing the authorization code
//!
//! Two strategies, chosen strictly by credential kind:
//! - `ManualAcquirer` (installed clients): show the consent URL, then read the
//!   code the user pastes on standard input.
//! - `LocalServerAcquirer` (web clients): bind a one-shot HTTP listener on the
//!   redirect URL's host, open the consent URL, and wait for the provider to
//!   redirect the browser back with `?code=...`.
//!
//! Neither strategy has a timeout. Both block until the user acts; the
//! process has to be killed to abort.

use std::collections::HashMap;
use std::future::Future;
use std::io::{BufRead, Write};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::browser::{BrowserOpener, present_url};
use crate::constants::callback_response_body;
use crate::credentials::OAuthConfig;
use crate::error::{Error, Result};

/// Produces an authorization code for a consent URL.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Box<dyn CodeAcquirer>`).
pub trait CodeAcquirer: Send + Sync {
    fn acquire_code<'a>(
        &'a self,
        auth_url: &'a str,
        config: &'a OAuthConfig,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

/// Line-oriented source the manual strategy reads the code from.
pub type CodeInput = Arc<Mutex<Box<dyn BufRead + Send>>>;

/// Wrap the process's standard input as a [`CodeInput`].
pub fn stdin_input() -> CodeInput {
    Arc::new(Mutex::new(Box::new(std::io::BufReader::new(std::io::stdin()))))
}

/// Copy-paste strategy for installed clients.
pub struct ManualAcquirer {
    browser: bool,
    opener: Arc<dyn BrowserOpener>,
    input: CodeInput,
}

impl ManualAcquirer {
    pub fn new(browser: bool, opener: Arc<dyn BrowserOpener>, input: CodeInput) -> Self {
        Self {
            browser,
            opener,
            input,
        }
    }
}

impl CodeAcquirer for ManualAcquirer {
    fn acquire_code<'a>(
        &'a self,
        auth_url: &'a str,
        _config: &'a OAuthConfig,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            present_url(self.opener.as_ref(), auth_url, self.browser);
            eprint!("Enter code: ");
            let _ = std::io::stderr().flush();

            let input = self.input.clone();
            tokio::task::spawn_blocking(move || read_code(&input))
                .await
                .map_err(|e| Error::exchange("", format!("code reader task failed: {e}")))?
        })
    }
}

/// Read one line and strip surrounding whitespace. End of input yields an
/// empty code, which the exchange rejects.
fn read_code(input: &CodeInput) -> Result<String> {
    let mut reader = input
        .lock()
        .map_err(|_| Error::exchange("", "code input is poisoned"))?;
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .map_err(|e| Error::exchange("", format!("reading code from input: {e}")))?;
    Ok(line.trim().to_owned())
}

/// Redirect-capture strategy for web clients.
pub struct LocalServerAcquirer {
    port: String,
    opener: Arc<dyn BrowserOpener>,
}

impl LocalServerAcquirer {
    pub fn new(port: impl Into<String>, opener: Arc<dyn BrowserOpener>) -> Self {
        Self {
            port: port.into(),
            opener,
        }
    }
}

impl CodeAcquirer for LocalServerAcquirer {
    fn acquire_code<'a>(
        &'a self,
        auth_url: &'a str,
        config: &'a OAuthConfig,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let host = redirect_host(&config.redirect_url)?;
            let server = CallbackServer::bind(&host, &self.port).await?;

            if present_url(self.opener.as_ref(), auth_url, true) {
                eprintln!(
                    "Your browser has been opened to an authorization URL. \
                     This program will resume once authorization has been provided.\n\n{auth_url}"
                );
            }

            server.wait_for_code().await
        })
    }
}

/// Hostname part of the redirect URL, without IPv6 brackets.
fn redirect_host(redirect_url: &str) -> Result<String> {
    let url = Url::parse(redirect_url).map_err(|e| {
        Error::Listen(format!(
            "unable to determine the hostname from {redirect_url}: {e}"
        ))
    })?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::Listen(format!("redirect URL {redirect_url} has no host")))?;
    Ok(host.trim_start_matches('[').trim_end_matches(']').to_owned())
}

/// Single-use senders shared with the request handler. Taken by the first
/// request; later requests find `None`.
struct Handoff {
    code: oneshot::Sender<String>,
    shutdown: oneshot::Sender<()>,
}

#[derive(Clone)]
struct CallbackState {
    handoff: Arc<Mutex<Option<Handoff>>>,
}

fn callback_router(state: CallbackState) -> Router {
    Router::new().fallback(handle_callback).with_state(state)
}

/// Accept the redirect on any path and hand the `code` parameter over.
async fn handle_callback(
    State(state): State<CallbackState>,
    RawQuery(query): RawQuery,
) -> Response {
    let params: HashMap<String, String> = query
        .as_deref()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    if let Some(err) = params.get("error") {
        warn!(error = %err, "authorization server redirected with an error");
    }
    let code = params.get("code").cloned().unwrap_or_default();

    let handoff = state
        .handoff
        .lock()
        .ok()
        .and_then(|mut slot| slot.take());
    let Some(handoff) = handoff else {
        return (StatusCode::GONE, "Authorization code already received.").into_response();
    };

    // Receiver gone means the flow was dropped; nothing is waiting anymore.
    let _ = handoff.code.send(code.clone());
    let _ = handoff.shutdown.send(());
    info!("authorization code received on callback listener");

    ([(CONTENT_TYPE, "text/plain")], callback_response_body(&code)).into_response()
}

/// How long the listener may keep serving in-flight connections after the
/// code has been delivered.
pub const CALLBACK_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// One-shot HTTP listener for the provider's redirect.
///
/// Serves exactly one code delivery, then stops accepting connections and
/// releases the port.
pub struct CallbackServer {
    addr: SocketAddr,
    code_rx: oneshot::Receiver<String>,
    task: JoinHandle<()>,
}

impl CallbackServer {
    /// Bind `host:port` and start serving in the background.
    ///
    /// Bind failures (port in use, unresolvable host, bad port string) are
    /// reported here, before anything blocks.
    pub async fn bind(host: &str, port: &str) -> Result<Self> {
        let port: u16 = port
            .parse()
            .map_err(|e| Error::Listen(format!("invalid port {port:?}: {e}")))?;
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| Error::Listen(format!("unable to listen on {host}:{port}: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| Error::Listen(format!("reading bound address: {e}")))?;

        let (code_tx, code_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = callback_router(CallbackState {
            handoff: Arc::new(Mutex::new(Some(Handoff {
                code: code_tx,
                shutdown: shutdown_tx,
            }))),
        });

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "callback listener failed");
            }
        });

        debug!(%addr, "callback listener ready");
        Ok(Self {
            addr,
            code_rx,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Block until the redirect arrives, then wait for the listener to close.
    ///
    /// Connections still open at that point get [`CALLBACK_DRAIN_TIMEOUT`] to
    /// finish before the listener task is aborted; the code is returned
    /// either way.
    pub async fn wait_for_code(mut self) -> Result<String> {
        let code = (&mut self.code_rx)
            .await
            .map_err(|_| Error::exchange("", "callback listener stopped before a code arrived"))?;
        match tokio::time::timeout(CALLBACK_DRAIN_TIMEOUT, &mut self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "callback listener task did not shut down cleanly"),
            Err(_) => {
                warn!(
                    addr = %self.addr,
                    "callback listener still draining connections, aborting it"
                );
                self.task.abort();
            }
        }
        debug!(addr = %self.addr, "callback listener closed");
        Ok(code)
    }
}
