//! Opening the user's browser
//!
//! Best-effort only. When the platform has no default URL handler, or the
//! handler fails to launch, the caller prints the URL instead.

use std::io;

use tracing::{debug, info};

/// Why the browser could not be opened.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("cannot open URL on this platform")]
    Unsupported,

    #[error("failed to open browser: {0}")]
    Failed(String),
}

impl From<io::Error> for OpenError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::Unsupported => OpenError::Unsupported,
            _ => OpenError::Failed(err.to_string()),
        }
    }
}

/// Capability to show a URL to the user in a browser.
pub trait BrowserOpener: Send + Sync {
    fn try_open(&self, url: &str) -> Result<(), OpenError>;
}

/// Opens URLs with the operating system's default handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    fn try_open(&self, url: &str) -> Result<(), OpenError> {
        open::that(url)?;
        Ok(())
    }
}

/// Point the user at `url`: open it in the browser when allowed, and print it
/// whenever that was not possible. Returns whether the browser was opened.
pub(crate) fn present_url(opener: &dyn BrowserOpener, url: &str, browser: bool) -> bool {
    if browser {
        match opener.try_open(url) {
            Ok(()) => {
                info!("browser opened to authorization URL");
                return true;
            }
            Err(e) => debug!(error = %e, "falling back to printing the authorization URL"),
        }
    }
    eprintln!("Visit the URL for the auth dialog: \n\t{url}");
    false
}
