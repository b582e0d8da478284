//! On-disk token cache
//!
//! The cache is a single JSON-serialized [`Token`] at a caller-chosen path.
//! Reading is forgiving: a missing, unreadable or corrupt file simply means
//! there is no cached token and the caller re-authorizes. Writing is
//! best-effort: a failure comes back as a [`CacheWarning`] because the token
//! is already usable in memory.
//!
//! There is no locking. Two processes sharing a cache path race, and the
//! last writer wins.

use std::path::Path;

use tracing::{debug, warn};

use crate::error::CacheWarning;
use crate::token::Token;

/// Load the cached token, if any.
pub async fn load(path: &Path) -> Option<Token> {
    let contents = match tokio::fs::read(path).await {
        Ok(contents) => contents,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no cached token");
            return None;
        }
    };

    match serde_json::from_slice::<Token>(&contents) {
        Ok(token) => Some(token),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "ignoring unparseable token cache");
            None
        }
    }
}

/// Whether a possibly-missing token can be used as is.
///
/// Only a token that loaded successfully is ever inspected.
pub fn is_valid(token: Option<&Token>) -> bool {
    token.is_some_and(Token::is_valid)
}

/// Persist a token, replacing any previous cache contents.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target, so a crash mid-write never leaves a truncated cache. The file
/// holds bearer credentials and is created owner read/write only (unix).
pub async fn save(path: &Path, token: &Token) -> Result<(), CacheWarning> {
    let json = serde_json::to_vec(token)
        .map_err(|e| CacheWarning(format!("encoding token: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| CacheWarning("cache path has no parent directory".into()))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| CacheWarning("cache path has no file name".into()))?
        .to_string_lossy();
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, &json)
        .await
        .map_err(|e| CacheWarning(format!("writing {}: {e}", tmp_path.display())))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        if let Err(e) = tokio::fs::set_permissions(&tmp_path, perms).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(CacheWarning(format!("setting cache file permissions: {e}")));
        }
    }

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(CacheWarning(format!("replacing {}: {e}", path.display())));
    }

    debug!(path = %path.display(), "cached token");
    Ok(())
}

/// [`save`], reporting any failure through the log instead of to the caller.
pub(crate) async fn save_or_warn(path: &Path, token: &Token) -> Option<CacheWarning> {
    match save(path, token).await {
        Ok(()) => None,
        Err(warning) => {
            warn!(path = %path.display(), %warning, "token not cached");
            Some(warning)
        }
    }
}
