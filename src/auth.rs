//! OAuth2 authentication for the Gmail API

use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use std::path::Path;

use crate::error::{CleanerError, Result};

/// Scopes required for the scan/mutate pipeline
///
/// - gmail.modify: read metadata, trash, archive, send
/// - gmail.labels: label management
/// - mail.google.com: permanent batch delete (not covered by gmail.modify)
pub const REQUIRED_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.labels",
    "https://mail.google.com/",
];

/// Connector type used by both the hub and the authenticator
pub type GmailConnector =
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>;

/// Type alias for the Gmail hub to simplify signatures
pub type GmailHub = Gmail<GmailConnector>;

/// Authenticator handle, kept around for forced token refresh on 401
pub type GmailAuthenticator = yup_oauth2::authenticator::Authenticator<GmailConnector>;

/// Authenticate and build the Gmail hub
///
/// With `interactive` set, a missing or expired token opens the browser
/// consent flow. Without it, a missing token cache fails fast with an auth
/// error so background invocations never block on user input.
///
/// Returns the hub plus the authenticator; the client holds onto the
/// authenticator to force a refresh when a call comes back 401.
pub async fn authenticate(
    credentials_path: &Path,
    token_cache_path: &Path,
    interactive: bool,
) -> Result<(GmailHub, GmailAuthenticator)> {
    if !interactive && !token_cache_path.exists() {
        return Err(CleanerError::AuthError(format!(
            "No cached token at {:?}; run the auth command first",
            token_cache_path
        )));
    }

    let secret = yup_oauth2::read_application_secret(credentials_path)
        .await
        .map_err(|e| CleanerError::AuthError(format!("Failed to read credentials: {}", e)))?;

    // HTTPRedirect opens a browser for user authorization
    let auth = yup_oauth2::InstalledFlowAuthenticator::builder(
        secret,
        yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
    )
    .persist_tokens_to_disk(token_cache_path)
    .build()
    .await
    .map_err(|e| CleanerError::AuthError(format!("Failed to build authenticator: {}", e)))?;

    // Pre-authenticate so the token is cached with the right scopes before
    // any concurrent API use
    auth.token(REQUIRED_SCOPES)
        .await
        .map_err(|e| CleanerError::AuthError(format!("Failed to obtain token: {}", e)))?;

    if token_cache_path.exists() {
        secure_token_file(token_cache_path).await?;
    }

    // HTTP/1 for compatibility with google-gmail1
    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| CleanerError::AuthError(format!("Failed to load TLS roots: {}", e)))?
                .https_or_http()
                .enable_http1()
                .build(),
        );

    Ok((Gmail::new(client, auth.clone()), auth))
}

/// Secure token file permissions on Unix systems
///
/// Sets file permissions to 0600 (read/write for owner only)
#[cfg(unix)]
pub async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

/// Secure token file on Windows (stub implementation)
///
/// Windows uses ACLs instead of Unix permissions
#[cfg(windows)]
pub async fn secure_token_file(_path: &Path) -> Result<()> {
    Ok(())
}
