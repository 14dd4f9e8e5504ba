//! Classification of portal responses for the retry loop.
//!
//! The portal answers both throttling and session loss with 403, so the
//! status alone is not enough: a 403 whose body or final URL carries a
//! block signature is throttling, any other 401/403 means the captured
//! session no longer authorizes requests.

use reqwest::StatusCode;

/// Body or URL fragments the portal uses on its anti-automation pages.
const BLOCK_SIGNATURES: &[&str] = &[
    "/sorry/",
    "unusual traffic",
    "automated queries",
    "captcha",
    "rate limit",
    "too many requests",
];

/// URL fragments of sign-in pages a dead session is redirected to.
const LOGIN_SIGNATURES: &[&str] = &["accounts.google.com", "/servicelogin", "/signin"];

/// How the executor should react to a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// Hand the response to the caller.
    Success,
    /// Throttled: back off exponentially.
    Blocked,
    /// Session no longer valid: re-capture, then retry once.
    SessionExpired,
    /// Server hiccup: bounded linear retry.
    Transient,
    /// Retrying will not help.
    Permanent,
}

/// Classifies a response from its status, final URL and (for failures) body.
#[must_use]
pub fn classify_response(status: StatusCode, final_url: &str, body: &str) -> ResponseClass {
    let url = final_url.to_ascii_lowercase();
    let has_block_signature = contains_any(&url, BLOCK_SIGNATURES)
        || contains_any(&body.to_ascii_lowercase(), BLOCK_SIGNATURES);

    if status.is_success() {
        if url.contains("/sorry/") {
            return ResponseClass::Blocked;
        }
        if contains_any(&url, LOGIN_SIGNATURES) {
            return ResponseClass::SessionExpired;
        }
        return ResponseClass::Success;
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => ResponseClass::Blocked,
        StatusCode::FORBIDDEN if has_block_signature => ResponseClass::Blocked,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ResponseClass::SessionExpired,
        StatusCode::SERVICE_UNAVAILABLE if has_block_signature => ResponseClass::Blocked,
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => ResponseClass::Transient,
        _ => ResponseClass::Permanent,
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}
