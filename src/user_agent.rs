//! User-Agent strings used when the captured session does not carry one.

/// Browser User-Agent replayed when the observed request had none.
///
/// The portal serves its XHR API to browsers only; a tool identifier gets
/// the interstitial page instead of JSON.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Identifier written into run manifests.
#[must_use]
pub fn tool_identifier() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("patent-downloader/{version}")
}
