//! Browser-to-HTTP session bridge.
//!
//! A browser is driven once to observe the portal's own search request
//! ([`capture`]), the observation is frozen into a [`CapturedSession`], and
//! that snapshot is turned into a pooled HTTP client ([`materialize`]).
//! [`SessionHandle`] swaps in a freshly captured session when the old one
//! expires, without touching requests still running on the old one.

pub mod capture;
pub mod chromium;
pub mod cookies;
pub mod handle;
pub mod materialize;

pub use capture::{
    BrowserDriver, BrowserObservation, CaptureError, CaptureReason, CapturedSession,
    RequestTemplate, SessionCapturer, SessionSource,
};
pub use chromium::ChromiumDriver;
pub use cookies::{CapturedCookie, load_cookies_into_jar};
pub use handle::{SessionError, SessionHandle};
pub use materialize::{ExecutionSession, MaterializeError, materialize};
