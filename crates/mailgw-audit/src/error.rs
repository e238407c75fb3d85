// error.rs — Error types for the harvester.
//
// Uses `thiserror` to derive the standard Rust `Error` trait automatically.
// Each variant maps to a specific failure mode in the fetch pipeline.
// Failures inside one target's session abort only that target for the
// current cycle; the next scheduled cycle is the retry mechanism.

use thiserror::Error;

/// Errors that can occur while harvesting audit logs.
#[derive(Debug, Error)]
pub enum Error {
    /// The HTTP call itself failed: connect error, TLS error, or timeout.
    #[error("request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The appliance answered with a status other than 200.
    #[error("unexpected status from appliance: {status}")]
    NonSuccessStatus { status: String },

    /// The login step failed (transport or reply decode).
    #[error("login failed: {reason}")]
    AuthFailed { reason: String },

    /// One of the session steps after login failed.
    #[error("session step '{step}' failed: {reason}")]
    ProtocolFailed { step: &'static str, reason: String },

    /// A record could not be serialized for fingerprinting.
    #[error("fingerprint computation failed: {0}")]
    FingerprintFailed(#[from] serde_json::Error),

    /// The computed digest is too short to trust as a dedup identity.
    #[error("degenerate fingerprint '{digest}'")]
    DegenerateFingerprint { digest: String },
}
