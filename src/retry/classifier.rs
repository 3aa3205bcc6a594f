/// How a failed hosted-API call should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Server-side fault (HTTP 500).
    ServerFault,
    /// Overload, unavailability or a dropped connection.
    Overload,
    /// Missing or under-entitled API key; recoverable by picking another key.
    Auth,
    Terminal,
}

/// Maps a provider error message to a [`FailureClass`].
///
/// The hosted API does not guarantee structured error codes, so adapters work
/// on the rendered error string. Anything unrecognised must be `Terminal`.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, message: &str) -> FailureClass;
}

/// Case-insensitive substring matching on the rendered error.
///
/// Checks run server fault, then overload, then auth. A message mentioning
/// "403" for an unrelated reason is still classified as an auth fault.
#[derive(Debug, Clone, Default)]
pub struct SubstringClassifier;

const SERVER_FAULT_MARKERS: &[&str] = &["500", "internal server error"];

const OVERLOAD_MARKERS: &[&str] = &["503", "unavailable", "overloaded", "fetch failed"];

const AUTH_MARKERS: &[&str] = &[
    "404",
    "requested entity was not found",
    "403",
    "permission denied",
    "permission",
];

impl ErrorClassifier for SubstringClassifier {
    fn classify(&self, message: &str) -> FailureClass {
        let msg = message.to_lowercase();
        let contains_any = |markers: &[&str]| markers.iter().any(|m| msg.contains(m));

        if contains_any(SERVER_FAULT_MARKERS) {
            return FailureClass::ServerFault;
        }
        if contains_any(OVERLOAD_MARKERS) {
            return FailureClass::Overload;
        }
        let bad_key = msg.contains("400") && (msg.contains("api key") || msg.contains("api_key_invalid"));
        if contains_any(AUTH_MARKERS) || bad_key {
            return FailureClass::Auth;
        }
        FailureClass::Terminal
    }
}
