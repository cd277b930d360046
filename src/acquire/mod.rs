//! Page acquisition. A `PageSource` either returns raw results-page HTML or a
//! classified failure. It never retries and never panics.

pub mod artifacts;
pub mod http;
#[cfg(test)]
pub mod fixed;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::search::SearchDefinition;
use crate::types::{DebugArtifacts, FailureReason};

pub use artifacts::ArtifactStore;
pub use http::HttpPageSource;

#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionFailure {
    pub reason: FailureReason,
    pub message: String,
    pub artifacts: DebugArtifacts,
}

impl AcquisitionFailure {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            artifacts: DebugArtifacts::default(),
        }
    }
}

pub type Acquisition = std::result::Result<String, AcquisitionFailure>;

#[async_trait]
pub trait PageSource: Send + Sync {
    /// Loads the results page for `definition` as of `today`.
    async fn fetch(&self, definition: &SearchDefinition, today: NaiveDate) -> Acquisition;
}

const CAPTCHA_MARKERS: &[&str] = &[
    "g-recaptcha",
    "recaptcha",
    "hcaptcha",
    "captcha-delivery",
    "verify you are human",
    "unusual traffic from your computer",
];

const BLOCK_MARKERS: &[&str] = &[
    "access denied",
    "you have been blocked",
    "request blocked",
    "error 1020",
];

/// Recognises interstitials served with a 200 status.
pub fn classify_page_content(html: &str) -> Option<FailureReason> {
    let lower = html.to_lowercase();
    if CAPTCHA_MARKERS.iter().any(|m| lower.contains(m)) {
        Some(FailureReason::Captcha)
    } else if BLOCK_MARKERS.iter().any(|m| lower.contains(m)) {
        Some(FailureReason::Blocked)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captcha_and_block_pages_are_recognised() {
        assert_eq!(
            classify_page_content("<div class=\"g-recaptcha\" data-sitekey=\"x\"></div>"),
            Some(FailureReason::Captcha)
        );
        assert_eq!(
            classify_page_content("<h1>Access Denied</h1>"),
            Some(FailureReason::Blocked)
        );
        assert_eq!(classify_page_content("<ul><li class=\"flight-result\">$500</li></ul>"), None);
    }
}
