//! Connectivity diagnostics behind "Test Connection".
//!
//! Nothing here returns an error: every outcome, including timeouts and
//! transport failures, is a `ConnectionReport` whose `Display` is the
//! message shown to the user.

use crate::remote::{RemoteClient, RemoteError};
use reqwest::Url;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// How long the probe query may take before it is reported as timed out.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Host suffix of hosted deployments.
pub const EXPECTED_DOMAIN_SUFFIX: &str = ".convex.cloud";

/// Prefix shared by every failed probe message.
pub const FAILURE_MARKER: &str = "Connection Failed";

/// Result of checking a URL's shape, before any network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlCheck {
    /// Nothing configured
    Missing,
    /// Unusable: no `https://` scheme or doesn't parse
    Malformed(String),
    /// Usable but probably not a deployment URL
    Suspicious(String),
    Plausible,
}

impl UrlCheck {
    pub fn of(url: &str) -> Self {
        let url = url.trim();
        if url.is_empty() {
            return UrlCheck::Missing;
        }
        if !url.starts_with("https://") {
            return UrlCheck::Malformed("URL must start with 'https://'".to_string());
        }
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => return UrlCheck::Malformed(format!("URL could not be parsed ({e})")),
        };
        match parsed.host_str() {
            Some(host) if host.ends_with(EXPECTED_DOMAIN_SUFFIX) => UrlCheck::Plausible,
            _ => UrlCheck::Suspicious(format!(
                "URL usually ends in '{EXPECTED_DOMAIN_SUFFIX}'. Did you paste just the project name?"
            )),
        }
    }
}

/// Outcome of a connectivity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionReport {
    /// No URL, or no client could be built from it
    NotInitialized,
    /// URL rejected before any network call
    InvalidUrl(String),
    /// URL doesn't look like a deployment; nothing was probed
    Warning(String),
    /// Probe succeeded with this many live records
    Connected { count: usize },
    /// Probe didn't answer within the timeout
    TimedOut(Duration),
    /// Probe failed with the given cause
    Failed(String),
}

impl ConnectionReport {
    pub fn is_success(&self) -> bool {
        matches!(self, ConnectionReport::Connected { .. })
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, ConnectionReport::Warning(_))
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success() && !self.is_warning()
    }

    /// Record count, when the probe succeeded.
    pub fn count(&self) -> Option<usize> {
        match self {
            ConnectionReport::Connected { count } => Some(*count),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionReport::NotInitialized => {
                write!(f, "Remote client not initialized (Check URL)")
            }
            ConnectionReport::InvalidUrl(reason) => write!(f, "Error: {reason}"),
            ConnectionReport::Warning(warning) => write!(f, "Warning: {warning}"),
            ConnectionReport::Connected { count } => {
                write!(f, "Connection Successful! Found {count} documents.")
            }
            ConnectionReport::TimedOut(after) => {
                write!(f, "{FAILURE_MARKER}: {}", RemoteError::Timeout(*after))
            }
            ConnectionReport::Failed(cause) => write!(f, "{FAILURE_MARKER}: {cause}"),
        }
    }
}

/// Race a list query against `timeout`.
///
/// The losing query is dropped, not awaited.
pub async fn probe(client: &dyn RemoteClient, timeout: Duration) -> ConnectionReport {
    match tokio::time::timeout(timeout, client.list_documents()).await {
        Ok(Ok(records)) => {
            debug!("Probe found {} documents", records.len());
            ConnectionReport::Connected {
                count: records.len(),
            }
        }
        Ok(Err(e)) => {
            warn!("Connection check failed: {}", e);
            ConnectionReport::Failed(e.to_string())
        }
        Err(_) => {
            warn!("Connection check timed out after {:?}", timeout);
            ConnectionReport::TimedOut(timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_check_shapes() {
        assert_eq!(UrlCheck::of(""), UrlCheck::Missing);
        assert_eq!(UrlCheck::of("   "), UrlCheck::Missing);
        assert!(matches!(UrlCheck::of("ftp://x"), UrlCheck::Malformed(_)));
        assert!(matches!(UrlCheck::of("happy-otter-123"), UrlCheck::Malformed(_)));
        assert!(matches!(UrlCheck::of("https://"), UrlCheck::Malformed(_)));
        assert_eq!(
            UrlCheck::of("http://happy-otter-123.convex.cloud"),
            UrlCheck::Malformed("URL must start with 'https://'".into())
        );
        assert!(matches!(UrlCheck::of("https://example.com"), UrlCheck::Suspicious(_)));
        assert_eq!(UrlCheck::of("https://happy-otter-123.convex.cloud"), UrlCheck::Plausible);
    }

    #[test]
    fn test_report_messages() {
        assert_eq!(
            ConnectionReport::Connected { count: 3 }.to_string(),
            "Connection Successful! Found 3 documents."
        );
        let UrlCheck::Suspicious(warning) = UrlCheck::of("https://happy-otter-123") else {
            panic!("Expected a suspicious URL");
        };
        assert_eq!(
            ConnectionReport::Warning(warning).to_string(),
            "Warning: URL usually ends in '.convex.cloud'. Did you paste just the project name?"
        );
        assert_eq!(
            ConnectionReport::TimedOut(PROBE_TIMEOUT).to_string(),
            "Connection Failed: Connection timed out (5s)"
        );
        assert!(ConnectionReport::Failed("x".into()).to_string().starts_with(FAILURE_MARKER));
        assert!(
            ConnectionReport::InvalidUrl("URL must start with 'https://'".into())
                .to_string()
                .starts_with("Error:")
        );
    }

    #[test]
    fn test_only_connected_is_success() {
        assert!(ConnectionReport::Connected { count: 0 }.is_success());
        let warning = ConnectionReport::Warning("w".into());
        assert!(!warning.is_success());
        assert!(!warning.is_failure());
        assert!(ConnectionReport::NotInitialized.is_failure());
        assert!(ConnectionReport::InvalidUrl("x".into()).is_failure());
        assert!(ConnectionReport::TimedOut(PROBE_TIMEOUT).is_failure());
        assert_eq!(ConnectionReport::Failed("x".into()).count(), None);
    }
}
