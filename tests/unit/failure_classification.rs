//! Unit tests for catalog failure classification

use media_ingest::catalog::failure::{classify_diagnostics, tail_lines};
use media_ingest::catalog::FailureKind;

#[test]
fn test_throttling_is_quota_related() {
    for text in [
        "ERROR: unable to download webpage: HTTP Error 429: Too Many Requests",
        "Sign in to confirm you're not a bot",
    ] {
        let kind = classify_diagnostics(text);
        assert_eq!(kind, FailureKind::RateLimited, "{text}");
        assert!(kind.is_quota_related());
        assert!(kind.is_retryable());
    }
}

#[test]
fn test_proxy_failures() {
    let kind = classify_diagnostics(
        "ERROR: Unable to download API page: ProxyError('Unable to connect to proxy')",
    );
    assert_eq!(kind, FailureKind::ProxyFailure);
    assert!(kind.is_retryable());
    assert!(!kind.is_quota_related());
}

#[test]
fn test_network_failures() {
    assert_eq!(
        classify_diagnostics("<urlopen error [Errno -3] Temporary failure in name resolution>"),
        FailureKind::Offline
    );
    assert_eq!(
        classify_diagnostics("ERROR: The read operation timed out"),
        FailureKind::Timeout
    );
}

#[test]
fn test_unavailable_items_are_not_retried() {
    for text in [
        "ERROR: [youtube] abc123: Video unavailable",
        "ERROR: [youtube] abc123: Private video. Sign in if you've been granted access",
    ] {
        let kind = classify_diagnostics(text);
        assert_eq!(kind, FailureKind::Unavailable, "{text}");
        assert!(!kind.is_retryable());
    }
}

#[test]
fn test_disk_problems_are_local() {
    let kind = classify_diagnostics("ERROR: unable to write data: [Errno 28] No space left on device");
    assert_eq!(kind, FailureKind::Storage);
    assert!(!kind.is_retryable());
}

#[test]
fn test_unknown_diagnostics_are_generic() {
    assert_eq!(classify_diagnostics("something odd happened"), FailureKind::Generic);
    assert_eq!(classify_diagnostics(""), FailureKind::Generic);
}

#[test]
fn test_tail_lines_keeps_the_end() {
    let text = "line one\n\nline two\nline three\n";
    assert_eq!(tail_lines(text, 2), "line two | line three");
    assert_eq!(tail_lines(text, 10), "line one | line two | line three");
}
