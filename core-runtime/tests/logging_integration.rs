//! Integration tests for logging system

use bridge_traits::logging::LogLevel;
use core_runtime::logging::{
    redact_if_sensitive, redact_url, strip_path, LogFormat, LoggingConfig,
};

#[test]
fn test_logging_config_defaults() {
    let config = LoggingConfig::default();

    assert_eq!(config.level, LogLevel::Info);
    assert!(config.filter.is_none());
    assert!(config.logger_sink.is_none());
    assert!(config.display_target);
    assert!(!config.display_thread_info);
}

#[test]
fn test_credential_fields_are_redacted() {
    assert_eq!(redact_if_sensitive("access_token", "abc"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("x_amz_signature", "abc"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("api_key", "abc"), "[REDACTED]");
}

#[test]
fn test_presigned_urls_lose_their_query() {
    let url = "https://bucket.s3.amazonaws.com/ambisonic/forest.wav?X-Amz-Credential=AKIA&X-Amz-Signature=deadbeef";

    let redacted = redact_if_sensitive("url", url);
    assert_eq!(
        redacted,
        "https://bucket.s3.amazonaws.com/ambisonic/forest.wav?[REDACTED]"
    );
    assert!(!redacted.contains("AKIA"));
    assert_eq!(redact_url(url), redacted);
}

#[test]
fn test_plain_values_pass_through() {
    assert_eq!(redact_if_sensitive("start", "2048"), "2048");
    assert_eq!(redact_if_sensitive("stream", "forest"), "forest");
    assert_eq!(
        redact_if_sensitive("url", "https://cdn.example.com/forest.wav"),
        "https://cdn.example.com/forest.wav"
    );
}

#[test]
fn test_path_stripping() {
    assert_eq!(strip_path("/data/wavstream/stream_cache/forest.wav"), "forest.wav");
    assert_eq!(strip_path("C:\\cache\\forest.wav"), "forest.wav");
    assert_eq!(strip_path("forest.wav"), "forest.wav");
    assert_eq!(strip_path(""), "");
}

#[test]
fn test_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_filter("core_playback=trace,bridge_desktop=debug")
        .with_spans(false)
        .with_target(false)
        .with_thread_info(true);

    assert_eq!(config.format, LogFormat::Compact);
    assert_eq!(config.level, LogLevel::Warn);
    assert_eq!(
        config.filter,
        Some("core_playback=trace,bridge_desktop=debug".to_string())
    );
    assert!(!config.enable_spans);
    assert!(!config.display_target);
    assert!(config.display_thread_info);
}
