use std::io::Write as _;
use std::time::Duration;

use super::*;
use crate::cache::{Family, Freshness};

fn cache_raw(configure: impl FnOnce(&mut RawCacheSettings)) -> RawSettings {
    let mut raw = RawSettings::default();
    configure(&mut raw.cache);
    raw
}

fn invalid_key(result: Result<Settings, LoadError>) -> String {
    match result {
        Err(LoadError::Invalid { key, .. }) => key.into_owned(),
        other => panic!("expected invalid configuration, got {other:?}"),
    }
}

#[test]
fn defaults_apply_without_any_source() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert_eq!(settings.logging.format, LogFormat::Compact);
    assert!(settings.cache.enabled);
    assert!(settings.cache.redis_url.is_none());
    assert_eq!(settings.cache.scan_batch_size, DEFAULT_SCAN_BATCH_SIZE);
    assert_eq!(settings.cache.policy, TtlPolicy::default());
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());
    raw.cache.redis_url = Some("redis://file:6379".to_string());
    raw.cache.scan_batch_size = Some(50);

    let overrides = Overrides {
        log_level: Some("debug".to_string()),
        redis_url: Some("redis://cli:6379".to_string()),
        scan_batch_size: Some(500),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.cache.redis_url.as_deref(), Some("redis://cli:6379"));
    assert_eq!(settings.cache.scan_batch_size.get(), 500);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = Overrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.format, LogFormat::Json);
}

#[test]
fn blank_redis_url_means_in_process_store() {
    let raw = cache_raw(|cache| cache.redis_url = Some("  ".to_string()));
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.cache.redis_url.is_none());
}

#[test]
fn ttl_overrides_replace_policy_rows() {
    let raw = cache_raw(|cache| {
        cache
            .ttl
            .insert("products".to_string(), "5 minutes".to_string());
        cache.default_ttl = Some("2 days".to_string());
    });
    let settings = Settings::from_raw(raw).expect("valid settings");
    let policy = &settings.cache.policy;

    assert_eq!(policy.resolve(Family::Products).as_secs(), Some(300));
    assert_eq!(policy.freshness(Family::Products), Freshness::Medium);
    assert_eq!(policy.resolve(Family::Stores).as_secs(), Some(2 * 86_400));
}

#[test]
fn malformed_ttl_is_fatal_and_names_the_family() {
    let raw = cache_raw(|cache| {
        cache
            .ttl
            .insert("product".to_string(), "ten minutes".to_string());
    });
    assert_eq!(invalid_key(Settings::from_raw(raw)), "cache.ttl.product");
}

#[test]
fn never_and_unknown_families_cannot_be_overridden() {
    let raw = cache_raw(|cache| {
        cache.ttl.insert("cart".to_string(), "1 hour".to_string());
    });
    assert_eq!(invalid_key(Settings::from_raw(raw)), "cache.ttl.cart");

    let raw = cache_raw(|cache| {
        cache.ttl.insert("widgets".to_string(), "1 hour".to_string());
    });
    assert_eq!(invalid_key(Settings::from_raw(raw)), "cache.ttl.widgets");
}

#[test]
fn zero_values_are_rejected() {
    let raw = cache_raw(|cache| cache.scan_batch_size = Some(0));
    assert_eq!(invalid_key(Settings::from_raw(raw)), "cache.scan_batch_size");

    let raw = cache_raw(|cache| cache.operation_timeout_ms = Some(0));
    assert_eq!(
        invalid_key(Settings::from_raw(raw)),
        "cache.operation_timeout_ms"
    );

    let raw = cache_raw(|cache| cache.default_ttl = Some("0 seconds".to_string()));
    assert_eq!(invalid_key(Settings::from_raw(raw)), "cache.default_ttl");
}

#[test]
fn invalid_log_level_is_rejected() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());
    assert_eq!(invalid_key(Settings::from_raw(raw)), "logging.level");
}

#[test]
fn load_reads_the_given_config_file() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create config file");
    writeln!(
        file,
        "[cache]\nenabled = false\nscan_batch_size = 25\n\n[cache.ttl]\nreviews = \"1 hour\""
    )
    .expect("write config file");

    let args = CliArgs::parse_from([
        "storefront",
        "--config-file",
        file.path().to_str().expect("utf-8 path"),
        "policy",
    ]);
    let settings = load(&args).expect("valid settings");

    assert!(!settings.cache.enabled);
    assert_eq!(settings.cache.scan_batch_size.get(), 25);
    assert_eq!(
        settings.cache.policy.resolve(Family::Reviews).as_secs(),
        Some(3600)
    );
}

#[test]
fn load_accepts_every_cache_key() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create config file");
    writeln!(
        file,
        r#"[cache]
enabled = true
redis_url = "redis://127.0.0.1:6379"
scan_batch_size = 100
operation_timeout_ms = 250
connect_timeout_ms = 1500
default_ttl = "2 days"

[cache.ttl]
products = "5 minutes"
reviews = "1 hour""#
    )
    .expect("write config file");

    let args = CliArgs::parse_from([
        "storefront",
        "--config-file",
        file.path().to_str().expect("utf-8 path"),
    ]);
    let settings = load(&args).expect("valid settings");
    let cache = &settings.cache;

    assert_eq!(cache.redis_url.as_deref(), Some("redis://127.0.0.1:6379"));
    assert_eq!(cache.operation_timeout, Duration::from_millis(250));
    assert_eq!(cache.connect_timeout, Duration::from_millis(1500));
    assert_eq!(cache.policy.resolve(Family::Stores).as_secs(), Some(2 * 86_400));
    assert_eq!(cache.policy.resolve(Family::Products).as_secs(), Some(300));
    assert_eq!(cache.policy.resolve(Family::Reviews).as_secs(), Some(3600));
}

#[test]
fn default_to_policy_command() {
    let args = CliArgs::parse_from(["storefront"]);
    assert_eq!(args.command.unwrap_or(Command::Policy), Command::Policy);
}

#[test]
fn parse_flush_arguments() {
    let args = CliArgs::parse_from(["storefront", "flush"]);
    assert_eq!(
        args.command,
        Some(Command::Flush(FlushArgs {
            pattern: "*".to_string()
        }))
    );

    let args = CliArgs::parse_from([
        "storefront",
        "flush",
        "--pattern",
        "product:*",
        "--redis-url",
        "redis://cache:6379",
    ]);
    assert_eq!(
        args.command,
        Some(Command::Flush(FlushArgs {
            pattern: "product:*".to_string()
        }))
    );
    assert_eq!(
        args.overrides.redis_url.as_deref(),
        Some("redis://cache:6379")
    );
}

#[test]
fn parse_duration_arguments() {
    let args = CliArgs::parse_from(["storefront", "parse-duration", "30 minutes"]);
    assert_eq!(
        args.command,
        Some(Command::ParseDuration(ParseDurationArgs {
            text: "30 minutes".to_string()
        }))
    );
}

#[test]
fn parse_global_overrides_before_command() {
    let args = CliArgs::parse_from([
        "storefront",
        "--log-level",
        "warn",
        "--log-json",
        "true",
        "--scan-batch-size",
        "10",
        "mutations",
    ]);
    assert_eq!(args.command, Some(Command::Mutations));
    assert_eq!(args.overrides.log_level.as_deref(), Some("warn"));
    assert_eq!(args.overrides.log_json, Some(true));
    assert_eq!(args.overrides.scan_batch_size, Some(10));
}
