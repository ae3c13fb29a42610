use std::{num::NonZeroU64, process};

use storefront::{
    application::error::AppError,
    cache::{ACCEPTED_STALENESS, CacheKey, Mutation, TtlPolicy, parse_duration},
    config::{self, Command, FlushArgs, ParseDurationArgs},
    infra::{cache::CacheRuntime, error::InfraError, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;
use uuid::Uuid;

const HEALTH_CHECK_TTL: NonZeroU64 = NonZeroU64::new(30).unwrap();

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(InfraError::from)?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match cli_args.command.unwrap_or(Command::Policy) {
        Command::Policy => {
            print_policy(&settings.cache.policy);
            Ok(())
        }
        Command::Check => run_check(&settings).await,
        Command::Flush(args) => run_flush(&settings, args).await,
        Command::ParseDuration(args) => run_parse_duration(args),
        Command::Mutations => {
            print_mutations(&settings.cache.policy);
            Ok(())
        }
    }
}

fn print_policy(policy: &TtlPolicy) {
    println!(
        "{:<16} {:<11} {:<10} {:<48} PATTERN",
        "FAMILY", "FRESHNESS", "TTL", "SAMPLE KEY"
    );
    for entry in policy.entries() {
        println!(
            "{:<16} {:<11} {:<10} {:<48} {}",
            entry.family.name(),
            entry.freshness.to_string(),
            entry.ttl.to_string(),
            CacheKey::sample(entry.family).to_string(),
            entry.pattern
        );
    }
}

fn print_mutations(policy: &TtlPolicy) {
    for mutation in Mutation::samples() {
        let writes: Vec<&str> = mutation.writes().iter().map(|r| r.as_str()).collect();
        let targets: Vec<String> = mutation
            .invalidations()
            .iter()
            .map(ToString::to_string)
            .collect();
        println!("{}", mutation.kind());
        println!("  writes:      {}", writes.join(", "));
        println!(
            "  invalidates: {}",
            if targets.is_empty() {
                "-".to_string()
            } else {
                targets.join(", ")
            }
        );

        let stale = mutation.uncovered_families(policy);
        if !stale.is_empty() {
            let names: Vec<&str> = stale.iter().map(|family| family.name()).collect();
            println!("  ages out:    {}", names.join(", "));
        }
    }

    println!();
    println!("Accepted staleness:");
    for (kind, family, reason) in ACCEPTED_STALENESS {
        println!("  {kind} -> {family}: {reason}");
    }
}

async fn run_check(settings: &config::Settings) -> Result<(), AppError> {
    let runtime = CacheRuntime::connect(&settings.cache).await?;
    let store = runtime.store();
    let key = format!("storefront_health:{}", Uuid::new_v4());
    let value = "\"ok\"";

    store
        .set(&key, value, HEALTH_CHECK_TTL)
        .await
        .map_err(InfraError::from)?;
    let read = store.get(&key).await.map_err(InfraError::from)?;
    store.delete(&key).await.map_err(InfraError::from)?;
    runtime.shutdown().await?;

    // The no-op store drops writes by definition.
    if read.as_deref() != Some(value) && store.backend() != "noop" {
        return Err(AppError::unexpected(format!(
            "health-check key `{key}` did not round-trip through the {} store",
            store.backend()
        )));
    }

    info!(backend = store.backend(), "Cache store check passed");
    println!("ok ({})", store.backend());
    Ok(())
}

async fn run_flush(settings: &config::Settings, args: FlushArgs) -> Result<(), AppError> {
    let runtime = CacheRuntime::connect(&settings.cache).await?;
    let deleted = runtime
        .invalidator()
        .delete_matching(&args.pattern)
        .await
        .map_err(InfraError::from);
    runtime.shutdown().await?;

    println!("{}", deleted?);
    Ok(())
}

fn run_parse_duration(args: ParseDurationArgs) -> Result<(), AppError> {
    let seconds = parse_duration(&args.text).map_err(|err| AppError::validation(err.to_string()))?;
    println!("{seconds}");
    Ok(())
}
