// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod line;

use honey::{Config, Honey, OutputRegistry};
use std::{env, io, process, sync::Arc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
pub async fn main() {
    let log_level = env::var("HONEY_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    // Diagnostics go to stderr; stdout carries the host's own lines.
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
    }

    debug!("Logging subsystem enabled");

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration: {e}");
            process::exit(1);
        }
    };

    let honey = match Honey::init(config, &OutputRegistry::default()) {
        Ok(h) => Arc::new(h),
        Err(e) => {
            error!("Unable to initialize pipeline: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = honey.start().await {
        error!("Unable to start pipeline: {e}");
        honey.stop().await;
        process::exit(1);
    }

    let mut reader = tokio::spawn(forward_lines(Arc::clone(&honey)));

    tokio::select! {
        result = &mut reader => match result {
            Ok(Ok(lines)) => info!("Input closed after {lines} lines, shutting down"),
            Ok(Err(e)) => error!("Failed to read input: {e}"),
            Err(e) => error!("Input task failed: {e}"),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            reader.abort();
        }
    }

    honey.stop().await;
    let stats = honey.stats();
    info!(
        "Accepted {} records, dropped {}, sealed {} batches",
        stats.rotator.accepted, stats.rotator.dropped, stats.rotator.batches
    );
}

/// Feeds stdin lines into the pipeline. Lines the pipeline does not claim
/// are echoed to stdout unchanged.
async fn forward_lines(honey: Arc<Honey>) -> io::Result<u64> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut count = 0;

    while let Some(text) = lines.next_line().await? {
        count += 1;
        let suppressed = !text.trim().is_empty() && honey.on_record(line::parse_line(&text));
        if !suppressed {
            stdout.write_all(text.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }

    Ok(count)
}
