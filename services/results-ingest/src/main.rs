use std::{process::ExitCode, time::Duration};

use anyhow::Context;
use clap::Parser;
use report::{ResultsRecord, channel_listener};
use results_ingest::{
    POST_RESULTS_PATH, ResultsIngestor,
    config::{ServiceConfig, TransportRuntime},
    transport::{ResultsRuntime, SharedRuntime, serve_http_with_workers},
};
use tracing_subscriber::EnvFilter;

/// Accepts results posted by the HTML test runner on `/postResults`.
#[derive(Debug, Parser)]
#[command(name = "results-ingest", version)]
struct Cli {
    /// Address to listen on; overrides HTMLRUNNER_RESULTS_BIND.
    #[arg(long)]
    bind: Option<String>,

    /// Wait for the first posted run, print its summary and exit with 0 when
    /// it passed, 1 otherwise.
    #[arg(long)]
    await_results: bool,

    /// Give up waiting after this many seconds (0 waits forever).
    #[arg(long, default_value_t = 0)]
    timeout_secs: u64,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "results ingestion failed");
            ExitCode::from(2)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("results_ingest=info,report=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = ServiceConfig::from_env();
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }

    let ingestor = ResultsIngestor::default().with_text_repair(config.text_repair);
    let runtime = ResultsRuntime::shared(ingestor);

    tracing::info!(
        endpoint = %format!("http://{}{POST_RESULTS_PATH}", config.bind_addr),
        workers = config.http_workers,
        queue_capacity = config.http_queue_capacity,
        transport = config.transport_runtime.as_str(),
        text_repair = config.text_repair.as_str(),
        "results transport starting"
    );

    if !cli.await_results {
        serve(runtime, &config)?;
        return Ok(ExitCode::SUCCESS);
    }

    let (listener, receiver) = channel_listener();
    runtime.registry().register(listener);
    {
        let runtime = runtime.clone();
        let config = config.clone();
        std::thread::spawn(move || {
            if let Err(err) = serve(runtime, &config) {
                tracing::error!(error = %format!("{err:#}"), "results transport stopped");
            }
        });
    }

    let record = if cli.timeout_secs == 0 {
        receiver
            .recv()
            .context("results transport stopped before any results were posted")?
    } else {
        receiver
            .recv_timeout(Duration::from_secs(cli.timeout_secs))
            .with_context(|| format!("no results posted within {}s", cli.timeout_secs))?
    };
    print_summary(&record);
    Ok(if record.result_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn serve(runtime: SharedRuntime, config: &ServiceConfig) -> anyhow::Result<()> {
    match config.transport_runtime {
        TransportRuntime::Std => serve_http_with_workers(
            runtime,
            &config.bind_addr,
            config.http_workers,
            config.http_queue_capacity,
        )
        .with_context(|| format!("results transport failed on {}", config.bind_addr)),
        TransportRuntime::Axum => {
            #[cfg(feature = "async-transport")]
            {
                results_ingest::transport_axum::serve_http_with_axum(
                    runtime,
                    &config.bind_addr,
                    config.http_workers,
                )
                .map_err(anyhow::Error::msg)
            }
            #[cfg(not(feature = "async-transport"))]
            {
                drop(runtime);
                anyhow::bail!("transport runtime 'axum' requires build feature 'async-transport'")
            }
        }
    }
}

fn print_summary(record: &ResultsRecord) {
    println!("result: {}", record.result());
    println!("totalTime: {}", record.total_time().unwrap_or("-"));
    println!("numTestTotal: {}", record.num_test_total());
    println!("numTestPasses: {}", record.num_test_passes().unwrap_or("-"));
    println!("numTestFailures: {}", record.num_test_failures().unwrap_or("-"));
    println!(
        "numCommandPasses: {}",
        record.num_command_passes().unwrap_or("-")
    );
    println!(
        "numCommandFailures: {}",
        record.num_command_failures().unwrap_or("-")
    );
    println!(
        "numCommandErrors: {}",
        record.num_command_errors().unwrap_or("-")
    );
}
