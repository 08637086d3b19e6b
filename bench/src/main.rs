//! Stormweaver stress tool
//!
//! Drives the full workload engine against the in-memory mock driver, so
//! engine overhead (catalog contention, statement generation, statistics)
//! can be measured without a database server.

use clap::Parser;
use std::sync::Arc;
use stormweaver::action::{default_registry, ActionRegistry};
use stormweaver::metadata::Metadata;
use stormweaver::sql::mock::MockDriver;
use stormweaver::sql::{LoggedConnection, SqlConnector};
use stormweaver::workload::{Workload, WorkloadParams};

#[derive(Parser, Debug, Clone)]
#[command(name = "stormweaver-bench")]
#[command(about = "Stormweaver engine stress tool (mock SQL backend)")]
struct Args {
    #[arg(short = 'w', long, default_value = "5")]
    workers: usize,

    #[arg(short = 'd', long, default_value = "60")]
    duration: u64,

    #[arg(long, default_value = "0")]
    seed: u64,

    #[arg(long, default_value = "20")]
    max_tables: usize,

    #[arg(long, default_value = "5")]
    max_reconnect_attempts: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    println!("Stormweaver Stress Tool");
    println!("=======================");
    println!("Workers: {}", args.workers);
    println!("Duration: {}s", args.duration);
    println!("Max tables: {}", args.max_tables);
    println!("Seed: {}", args.seed);
    println!();

    let mut params = WorkloadParams {
        duration_in_seconds: args.duration,
        number_of_workers: args.workers,
        max_reconnect_attempts: args.max_reconnect_attempts,
        seed: args.seed,
        ..WorkloadParams::default()
    };
    params.action_config.ddl.max_table_count = args.max_tables;

    let driver = MockDriver::new().with_recording(false);
    let connector: SqlConnector = Arc::new(move || {
        Ok(LoggedConnection::new(Box::new(driver.clone()), "bench"))
    });

    let metadata = Arc::new(Metadata::new());
    let registry: ActionRegistry = default_registry();

    let mut workload = match Workload::new(params, connector, metadata, &registry) {
        Ok(workload) => workload,
        Err(err) => {
            eprintln!("Failed to set up workload: {}", err);
            std::process::exit(1);
        }
    };

    println!("Running workload...");
    workload.run();
    workload.wait_completion();

    let mut total_actions = 0;
    let mut total_success = 0;
    let mut total_failures = 0;
    let mut total_aps = 0.0;

    for idx in 1..=workload.worker_count() {
        let worker = match workload.worker(idx) {
            Ok(worker) => worker,
            Err(err) => {
                eprintln!("{}", err);
                continue;
            }
        };
        let stats = worker.statistics();
        total_actions += stats.total_action_count();
        total_success += stats.total_success_count();
        total_failures += stats.total_failure_count();
        total_aps += stats.actions_per_second();

        println!();
        println!("=== Worker {} ===", idx);
        print!("{}", stats.report_summary());
    }

    println!();
    println!("Workload statistics:");
    println!("    actions performed:  {:>12}", total_actions);
    println!("    successful:         {:>12}", total_success);
    println!("    failed:             {:>12}", total_failures);
    println!("    actions/sec:        {:>12.1}", total_aps);
    println!("    threads: {}", args.workers);
    println!("    errors: {}", total_failures);
    println!("    reconnects: 0");
}
