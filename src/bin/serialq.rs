//! serialq CLI: exercise a dispatcher under concurrent producers.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use serde::Serialize;
use serialq::config::Config;
use serialq::fault::{FaultSink, ItemFault, LogFaultSink};
use serialq::telemetry::init_telemetry;
use serialq::{Dispatcher, Error};

#[derive(Parser)]
#[command(name = "serialq", about = "Single-consumer serializing dispatcher")]
struct Cli {
    /// TOML config file; environment variables are used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fan work in from several producer threads, terminate, and verify ordering
    Run {
        /// Number of producer threads
        #[arg(long, default_value_t = 4)]
        producers: usize,
        /// Items submitted by each producer
        #[arg(long, default_value_t = 250)]
        items: usize,
        /// Make every Nth item panic (0 disables)
        #[arg(long, default_value_t = 0)]
        fault_every: usize,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Debug, Serialize)]
struct RunReport {
    producers: usize,
    submitted: usize,
    rejected_after_terminate: bool,
    executed: u64,
    faulted: u64,
    logged: usize,
    duplicates: usize,
    missing: usize,
    per_producer_order_preserved: bool,
    elapsed_ms: u128,
}

impl RunReport {
    fn ok(&self) -> bool {
        self.duplicates == 0
            && self.missing == 0
            && self.per_producer_order_preserved
            && self.rejected_after_terminate
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::load_file(path)?,
        None => Config::from_env()?,
    };

    match cli.command {
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Command::Run {
            producers,
            items,
            fault_every,
            json,
        } => {
            // Before cmd_run builds the dispatcher, so its metrics bind to OTLP.
            let _guard = init_telemetry(&config)?;

            let report = tokio::task::spawn_blocking(move || {
                cmd_run(config, producers, items, fault_every)
            })
            .await??;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }

            if !report.ok() {
                anyhow::bail!("dispatcher run violated its ordering or delivery guarantees");
            }
            Ok(())
        }
    }
}

fn cmd_run(
    config: Config,
    producers: usize,
    items: usize,
    fault_every: usize,
) -> anyhow::Result<RunReport> {
    let faults = Arc::new(Mutex::new(Vec::<ItemFault>::new()));
    let sink = {
        let faults = Arc::clone(&faults);
        move |fault: &ItemFault| {
            LogFaultSink.report(fault);
            faults.lock().push(fault.clone());
        }
    };

    let dispatcher = Dispatcher::with_fault_sink(config.dispatcher.clone(), sink)?;
    let log = Arc::new(Mutex::new(Vec::<(usize, usize)>::with_capacity(producers * items)));
    let started = Instant::now();

    let handles: Vec<_> = (0..producers)
        .map(|producer| {
            let dispatcher = dispatcher.clone();
            let log = Arc::clone(&log);
            thread::spawn(move || -> serialq::Result<usize> {
                let connection = format!("producer-{producer}");
                for seq in 0..items {
                    let log = Arc::clone(&log);
                    let fault = fault_every > 0 && (seq + 1) % fault_every == 0;
                    dispatcher.dispatch_request(connection.as_str(), move || {
                        log.lock().push((producer, seq));
                        if fault {
                            panic!("injected fault at {producer}/{seq}");
                        }
                    })?;
                }
                Ok(items)
            })
        })
        .collect();

    let mut submitted = 0;
    for handle in handles {
        submitted += handle
            .join()
            .map_err(|_| anyhow::anyhow!("producer thread panicked"))??;
    }

    dispatcher.shutdown()?;

    let rejected_after_terminate = matches!(
        dispatcher.dispatch(|| {}),
        Err(Error::Rejected { .. })
    );

    let log = log.lock();
    let mut seen = HashSet::with_capacity(log.len());
    let mut last_seq: Vec<Option<usize>> = vec![None; producers];
    let mut order_preserved = true;
    let mut duplicates = 0;
    for &(producer, seq) in log.iter() {
        if !seen.insert((producer, seq)) {
            duplicates += 1;
        }
        if last_seq[producer].is_some_and(|prev| prev >= seq) {
            order_preserved = false;
        }
        last_seq[producer] = Some(seq);
    }

    Ok(RunReport {
        producers,
        submitted,
        rejected_after_terminate,
        executed: dispatcher.executed(),
        faulted: faults.lock().len() as u64,
        logged: log.len(),
        duplicates,
        missing: submitted.saturating_sub(seen.len()),
        per_producer_order_preserved: order_preserved,
        elapsed_ms: started.elapsed().as_millis(),
    })
}

fn print_report(report: &RunReport) {
    println!("Producers:   {}", report.producers);
    println!("Submitted:   {}", report.submitted);
    println!("Executed:    {}", report.executed);
    println!("Faulted:     {}", report.faulted);
    println!("Logged:      {}", report.logged);
    println!("Duplicates:  {}", report.duplicates);
    println!("Missing:     {}", report.missing);
    println!(
        "Order:       {}",
        if report.per_producer_order_preserved {
            "preserved"
        } else {
            "VIOLATED"
        }
    );
    println!(
        "Post-term:   {}",
        if report.rejected_after_terminate {
            "rejected"
        } else {
            "ACCEPTED"
        }
    );
    println!("Elapsed:     {}ms", report.elapsed_ms);
}
