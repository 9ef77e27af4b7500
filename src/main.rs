use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use pingwatch::cli::{Args, prefs_from_config};
use pingwatch::config::Config;
use pingwatch::export::{export_csv, generate_report, with_snapshot_extension};
use pingwatch::monitor::{Monitor, ProbeEvent};
use pingwatch::prefs::Prefs;
use pingwatch::probe::{check_permissions, resolve_target};
use pingwatch::state::Sample;
use pingwatch::MonitorError;

/// Samples shown in the periodic "Recent" line
const RECENT_WINDOW: usize = 10;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    init_logging(&args.log_level);

    // Replay mode needs neither permissions nor a target
    if let Some(ref replay_path) = args.replay {
        return run_replay_mode(&args, replay_path);
    }

    let prefs = Prefs::load();
    let config = args.to_config(&prefs);
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    if args.remember {
        prefs_from_config(&config)
            .save()
            .context("Failed to save preferences")?;
    }

    // Check permissions early, for the address family we will actually probe
    let ipv6 = match resolve_target(&config.target).await {
        Ok(ip) => ip.is_ipv6(),
        Err(e) => {
            eprintln!("Warning: cannot resolve {} yet: {}", config.target, e);
            false
        }
    };
    if let Err(e) = check_permissions(ipv6) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    run_monitor_mode(&args, config).await
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pingwatch={}", level.to_lowercase())));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Probe until Ctrl+C or the end time, then report and save
async fn run_monitor_mode(args: &Args, config: Config) -> Result<()> {
    let target = config.target.clone();
    let mut monitor = Monitor::new(config.threshold_ms);
    let mut events = monitor.start(config)?;

    // Setup Ctrl+C handler
    let interrupted = CancellationToken::new();
    let interrupted_clone = interrupted.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        interrupted_clone.cancel();
    });

    println!("Monitoring {} (Ctrl+C to stop)", target);
    println!();

    loop {
        tokio::select! {
            biased;
            _ = interrupted.cancelled() => {
                println!();
                break;
            }
            event = events.recv() => {
                // Channel closes when the loop ends on its own
                let Some(event) = event else { break };
                println!("{}", format_event(&event));

                if args.stats_every > 0
                    && event.sequence % args.stats_every == 0
                    && let Some(stats) = monitor.try_statistics()
                {
                    println!();
                    generate_report(&stats, &target, None, std::io::stdout())?;
                    if let Some(recent) = monitor.try_recent(RECENT_WINDOW) {
                        println!("{:<16} {}", "Recent", format_recent(&recent));
                    }
                    println!();
                }
            }
        }
    }

    monitor.stop().await;

    // Loop has exited, nothing else holds the lock
    let (stats, history) = {
        let session = monitor.session().lock();
        (session.stats.statistics(), session.history.snapshot_copy())
    };

    println!();
    generate_report(&stats, &target, None, std::io::stdout())?;

    if let Some(ref path) = args.save {
        let path = with_snapshot_extension(path);
        match monitor.save(&path) {
            Ok(()) => println!("\nSaved snapshot to {}", path.display()),
            Err(MonitorError::EmptyHistory) => println!("\n{}", MonitorError::EmptyHistory),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to save {}", path.display()));
            }
        }
    }

    if let Some(ref path) = args.csv {
        write_csv(&history, path)?;
    }

    Ok(())
}

/// Load a snapshot and print it
fn run_replay_mode(args: &Args, replay_path: &Path) -> Result<()> {
    let mut monitor = Monitor::new(args.threshold.unwrap_or(pingwatch::config::DEFAULT_THRESHOLD_MS));
    let created_at = monitor
        .load(replay_path)
        .with_context(|| format!("Failed to load {}", replay_path.display()))?;

    let (stats, history) = {
        let session = monitor.session().lock();
        (session.stats.statistics(), session.history.snapshot_copy())
    };

    let name = replay_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| replay_path.display().to_string());
    generate_report(&stats, &name, Some(created_at), std::io::stdout())?;

    println!();
    for sample in &history {
        if sample.round_trip > 0 {
            println!("{}  {:>5} ms", sample.time.format("%H:%M:%S"), sample.round_trip);
        } else {
            println!("{}  {:>8}", sample.time.format("%H:%M:%S"), "failed");
        }
    }

    if let Some(ref path) = args.csv {
        write_csv(&history, path)?;
    }

    Ok(())
}

fn write_csv(history: &[Sample], path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    export_csv(history, BufWriter::new(file))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn format_event(event: &ProbeEvent) -> String {
    let result = &event.result;
    let time = result.timestamp.format("%H:%M:%S");
    if result.is_success() {
        format!(
            "{}  {:<11}  {:>5} ms  TTL={}",
            time,
            result.status.label(),
            result.round_trip_ms,
            result.ttl
        )
    } else {
        format!("{}  {:<11}", time, result.status.label())
    }
}

fn format_recent(samples: &[Sample]) -> String {
    samples
        .iter()
        .map(|s| match s.round_trip {
            0 => "-".to_string(),
            ms => ms.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
