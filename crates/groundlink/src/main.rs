//! `gndlink` - CLI for groundlink
//!
//! This binary runs ingestion sessions and inspects the stored telemetry.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::io::{BufWriter, Write};

use anyhow::Context;
use clap::Parser;
use tokio::runtime::Runtime;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Interval;
use tracing::warn;

use groundlink::cli::{Cli, Command, ConfigCommand, DumpCommand, IngestCommand};
use groundlink::{
    init_logging, Config, GroundStation, PersistenceEvent, PersistenceSink, PersistenceWorker,
    SessionEnd, Storage,
};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    let runtime = Runtime::new().context("starting the async runtime")?;
    let result = runtime.block_on(run(cli.command, config));
    shutdown(runtime);
    result
}

async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    match command {
        Command::Ingest(cmd) => handle_ingest(config, &cmd).await,
        Command::Status(cmd) => handle_status(&config, cmd.json),
        Command::Dump(cmd) => handle_dump(&config, &cmd),
        Command::Reset(cmd) => handle_reset(&config, cmd.yes),
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

/// Tear down without joining blocking threads.
///
/// Tokio reads stdin on a blocking thread that only returns at the next
/// newline, so joining would hang after Ctrl-C on a quiet terminal. Every
/// batch is already stored once `run` returns.
fn shutdown(runtime: Runtime) {
    runtime.shutdown_background();
}

fn open_storage(config: &Config) -> anyhow::Result<Storage> {
    let path = config.database_path();
    let storage = Storage::open(&path)
        .with_context(|| format!("opening database {}", path.display()))?;
    Ok(storage.with_page_size(config.storage.stream_page_size))
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn print_status_line(station: &GroundStation) {
    let links = station.link_status();
    let stats = station.stats();
    let flag = |active: bool| if active { "UP" } else { "--" };

    let telemetry = match station.current_snapshot() {
        Some(s) => format!(
            "#{:<6} T+{:>7.1}s alt {:>8.1} m vz {:>7.1} m/s {}",
            s.packet_id, s.mission_time, s.altitude, s.velocity_z, s.mission_state
        ),
        None => "waiting for telemetry".to_string(),
    };

    eprint!(
        "\r{telemetry} | primary {} backup {} | ok {} bad {}   ",
        flag(links.primary.active),
        flag(links.backup.active),
        stats.valid,
        stats.invalid,
    );
}

async fn handle_ingest(config: Config, cmd: &IngestCommand) -> anyhow::Result<()> {
    let storage = open_storage(&config)?;
    let worker = PersistenceWorker::spawn(storage, &config.buffer);
    let mut events = worker.handle().subscribe_events();
    let mut ticker = config.display_period().map(tokio::time::interval);
    let show_status = ticker.is_some() && !cmd.json;

    let source = cmd.source();
    let mut station = GroundStation::new(config, worker.handle());
    station
        .connect(&source)
        .await
        .with_context(|| format!("connecting to {source}"))?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut lost_records = 0usize;
    let mut events_open = true;

    let report = loop {
        tokio::select! {
            result = station.wait() => break result?,
            _ = &mut ctrl_c => break station.disconnect().await?,
            () = next_tick(&mut ticker), if show_status => print_status_line(&station),
            event = events.recv(), if events_open => match event {
                Ok(PersistenceEvent::Failed { records, .. }) => lost_records += records,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed persistence events"),
                Err(RecvError::Closed) => events_open = false,
            },
        }
    };
    if show_status {
        eprintln!();
    }

    drop(station);
    worker.shutdown().await?;
    while let Ok(event) = events.try_recv() {
        if let PersistenceEvent::Failed { records, .. } = event {
            lost_records += records;
        }
    }

    if cmd.json {
        let summary = serde_json::json!({
            "end": match &report.end {
                SessionEnd::Disconnected => "disconnected".to_string(),
                SessionEnd::TransportClosed => "transport_closed".to_string(),
                SessionEnd::TransportFailed(e) => format!("transport_failed: {e}"),
            },
            "stats": report.stats,
            "lost_records": lost_records,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        let stats = report.stats;
        println!("Session ended: {:?}", report.end);
        println!("  Lines:            {}", stats.lines);
        println!(
            "  Valid packets:    {} ({} full, {} survival)",
            stats.valid, stats.full_packets, stats.survival_packets
        );
        println!(
            "  Rejected:         {} ({} decode, {} validation)",
            stats.invalid, stats.decode_failures, stats.validation_failures
        );
        println!(
            "  Framer overflows: {} ({} bytes)",
            stats.framing_overflows, stats.bytes_discarded
        );
        println!(
            "  Stored:           {} records in {} batches",
            stats.records_flushed, stats.batches_flushed
        );
        if lost_records > 0 {
            println!("  Lost:             {lost_records} records failed to store");
        }
    }

    if let SessionEnd::TransportFailed(e) = report.end {
        anyhow::bail!("transport failed: {e}");
    }
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let stats = storage.stats()?;

    if json {
        let status = serde_json::json!({
            "database_path": storage.path(),
            "storage": stats,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("gndlink status");
        println!("--------------");
        println!("Database:      {}", storage.path().display());
        println!("Records:       {}", stats.record_count);
        if let (Some(first), Some(last)) = (stats.first_packet_id, stats.last_packet_id) {
            println!("Packet ids:    {first} .. {last}");
        }
        if let (Some(first), Some(last)) = (stats.first_mission_time, stats.last_mission_time) {
            println!("Mission time:  {first:.1} s .. {last:.1} s");
        }
        println!("Size:          {} bytes", stats.db_size_bytes);
    }
    Ok(())
}

fn handle_dump(config: &Config, cmd: &DumpCommand) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let records = storage.stream_all()?.take(cmd.limit.unwrap_or(usize::MAX));
    for record in records {
        serde_json::to_writer(&mut out, &record?)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

fn handle_reset(config: &Config, yes: bool) -> anyhow::Result<()> {
    if !yes {
        println!("This will delete all stored telemetry.");
        println!("Use --yes to confirm.");
        return Ok(());
    }

    let mut storage = open_storage(config)?;
    let count = storage.count()?;
    storage.clear()?;
    println!("Cleared {count} stored records.");
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Stream page size:   {}", config.storage.stream_page_size);
                println!();
                println!("[Framer]");
                println!("  Max buffer (bytes): {}", config.framer.max_buffer_len);
                println!("  Read chunk (bytes): {}", config.framer.read_chunk_size);
                println!();
                println!("[Decoder]");
                println!(
                    "  Mission time unit:  {:?}",
                    config.decoder.mission_time_unit
                );
                println!();
                println!("[Validation]");
                println!("  Policy:             {:?}", config.validation.policy);
                println!();
                println!("[Links]");
                println!("  Heartbeat (ms):     {}", config.links.heartbeat_interval_ms);
                println!("  Timeout (ms):       {}", config.links.timeout_ms);
                println!();
                println!("[Buffer]");
                println!("  Batch size:         {}", config.buffer.batch_size);
                println!("  Flush (ms):         {}", config.buffer.flush_interval_ms);
                println!(
                    "  Backlog warning:    {}",
                    config.buffer.backlog_warn_threshold
                );
                println!();
                println!("[Display]");
                println!("  Refresh (Hz):       {}", config.display.refresh_hz);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_shutdown_does_not_wait_for_blocking_reads() {
        let runtime = Runtime::new().unwrap();
        runtime.block_on(async {
            let _sleeper =
                tokio::task::spawn_blocking(|| std::thread::sleep(Duration::from_secs(30)));
            tokio::task::yield_now().await;
        });

        let before = Instant::now();
        shutdown(runtime);
        assert!(before.elapsed() < Duration::from_secs(5));
    }
}
