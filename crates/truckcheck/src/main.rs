//! `truckcheck` - CLI for the inspection checklist pipeline
//!
//! This binary loads configuration, wires the pipeline and runs one command
//! against it.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::Parser;

use truckcheck::cli::{Cli, Command, ConfigCommand, ListCommand, SweepCommand};
use truckcheck::{init_logging, status_counts, App, Config, FormSnapshot, SweepTrigger};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    match cli.command {
        Command::New => handle_new(),
        Command::Save(cmd) => handle_save(&config, &cmd.file).await,
        Command::Sweep(cmd) => handle_sweep(&config, &cmd).await,
        Command::Daemon => handle_daemon(&config).await,
        Command::Status(cmd) => handle_status(&config, cmd.json).await,
        Command::List(cmd) => handle_list(&config, &cmd).await,
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn handle_new() -> Result<()> {
    let form = FormSnapshot::blank(Utc::now());
    println!("{}", serde_json::to_string_pretty(&form)?);
    Ok(())
}

fn read_form(file: &Path) -> Result<FormSnapshot> {
    let raw = if file == Path::new("-") {
        let mut raw = String::new();
        std::io::stdin().read_to_string(&mut raw)?;
        raw
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("reading form {}", file.display()))?
    };
    serde_json::from_str(&raw).context("parsing form snapshot")
}

async fn handle_save(config: &Config, file: &Path) -> Result<()> {
    let form = read_form(file)?;
    let app = App::from_config(config)?;

    match app.save(form).await {
        Ok(report) => {
            println!("{}", report.outcome);
            if let Some(id) = report.submission_id {
                println!("Checklist #{id}");
            }
            // Remote sync and late email attempts run detached; give them a
            // chance before the process exits. Sweeps retry whatever is left.
            if !app.settle(config.settle_timeout()).await {
                eprintln!("Some delivery work is still pending; the next sweep will retry it.");
            }
            if !report.outcome.is_saved() {
                std::process::exit(1);
            }
        }
        Err(rejection) => {
            eprintln!("{rejection}");
            std::process::exit(2);
        }
    }
    Ok(())
}

async fn handle_sweep(config: &Config, cmd: &SweepCommand) -> Result<()> {
    let app = App::from_config(config)?;
    let trigger = SweepTrigger::from(cmd.trigger);
    let report = app.sweep(trigger).await;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Sweep ({trigger})");
        println!("  Redelivery attempted: {}", report.redelivery_attempted);
        println!("  Delivered:            {}", report.delivered);
        println!("  Locations resolved:   {}", report.relocated);
        println!("  Resynced:             {}", report.resynced);
        println!("  Purged:               {}", report.purged);
    }
    Ok(())
}

async fn handle_daemon(config: &Config) -> Result<()> {
    let app = App::from_config(config)?;
    let scheduler = app.spawn_scheduler();
    scheduler.trigger(SweepTrigger::Resume);

    println!(
        "Sweeping every {} minutes. Press Ctrl-C to stop.",
        config.sweep_interval().as_secs() / 60
    );
    tokio::signal::ctrl_c()
        .await
        .context("waiting for interrupt")?;

    println!("Stopping...");
    scheduler.shutdown().await;
    Ok(())
}

async fn handle_status(config: &Config, json: bool) -> Result<()> {
    let app = App::from_config(config)?;
    let stats = app.stats().await?;

    if json {
        let status = serde_json::json!({
            "database_path": config.database_path(),
            "remote_enabled": config.remote_enabled(),
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("truckcheck status");
        println!("-----------------");
        println!("Database:      {}", config.database_path().display());
        println!("Remote sync:   {}", if config.remote_enabled() { "on" } else { "off" });
        println!();
        println!("Checklists:    {}", stats.total);
        println!("  Sent:        {}", stats.sent);
        println!("  Pending:     {}", stats.pending);
        println!("  Incomplete:  {}", stats.undocumented);
        println!("Problems:      {}", stats.problems);
        if let Some(newest) = stats.newest_submission {
            println!("Newest:        {}", newest.with_timezone(&Local).format("%d/%m/%Y %H:%M"));
        }
        println!("Size:          {} bytes", stats.db_size_bytes);
    }
    Ok(())
}

async fn handle_list(config: &Config, cmd: &ListCommand) -> Result<()> {
    let app = App::from_config(config)?;
    let submissions = app.list(cmd.limit, cmd.pending).await?;

    if cmd.json {
        let rows: Vec<_> = submissions
            .iter()
            .map(|s| {
                serde_json::json!({
                    "id": s.id,
                    "created_at": s.header.created_at,
                    "operator": s.header.operator_name,
                    "tractor_plate": s.header.tractor_plate,
                    "trailer_plate": s.header.trailer_plate,
                    "location": s.location,
                    "status": s.delivery_status(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if submissions.is_empty() {
        println!("No checklists.");
        return Ok(());
    }
    for s in &submissions {
        println!(
            "#{:<5} {}  {:<9} {:<9} {:<24} {}",
            s.id.0,
            s.header.created_at.with_timezone(&Local).format("%d/%m/%Y %H:%M"),
            s.header.tractor_plate,
            s.header.trailer_plate,
            s.header.operator_name,
            s.delivery_status(),
        );
    }
    let summary: Vec<String> = status_counts(&submissions)
        .iter()
        .map(|(status, count)| format!("{count} {status}"))
        .collect();
    println!();
    println!("{}", summary.join(", "));
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> Result<()> {
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
                println!("  Retention (days):   {}", config.storage.retention_days);
                println!();
                println!("[Location]");
                println!("  Permission:         {}", config.location.permission_granted);
                println!(
                    "  Geocoder:           {}",
                    config.location.geocoder_url.as_deref().unwrap_or("none")
                );
                println!();
                println!("[Render]");
                println!("  Output dir:         {}", config.documents_dir().display());
                println!("  Fonts:              {}", config.render.fonts_dir.display());
                println!();
                println!("[Email]");
                println!(
                    "  Relay:              {}:{}",
                    config.email.smtp_host, config.email.smtp_port
                );
                println!("  From:               {}", config.email.from);
                println!("  Max attempts:       {}", config.email.max_attempts);
                println!();
                println!("[Remote]");
                println!(
                    "  Endpoint:           {}",
                    config.remote.endpoint.as_deref().unwrap_or("disabled")
                );
                println!();
                println!("[Sweep]");
                println!(
                    "  Interval (min):     {}",
                    config.sweep_interval().as_secs() / 60
                );
                println!("  Auto resend:        {}", config.sweep.auto_resend);
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
