//! Support hub demo
//!
//! Provisions in-process rooms, starts the four demo specialists and the
//! orchestrator, posts one customer report and prints the reply together with
//! the investigation record.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use support_hub::prelude::*;
use support_hub::room::OutboundMessage;
use support_hub::specialist::demo_roster;
use support_hub::tracing_ext::{init_tracing, LogFormat};
use tokio::sync::watch;
use tracing::info;

const DEFAULT_MESSAGE: &str = "Hi, when I click 'Export to CSV' on the dashboard the button just spins \
forever and nothing downloads. My email is sarah@acme.com.";

#[derive(Parser)]
#[command(name = "support-demo")]
#[command(about = "Run one customer report through the support hub")]
struct Args {
    /// Hub configuration file (YAML); built-in demo topology when omitted
    #[arg(short, long, env = "SUPPORT_HUB_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Customer message to post
    #[arg(short, long, default_value = DEFAULT_MESSAGE)]
    message: String,

    /// Handle the customer posts as
    #[arg(long, default_value = "customer")]
    customer: String,

    /// Log output: pretty or json
    #[arg(long, default_value = "pretty")]
    log_format: LogFormat,

    /// Skip the simulated specialist latency
    #[arg(long)]
    no_delay: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format)?;

    let mut config = HubConfig::load(args.config.as_deref()).context("loading hub configuration")?;
    if args.no_delay {
        config = config.without_delays();
    }

    let rooms = Arc::new(InMemoryRooms::from_config(&config, &args.customer));
    let (stop, shutdown) = watch::channel(false);

    for worker in demo_roster(&config)? {
        worker.start(rooms.clone(), shutdown.clone()).await?;
    }
    let dispatcher = Dispatcher::new(config.clone(), rooms.clone());
    let listeners = dispatcher.start(shutdown).await?;
    let mut reports = dispatcher.reports();

    info!("Posting customer report to {}", config.customer_room);
    rooms
        .send(
            &config.customer_room,
            OutboundMessage::new(args.customer.clone(), args.message.clone()),
        )
        .await?;

    // Every conversation ends by its deadlines; the slack covers reply delivery
    let patience = config.investigation_timeout() + config.escalation_timeout() + Duration::from_secs(5);
    let report = match tokio::time::timeout(patience, reports.recv()).await {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => bail!("report channel closed: {}", e),
        Err(_) => bail!("no reply within {:?}", patience),
    };

    println!("\n--- Reply to {} ---\n{}\n", args.customer, report.reply);
    println!("--- Investigation ---\n{}\n", serde_json::to_string_pretty(&report)?);
    println!("--- Dispatcher stats ---\n{}", serde_json::to_string_pretty(&dispatcher.stats())?);

    stop.send(true).ok();
    listeners.await.context("waiting for room listeners")?;
    Ok(())
}
