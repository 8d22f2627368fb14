use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube_sentinel::{
    api::{ApiState, spawn_api_server},
    config::load_config,
    engine::Monitor,
    notify::{Dispatcher, NtfyTransport},
    scheduler::SchedulerHandle,
    source::{KubeApiSource, ResourceSource},
    storage,
};
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (JSON); defaults plus environment when omitted
    #[arg(short)]
    file: Option<String>,

    /// Run a single pass, print its summary and exit
    #[arg(long)]
    once: bool,

    /// Only accept pushed events, never poll the API server
    #[arg(long)]
    push_only: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = filter::Targets::new().with_targets(vec![
        ("kube_sentinel", level),
        ("sentinel", level),
        ("tower_http", LevelFilter::INFO),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let config = Arc::new(load_config(args.file.as_deref())?);

    let store = storage::open(&config).await?;
    info!("using {} storage", store.backend_name());

    let transport = Arc::new(NtfyTransport::new(
        config.notify_base_url.clone(),
        Duration::from_secs(config.retry.timeout_secs),
    )?);
    let dispatcher = Arc::new(Dispatcher::from_config(&config, transport));

    let source: Option<Arc<dyn ResourceSource>> = if args.push_only {
        None
    } else {
        Some(Arc::new(KubeApiSource::new(&config.source)?))
    };

    let monitor = Arc::new(Monitor::new(
        config.clone(),
        store,
        source.clone(),
        dispatcher,
    ));

    if args.once {
        let summary = monitor.run_pass().await;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        if let Some(reason) = summary.aborted {
            anyhow::bail!("pass aborted: {reason}");
        }
        return Ok(());
    }

    if config.notify_on_startup {
        let result = monitor.send_startup().await;
        if !result.delivered {
            warn!("startup notification not delivered: {:?}", result.error);
        }
    }

    let scheduler = source.as_ref().map(|_| {
        SchedulerHandle::spawn(
            monitor.clone(),
            config.pass.interval_secs.map(Duration::from_secs),
        )
    });

    let bind_addr = SocketAddr::new(config.server.addr, config.server.port);
    let addr = spawn_api_server(bind_addr, ApiState::new(monitor, scheduler.clone())).await?;
    info!(
        "kube-sentinel for cluster {} listening on {addr}",
        config.cluster_name
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    if let Some(scheduler) = scheduler {
        if let Err(e) = scheduler.shutdown().await {
            error!("{e:#}");
        }
    }

    Ok(())
}
