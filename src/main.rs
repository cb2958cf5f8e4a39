#[macro_use]
extern crate tracing;

use std::path::PathBuf;

use ambilight::{
    controller::AmbilightController,
    models::{ConfigBackend, ConfigExt, FileBackend},
};
use structopt::StructOpt;
use tokio::runtime::Builder;
use tokio::signal;

#[derive(Debug, StructOpt)]
struct Opts {
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u32,
    #[structopt(short, long = "config", default_value = "ambilight.toml")]
    config_path: PathBuf,
    #[structopt(long)]
    dump_config: bool,
    #[structopt(long)]
    list_ports: bool,
    #[structopt(long)]
    list_displays: bool,
}

async fn run(opts: Opts) -> color_eyre::eyre::Result<()> {
    if opts.list_ports {
        for port in ambilight::transport::list_ports()? {
            println!("{}", port);
        }

        return Ok(());
    }

    // Load configuration
    let config = FileBackend::new(&opts.config_path).load().await?;

    // Dump configuration if this was asked
    if opts.dump_config {
        print!("{}", config.to_string()?);
        return Ok(());
    }

    let displays = ambilight::capture::from_config(&config.capture).await?;

    if opts.list_displays {
        for display in displays.list_displays().await? {
            println!("{}", display);
        }

        return Ok(());
    }

    let kind: &'static str = (&config.transport).into();
    info!(transport = %kind, port = %config.port, "using transport");
    let transport = ambilight::transport::from_config(&config.transport);
    let controller = AmbilightController::new(displays, transport);

    // Forward controller events to the log
    let mut events = controller.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            debug!(event = ?event, "controller event");
        }
    });

    controller.start(config).await?;

    signal::ctrl_c().await?;
    info!("got ctrl-c, terminating");

    controller.stop().await;
    Ok(())
}

fn install_tracing(opts: &Opts) -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let fmt_layer = fmt::layer();

    let filter_layer = EnvFilter::try_from_env("AMBILIGHT_LOG").unwrap_or_else(|_| {
        EnvFilter::new(match opts.verbose {
            0 => "ambilight=warn,ambilightd=warn",
            1 => "ambilight=info,ambilightd=info",
            2 => "ambilight=debug,ambilightd=debug",
            _ => "ambilight=trace,ambilightd=trace",
        })
    });

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .try_init()
}

#[paw::main]
fn main(opts: Opts) -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    install_tracing(&opts)?;

    // Create tokio runtime
    let thd_count = match num_cpus::get() {
        1 => 2,
        other => other.min(4),
    };

    let rt = Builder::new_multi_thread()
        .worker_threads(thd_count)
        .enable_all()
        .build()?;
    rt.block_on(run(opts))
}
