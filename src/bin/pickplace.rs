//! Pick-and-place cell runner
//!
//! Connects to the controller, prepares it, and runs one of:
//! - a number of pick-and-place cycles to a taught target pose
//! - the gripper soak test
//! - a move to the home pose
//! - a single gripper command

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pickplace::{
    Config, CycleObserver, CycleSequencer, JsonLinesObserver, NoOpObserver, TcpCycleContext,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pickplace")]
#[command(about = "Pick-and-place cycle runner for a 6-axis cobot")]
#[command(version)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit one JSON event per cycle step on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pick at the origin and place at a taught target pose
    Cycle {
        /// Target pose index from the configuration
        #[arg(short, long)]
        target: u32,

        /// Number of cycles to run
        #[arg(short, long, default_value = "1")]
        repeat: u32,
    },
    /// Close and open the gripper repeatedly, without moving the arm
    Soak {
        /// Number of close/open pairs; runs until interrupted when omitted
        #[arg(short, long)]
        iterations: Option<u64>,

        /// Delay after each gripper command, overrides the configuration
        #[arg(long)]
        delay_ms: Option<u64>,
    },
    /// Joint move to the home pose
    Home,
    /// Send one gripper command (open/release or close/grab)
    Grip {
        /// Gripper command name
        name: String,
    },
}

impl Args {
    fn get_config_path(&self) -> String {
        self.config
            .clone()
            .or_else(|| std::env::var("PICKPLACE_CONFIG").ok())
            .unwrap_or_else(|| "config/default_config.yaml".to_string())
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args.get_config_path();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    info!("Pick-and-place cycle runner");
    info!("Using config: {}", config_path);

    let mut config = Config::load_from_path(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;
    if let Commands::Soak { delay_ms: Some(ms), .. } = &args.command {
        config.soak.delay_ms = *ms;
    }

    let mut ctx = match TcpCycleContext::connect(&config) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Controller connection failed: {}", e);
            error!("Make sure:");
            error!("   - The controller is powered and reachable at {}", config.robot.host);
            error!("   - The script interface is enabled");
            error!("   - Configuration files are correct");
            return Err(e).context("Failed to connect to controller");
        }
    };
    ctx.prepare(&config).context("Failed to prepare controller")?;

    let observer: Box<dyn CycleObserver> = if args.json {
        Box::new(JsonLinesObserver::stdout())
    } else {
        Box::new(NoOpObserver)
    };
    let mut sequencer = CycleSequencer::new(ctx, config).with_observer(observer);

    let result = match args.command {
        Commands::Cycle { target, repeat } => sequencer.run_cycles(target, repeat).map(|reports| {
            let warnings: u32 = reports.iter().map(|r| r.completion_warnings).sum();
            info!("{} cycles complete ({} completion warnings)", reports.len(), warnings);
        }),
        Commands::Soak { iterations, .. } => sequencer.run_soak(iterations).map(|_| ()),
        Commands::Home => sequencer.move_home(),
        Commands::Grip { name } => sequencer.grip_named(&name).map(|state| {
            info!("Gripper state: {:?}", state);
        }),
    };

    if let Err(e) = result {
        if e.is_fatal() {
            error!("Run aborted, robot left at its last confirmed position: {}", e);
        } else {
            warn!("Run stopped: {}", e);
        }
        error!("Restart the cycle from Idle once the cell is safe");
        return Err(e).context("Pick-and-place run failed");
    }

    info!("Done");
    Ok(())
}
