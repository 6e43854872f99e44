use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info};

use render_rtc::config::{discover_server_config, Config};
use render_rtc::connection::{ConnectionManager, SessionPlan};
use render_rtc::driver::{Command, Exit, SessionDriver};
use render_rtc::model::tracks::{kind_name, MediaFrame, MediaSink, Track};
use render_rtc::peer::Str0mConnector;
use render_rtc::pose::PoseScheduler;
use render_rtc::signaling::SignalingMode;
use render_rtc::util::init_log;
use render_rtc::wallet::{NoWallet, WalletService};

#[derive(Parser)]
#[command(name = "render-rtc", version, about = "Remote rendering WebRTC client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a render server and receive its stream until interrupted
    Connect(ConnectArgs),
}

#[derive(Args)]
struct ConnectArgs {
    /// Base URL of the render server
    #[arg(long, default_value = "http://127.0.0.1")]
    server: String,

    /// STUN/TURN server URL, may be repeated
    #[arg(long = "ice")]
    ice_servers: Vec<String>,

    /// Signaling transport. Asked from the server when omitted.
    #[arg(long, value_enum)]
    mode: Option<SignalingMode>,

    /// User or game id passed to the renderer
    #[arg(long)]
    user: Option<String>,

    /// Pose sampling rate in Hz
    #[arg(long, default_value_t = 72)]
    pose_rate: u32,
}

impl ConnectArgs {
    fn config(&self) -> Config {
        let mut config = Config {
            server_url: self.server.clone(),
            pose_rate_hz: self.pose_rate,
            user: self.user.clone(),
            ..Config::default()
        };
        if !self.ice_servers.is_empty() {
            config.ice_servers = self.ice_servers.clone();
        }
        config
    }
}

/// Logs tracks and a frame count instead of rendering.
struct LogSink {
    name: &'static str,
    frames: u64,
}

impl LogSink {
    fn new(name: &'static str) -> Self {
        Self { name, frames: 0 }
    }
}

impl MediaSink for LogSink {
    fn add_track(&mut self, track: &Track) {
        info!("{}: {} track on mid {}", self.name, kind_name(track.kind), track.mid);
    }

    fn on_frame(&mut self, frame: &MediaFrame) {
        self.frames += 1;
        if self.frames % 300 == 1 {
            debug!("{}: frame {} ({} bytes)", self.name, self.frames, frame.data.len());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_log();

    match Cli::parse().command {
        Commands::Connect(args) => connect(args).await,
    }
}

async fn connect(args: ConnectArgs) -> anyhow::Result<()> {
    let config = args.config();
    config.validate()?;

    let mode = match args.mode {
        Some(mode) => mode,
        None => discover_server_config(&config)
            .await
            .context("failed to fetch server config, pass --mode to skip discovery")?
            .mode(),
    };

    let mut plan = SessionPlan::new(mode)
        .video_sink(LogSink::new("left eye"))
        .video_sink(LogSink::new("right eye"))
        .audio_sink(LogSink::new("audio"));
    if let Some(user) = &config.user {
        plan = plan.with_metadata(json!({ "user": user }));
    }

    let manager = ConnectionManager::new(Box::new(Str0mConnector::new(config.clone())), &config);
    let mut gauge = manager.frame_rate();
    let poses = PoseScheduler::new(config.pose_interval());
    let mut driver = SessionDriver::new(manager, poses)
        .with_wallet(WalletService::new(Arc::new(NoWallet)));

    let (commands, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            let _ = commands.send(Command::Close);
        }
    });
    tokio::spawn(async move {
        while let Some(fps) = gauge.changed().await {
            info!("Inbound video: {:.1} fps", fps);
        }
    });

    let exit = driver.run(plan, rx).await?;
    match exit {
        Exit::Disconnected => info!("Session disconnected"),
        Exit::Closed => info!("Session closed"),
    }

    // Give the relay DELETE a moment to leave.
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}
