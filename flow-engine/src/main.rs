//! flow player (flow-engine) - Main entry point
//!
//! Headless deck: loads a track, plays it on the default audio device (or a
//! null output) and takes line commands on stdin. Notifications are logged.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use flow_common::events::FlowEvent;
use flow_engine::audio::{AudioOutput, FileSourceProvider, NullOutput, OutputDriver};
use flow_engine::config::TomlConfig;
use flow_engine::playback::{EngineHandle, PlaybackEngine, PlayoutSink, SetMode};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for flow-engine
#[derive(Parser, Debug)]
#[command(name = "flow-engine")]
#[command(about = "Audio playback and cue-point engine for the flow DJ player")]
#[command(version)]
struct Args {
    /// Track to load at startup
    file: Option<PathBuf>,

    /// Configuration file (overrides FLOW_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Consume audio in real time without opening a device
    #[arg(long, env = "FLOW_NO_AUDIO")]
    no_audio: bool,

    /// Output device name
    #[arg(short, long, env = "FLOW_AUDIO_DEVICE")]
    device: Option<String>,

    /// Print output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Start playing as soon as the track is loaded
    #[arg(short, long)]
    autoplay: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TomlConfig::resolve(args.config.as_deref())
        .context("Failed to load configuration")?;
    if args.no_audio {
        config.output.null_output = true;
    }
    if args.device.is_some() {
        config.output.device = args.device.clone();
    }

    // Initialize tracing
    let default_filter = format!("flow_engine={}", config.logging.level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if args.list_devices {
        for name in AudioOutput::list_devices().context("Failed to list audio devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    info!("Starting flow engine v{}", env!("CARGO_PKG_VERSION"));

    let provider = Arc::new(FileSourceProvider::new(
        config.engine.max_consecutive_decode_errors,
    ));
    let parts = PlaybackEngine::start(&config, provider)
        .context("Failed to start playback engine")?;
    let handle = parts.handle.clone();

    let mut events = handle.subscribe();
    let mut deck = Deck::new(&config, parts.sink.clone());

    if let Some(file) = &args.file {
        handle
            .load(file)
            .await
            .with_context(|| format!("Failed to load {}", file.display()))?;
        if args.autoplay {
            handle.play().await.context("Failed to start playback")?;
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    log_event(&event);
                    if let FlowEvent::TrackLoaded { sample_rate, .. } = &event {
                        deck.ensure_output(*sample_rate);
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("Event log lagged, {} events dropped", n),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match run_line(&handle, &line).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => warn!("{:#}", e),
                },
                Ok(None) => {
                    debug!("stdin closed");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
            _ = &mut shutdown => break,
        }
    }

    if let Err(e) = handle.shutdown().await {
        debug!("Engine already stopped: {}", e);
    }
    deck.stop();
    parts.task.await.context("Engine task failed")?;
    info!("Shutdown complete");
    Ok(())
}

/// Output device bookkeeping; reopened when the track rate changes
struct Deck {
    sink: PlayoutSink,
    device: Option<String>,
    null_output: bool,
    output: Option<Box<dyn OutputDriver>>,
    rate: Option<u32>,
}

impl Deck {
    fn new(config: &TomlConfig, sink: PlayoutSink) -> Self {
        Self {
            sink,
            device: config.output.device.clone(),
            null_output: config.output.null_output,
            output: None,
            rate: None,
        }
    }

    fn ensure_output(&mut self, sample_rate: u32) {
        if self.rate == Some(sample_rate) && self.output.is_some() {
            return;
        }
        self.stop();

        let mut output: Box<dyn OutputDriver> = if self.null_output {
            Box::new(NullOutput::new(sample_rate))
        } else {
            match AudioOutput::open(self.device.as_deref(), sample_rate) {
                Ok(output) => Box::new(output),
                Err(e) => {
                    warn!("Audio device unavailable, using null output: {}", e);
                    Box::new(NullOutput::new(sample_rate))
                }
            }
        };

        match output.start(self.sink.clone()) {
            Ok(()) => {
                info!(device = %output.name(), rate = output.sample_rate(), "Output started");
                self.output = Some(output);
                self.rate = Some(sample_rate);
            }
            Err(e) => error!("Failed to start output: {}", e),
        }
    }

    fn stop(&mut self) {
        if let Some(mut output) = self.output.take() {
            output.stop();
        }
        self.rate = None;
    }
}

fn log_event(event: &FlowEvent) {
    match event {
        FlowEvent::PositionChanged { .. } | FlowEvent::WaveformBucketsReady { complete: false, .. } => {
            debug!(event = event.event_type(), "{}", to_json(event));
        }
        FlowEvent::Error { kind, message, .. } => error!(%kind, "{}", message),
        FlowEvent::Warning { kind, message, .. } => warn!(%kind, "{}", message),
        _ => info!(event = event.event_type(), "{}", to_json(event)),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<unserializable: {}>", e))
}

/// A parsed stdin line
#[derive(Debug, PartialEq)]
enum LineCommand {
    Load(PathBuf),
    Play,
    Pause,
    Toggle,
    Stop,
    /// Seconds, or frames when prefixed with `@`
    Seek(SeekArg),
    CueSet { slot: u8, mode: SetMode, label: Option<String> },
    CueJump(u8),
    CueDelete(u8),
    CueLabel { slot: u8, label: Option<String> },
    CueList,
    Hold(Option<u8>),
    Release,
    Zoom(u32),
    Wave(usize),
    Status,
    Quit,
}

#[derive(Debug, PartialEq)]
enum SeekArg {
    Seconds(f64),
    Frames(u64),
}

fn parse_line(line: &str) -> Result<Option<LineCommand>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();
    let slot = |i: usize| -> Result<u8> {
        rest.get(i)
            .ok_or_else(|| anyhow!("missing cue slot"))?
            .parse::<u8>()
            .context("cue slot must be a number")
    };
    let text_from = |i: usize| -> Option<String> {
        (rest.len() > i).then(|| rest[i..].join(" "))
    };

    let command = match verb {
        "load" => {
            let path = text_from(0).ok_or_else(|| anyhow!("usage: load <path>"))?;
            LineCommand::Load(PathBuf::from(path))
        }
        "play" => LineCommand::Play,
        "pause" => LineCommand::Pause,
        "toggle" | "p" => LineCommand::Toggle,
        "stop" => LineCommand::Stop,
        "seek" => {
            let arg = rest.first().ok_or_else(|| anyhow!("usage: seek <seconds>|@<frame>"))?;
            match arg.strip_prefix('@') {
                Some(frames) => LineCommand::Seek(SeekArg::Frames(
                    frames.parse().context("frame must be an integer")?,
                )),
                None => {
                    let secs: f64 = arg.parse().context("seconds must be a number")?;
                    if secs < 0.0 {
                        bail!("seconds must not be negative");
                    }
                    LineCommand::Seek(SeekArg::Seconds(secs))
                }
            }
        }
        "cue" => match rest.first().copied() {
            Some("set") => LineCommand::CueSet { slot: slot(1)?, mode: SetMode::Overwrite, label: text_from(2) },
            Some("add") => LineCommand::CueSet { slot: slot(1)?, mode: SetMode::IfEmpty, label: text_from(2) },
            Some("jump") => LineCommand::CueJump(slot(1)?),
            Some("del") | Some("delete") => LineCommand::CueDelete(slot(1)?),
            Some("label") => LineCommand::CueLabel { slot: slot(1)?, label: text_from(2) },
            Some("list") | None => LineCommand::CueList,
            Some(other) => bail!("unknown cue command '{}'", other),
        },
        "hold" => LineCommand::Hold(if rest.is_empty() { None } else { Some(slot(0)?) }),
        "release" => LineCommand::Release,
        "zoom" => LineCommand::Zoom(
            rest.first()
                .ok_or_else(|| anyhow!("usage: zoom <frames-per-bucket>"))?
                .parse()
                .context("bucket width must be a number")?,
        ),
        "wave" => LineCommand::Wave(match rest.first() {
            Some(n) => n.parse().context("bucket count must be a number")?,
            None => 40,
        }),
        "status" => LineCommand::Status,
        "quit" | "q" | "exit" => LineCommand::Quit,
        other => bail!("unknown command '{}'", other),
    };
    Ok(Some(command))
}

/// Execute one stdin line; `Ok(false)` ends the session
async fn run_line(handle: &EngineHandle, line: &str) -> Result<bool> {
    let Some(command) = parse_line(line)? else {
        return Ok(true);
    };

    match command {
        LineCommand::Load(path) => {
            handle.load(path).await?;
        }
        LineCommand::Play => handle.play().await?,
        LineCommand::Pause => handle.pause().await?,
        LineCommand::Toggle => handle.toggle_play().await?,
        LineCommand::Stop => handle.stop().await?,
        LineCommand::Seek(arg) => {
            let frame = match arg {
                SeekArg::Frames(f) => f,
                SeekArg::Seconds(secs) => {
                    let status = handle.status().await?;
                    let track = status.track.ok_or_else(|| anyhow!("no track loaded"))?;
                    (secs * track.sample_rate as f64).round() as u64
                }
            };
            handle.seek_to(frame).await?;
        }
        LineCommand::CueSet { slot, mode, label } => {
            handle.set_cue(slot, None, mode, label).await?;
        }
        LineCommand::CueJump(slot) => handle.jump_cue(slot).await?,
        LineCommand::CueDelete(slot) => {
            handle.delete_cue(slot).await?;
        }
        LineCommand::CueLabel { slot, label } => handle.set_cue_label(slot, label).await?,
        LineCommand::CueList => {
            let status = handle.status().await?;
            let rate = status.track.as_ref().map(|t| t.sample_rate).unwrap_or(0);
            for cue in status.cues {
                println!(
                    "{} {} {}",
                    cue.slot,
                    flow_common::time::format_position(cue.position, rate),
                    cue.label.unwrap_or_default()
                );
            }
        }
        LineCommand::Hold(slot) => handle.cue_hold(slot).await?,
        LineCommand::Release => handle.cue_release().await?,
        LineCommand::Zoom(width) => handle.set_waveform_zoom(width).await?,
        LineCommand::Wave(count) => {
            let status = handle.status().await?;
            let window = handle.waveform_window(status.position, count).await?;
            let bars: String = window.iter().map(|b| bar(b.peak())).collect();
            println!("{}", bars);
        }
        LineCommand::Status => println!("{}", to_json(&handle.status().await?)),
        LineCommand::Quit => return Ok(false),
    }
    Ok(true)
}

fn bar(peak: f32) -> char {
    const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    let level = (peak.clamp(0.0, 1.0) * (BARS.len() - 1) as f32).round() as usize;
    BARS[level]
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
