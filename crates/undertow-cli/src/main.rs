//! Undertow CLI - The `undertow` command.
//!
//! Plays one of the built-in pieces in real time, renders one offline to a
//! Standard MIDI File, or manages the config file.
//!
//! # Architecture
//!
//! The binary wires outputs to **undertow-core**:
//!
//! - MIDI goes to a midir port (or a log sink when none is usable)
//! - Audio events go over OSC to an external synthesis engine
//! - The engine runs on its own thread; stdin lines become control messages

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use crossbeam_channel::{RecvTimeoutError, Sender};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use undertow_core::control::HELP;
use undertow_core::{
    AudioSink, BusSnapshot, Command, Config, ControlMessage, LogAudio, LogSink, MidiSink,
    MidirSink, OscAudioSink, Piece, Runtime, ScoreWriter, VirtualClock,
};

/// Undertow - long-form procedural MIDI and audio pieces
#[derive(Parser, Debug)]
#[command(name = "undertow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Plays long-running generative pieces over MIDI and OSC", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a piece in real time
    Run(PieceArgs),

    /// Render a piece offline to a Standard MIDI File
    Render {
        #[command(flatten)]
        piece: PieceArgs,

        /// How much of the piece to render ("90s", "25m", "8h")
        #[arg(short, long, value_parser = humantime::parse_duration)]
        duration: Duration,

        /// Output file
        #[arg(short, long, value_name = "FILE", default_value = "undertow.mid")]
        out: PathBuf,
    },

    /// List MIDI output ports
    Ports,

    /// Write a default config file
    Init,

    /// Print where the config file lives
    ConfigPath,
}

#[derive(ClapArgs, Debug)]
struct PieceArgs {
    /// emerald, abyssal or root-sleep (defaults to the config's piece)
    #[arg(short, long)]
    piece: Option<String>,

    /// Config file to use instead of the default location
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Seed for a repeatable performance
    #[arg(long)]
    seed: Option<u64>,

    /// Tempo override
    #[arg(long)]
    bpm: Option<f64>,

    /// Disable MIDI output
    #[arg(long)]
    no_midi: bool,

    /// Send audio events even if the piece is MIDI-only by default
    #[arg(long)]
    audio: bool,

    /// MIDI output port (substring match); the port is then required
    #[arg(long)]
    port: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    match args.command {
        Commands::Run(piece) => run(piece),
        Commands::Render {
            piece,
            duration,
            out,
        } => render(piece, duration, out),
        Commands::Ports => {
            let ports = MidirSink::list_ports().context("Failed to list MIDI ports")?;
            if ports.is_empty() {
                println!("No MIDI output ports found");
            }
            for (i, name) in ports.iter().enumerate() {
                println!("{i}: {name}");
            }
            Ok(())
        }
        Commands::Init => {
            let path = Config::create_default_config_file()
                .context("Failed to write default config")?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        Commands::ConfigPath => {
            let path = Config::config_path().context("Failed to resolve config path")?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

/// Load the config and apply command line overrides.
fn resolve(args: &PieceArgs) -> Result<(Piece, Config)> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => Config::load_or_default(),
    };

    if let Some(seed) = args.seed {
        config.engine.seed = Some(seed);
    }
    if let Some(bpm) = args.bpm {
        config.engine.bpm = Some(bpm);
    }
    if args.no_midi {
        config.midi.enabled = false;
    }
    if args.audio {
        config.audio.enabled = Some(true);
    }
    if let Some(port) = &args.port {
        config.midi.port = Some(port.clone());
        config.midi.port_forced = true;
    }
    let config = config.sanitized();

    let name = args.piece.as_deref().unwrap_or(&config.engine.piece);
    let piece: Piece = name
        .parse()
        .with_context(|| format!("Failed to select piece '{name}'"))?;
    Ok((piece, config))
}

fn open_midi(config: &Config) -> Box<dyn MidiSink> {
    if !config.midi.enabled {
        return Box::new(LogSink);
    }
    let wanted = config.midi.port.as_deref();
    match MidirSink::open(wanted, config.midi.port_forced) {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            log::warn!("[MIDI] {}; logging MIDI instead", e);
            Box::new(LogSink)
        }
    }
}

/// Runtime port switch: a named port is required, `None` takes the first.
fn open_port(port: Option<&str>) -> undertow_core::Result<Box<dyn MidiSink>> {
    Ok(Box::new(MidirSink::open(port, port.is_some())?))
}

fn open_audio(config: &Config) -> Box<dyn AudioSink> {
    match OscAudioSink::new(config.audio.osc_target.clone()) {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            log::warn!("[AUDIO] {}; logging audio events instead", e);
            Box::new(LogAudio)
        }
    }
}

fn run(args: PieceArgs) -> Result<()> {
    let (piece, config) = resolve(&args)?;
    log::info!("Undertow: {}", piece);

    let setup = piece
        .setup(&config)
        .with_context(|| format!("Failed to build piece '{piece}'"))?;
    let engine = setup
        .into_engine(&config, open_midi(&config), open_audio(&config))
        .with_port_opener(Box::new(open_port));

    let stop = engine.stop_flag();
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&stop))
            .context("Failed to install signal handler")?;
    }

    let runtime = Runtime::start(engine).context("Failed to start engine")?;
    let handle = runtime.handle();
    spawn_console(handle.control_sender(), handle.state_manager().clone(), Arc::clone(&stop))?;

    log::info!("Playing... type 'help' for commands, Ctrl+C to stop");
    while !handle.is_stopped() {
        match handle.cues().recv_timeout(Duration::from_millis(200)) {
            Ok(cue) => log::info!("Cue {} (bar {}, pass {})", cue.name, cue.bar, cue.pass),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    log::info!("Stopping, letting pending notes finish...");
    runtime.join();
    log::info!("Bye");
    Ok(())
}

/// Read commands from stdin on a background thread.
fn spawn_console(
    tx: Sender<ControlMessage>,
    state: undertow_core::StateManager,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    std::thread::Builder::new()
        .name("undertow-console".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(Command::Control(msg)) => {
                        if msg == ControlMessage::Stop {
                            stop.store(true, Ordering::Relaxed);
                        }
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(Command::Status) => print_status(&state.snapshot()),
                    Ok(Command::Help) => println!("{HELP}"),
                    Err(e) => println!("{e}\n{HELP}"),
                }
            }
        })
        .context("Failed to spawn console thread")?;
    Ok(())
}

fn print_status(s: &BusSnapshot) {
    println!(
        "beat {:.2}  bar {}  section {} (since beat {:.2})",
        s.beat, s.bar, s.section, s.section_entered
    );
    println!(
        "midi {} ({})  cc {}  audio {}  sounding {}",
        on_off(s.midi_enabled),
        s.midi_port,
        on_off(s.cc_enabled),
        on_off(s.audio_enabled),
        s.sounding_notes
    );
    for (key, value) in &s.values {
        println!("  {key} = {value}");
    }
    for voice in &s.voices {
        println!("  [{}] {} ({} steps)", voice.status, voice.name, voice.steps);
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

fn render(args: PieceArgs, duration: Duration, out: PathBuf) -> Result<()> {
    let (piece, mut config) = resolve(&args)?;
    // Renders repeat unless a seed is given.
    if config.engine.seed.is_none() {
        config.engine.seed = Some(0);
    }

    let setup = piece
        .setup(&config)
        .with_context(|| format!("Failed to build piece '{piece}'"))?;
    let tempo = setup.tempo;
    let beats = tempo.seconds_to_beats(duration.as_secs_f64());
    log::info!(
        "Rendering {} for {} ({:.0} beats at {:.0} bpm)",
        piece,
        humantime::format_duration(duration),
        beats.as_f64(),
        tempo.bpm()
    );

    let writer = ScoreWriter::new(tempo);
    let mut engine = setup.into_engine(&config, Box::new(writer.sink()), Box::new(LogAudio));
    engine.render(&mut VirtualClock::new(), beats);

    writer
        .write(&out)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    Ok(())
}
