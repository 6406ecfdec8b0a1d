use std::{error::Error, process, sync::Arc, time::Duration};

use clap::{command, Parser, Subcommand, ValueHint};
use log::{debug, error, info, LevelFilter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tracklane::{
    config::Config,
    events::Event,
    fixture::{Fixture, Memory},
    http,
    player::{PlayOutcome, Player},
    quality::QualityLevel,
    queue::PlayMode,
    song::{SongId, ViewSource},
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

const PARKED_POLLS: usize = 20;
const PARKED_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, PartialEq, Eq, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// Missing settings take their defaults.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, env = "TRACKLANE_CONFIG")]
    config: Option<String>,

    /// Catalog fixture
    ///
    /// Songs, lists and personal radio served by the in-memory catalog.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("fixture.toml"))]
    fixture: String,

    /// Streaming quality
    ///
    /// [default: from the configuration file]
    #[arg(long, value_enum)]
    quality: Option<QualityLevel>,

    /// Probe stream hosts for sizes
    ///
    /// Ask the hosts of stream URLs for their content length over HTTP
    /// instead of using the sizes in the fixture.
    #[arg(long, default_value_t = false)]
    probe_hosts: bool,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, PartialEq, Eq, Subcommand)]
enum Command {
    /// Resolve one song to a stream URL without playing it
    Resolve {
        /// Song ID
        id: String,
    },

    /// Play a list from a song and advance until the end
    Play {
        /// Source tag of the list, as in the fixture
        view: String,

        /// Song ID to start from
        id: String,

        /// Play mode
        ///
        /// [default: from the configuration file]
        #[arg(short, long, value_enum)]
        mode: Option<PlayMode>,
    },
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module("tracklane", level);
    }

    logger.init();
}

/// Logs every event as a line of JSON.
fn spawn_event_log(mut events: mpsc::UnboundedReceiver<Event>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => info!("event: {json}"),
                Err(e) => error!("could not serialize {event:?}: {e}"),
            }
        }
    });
}

async fn resolve(player: &Player, fixture: &Fixture, id: &str) -> Result<(), Box<dyn Error>> {
    let id = SongId::from(id);
    let song = fixture
        .song(&id)
        .ok_or_else(|| format!("song {id} is not in the fixture"))?;

    let quality = player.quality();
    let (song, result) = player
        .resolve(&song, quality, &CancellationToken::new())
        .await;
    info!("{song}: {result}");

    if let Some(stream) = song.stream(quality) {
        info!(
            "{} stream of {} bytes at {}{}",
            stream.level,
            stream.size,
            stream.url,
            if stream.is_trial() { " (trial)" } else { "" }
        );
    }

    Ok(())
}

/// Waits for a parked request to start once its list has loaded.
async fn wait_for_parked(player: &Player) -> bool {
    for _ in 0..PARKED_POLLS {
        tokio::time::sleep(PARKED_POLL_INTERVAL).await;
        if player.now_playing().is_some() {
            return true;
        }
    }

    false
}

async fn play(
    player: &Player,
    memory: &Memory,
    fixture: &Fixture,
    source: &str,
    id: &str,
) -> Result<(), Box<dyn Error>> {
    let source = ViewSource::from(source);
    let view = fixture
        .view(&source)
        .ok_or_else(|| format!("list {source} is not in the fixture"))?;
    let id = SongId::from(id);
    let slot = view
        .songs
        .iter()
        .position(|song| *song == id)
        .ok_or_else(|| format!("song {id} is not in {source}"))?;

    let songs = fixture.view_songs(view);
    let first = songs[slot].clone();
    memory.view.show(source.clone(), songs);
    player.view_changed(source, Some(view.songs.clone()));

    let mut outcome = player.play_song(first).await;
    let mut playing = match outcome {
        PlayOutcome::Started { .. } => true,
        PlayOutcome::Parked => wait_for_parked(player).await,
        _ => false,
    };
    while playing {
        outcome = player.on_playback_ended().await;
        playing = matches!(outcome, PlayOutcome::Started { .. });
    }

    info!(
        "stopped after {} songs: {outcome:?}",
        memory.audio.played().len()
    );
    Ok(())
}

/// Main application logic.
///
/// # Errors
///
/// Returns an error when the configuration or fixture cannot be loaded, or
/// the requested song or list is not in the fixture.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(quality) = args.quality {
        config.quality = quality;
    }
    if let Command::Play {
        mode: Some(mode), ..
    } = &args.command
    {
        config.mode = *mode;
    }

    let fixture = Fixture::from_file(&args.fixture)?;
    let memory = Memory::new(&fixture);

    let (events, receiver) = mpsc::unbounded_channel();
    spawn_event_log(receiver);
    let mut collaborators = memory.collaborators();
    if args.probe_hosts {
        collaborators.content_length = Arc::new(http::Client::new(&config)?);
    }
    let player = Player::new(config, collaborators, events);

    let work = async {
        match &args.command {
            Command::Resolve { id } => resolve(&player, &fixture, id).await,
            Command::Play { view, id, .. } => play(&player, &memory, &fixture, view, id).await,
        }
    };

    tokio::select! {
        // Prioritize shutdown signals.
        biased;

        _ = tokio::signal::ctrl_c() => {
            info!("shutting down gracefully");
            player.stop().await;
            Ok(())
        }

        result = work => {
            player.stop().await;
            result
        }
    }
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and runs the requested command.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
