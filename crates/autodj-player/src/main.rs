//! AutoDJ Player - headless auto-pilot over simulated decks
//!
//! Loads a setlist into the queue, turns the auto-pilot on and follows the
//! session until the queue runs dry. The cue sheet of the set is written to
//! the configured recording directory.
//!
//! ## Usage
//!
//! ```text
//! autodj-player <setlist.yaml> [--config <path>]
//! ```
//!
//! Set RUST_LOG=debug for scheduler and analyzer detail.

mod setlist;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};

use autodj_core::clock::TokioClock;
use autodj_core::config::{self, AutoDjConfig};
use autodj_core::deck::SharedDeck;
use autodj_core::mixer::SharedMixer;
use autodj_core::queue::SharedQueue;
use autodj_core::sim::{SimDeck, SimMixer};
use autodj_core::{AutoDj, AutoDjEvent};

use setlist::Setlist;

/// How often the event bus is drained
const EVENT_POLL: Duration = Duration::from_millis(250);

struct Args {
    setlist: PathBuf,
    config_path: PathBuf,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut setlist = None;
        let mut config_path = None;
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => match args.next() {
                    Some(path) => config_path = Some(PathBuf::from(path)),
                    None => bail!("--config needs a path"),
                },
                _ if setlist.is_none() => setlist = Some(PathBuf::from(&arg)),
                other => bail!("Unexpected argument: {}", other),
            }
        }
        let Some(setlist) = setlist else {
            bail!("Usage: autodj-player <setlist.yaml> [--config <path>]");
        };
        Ok(Self {
            setlist,
            config_path: config_path.unwrap_or_else(config::default_config_path),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse(std::env::args().skip(1))?;
    let config: AutoDjConfig = config::load_config(&args.config_path);

    let setlist = Setlist::load(&args.setlist)?;
    log::info!(
        "autodj-player: {} tracks, {:.0} min",
        setlist.tracks.len(),
        setlist.total_secs() / 60.0
    );

    let clock = TokioClock::shared();
    let decks: [SharedDeck; 2] = [
        Arc::new(Mutex::new(SimDeck::new("A", clock.clone()))),
        Arc::new(Mutex::new(SimDeck::new("B", clock.clone()))),
    ];
    let mixer: SharedMixer = Arc::new(Mutex::new(SimMixer::new(
        clock.clone(),
        config.recording.output_dir.clone(),
    )));
    let queue: SharedQueue = Arc::new(Mutex::new(setlist.into_queue()));

    let dj = AutoDj::new(clock, decks, mixer, queue, config);
    let events = dj.subscribe();

    if !dj.toggle_auto_pilot() {
        bail!("Nothing to play in {:?}", args.setlist);
    }

    loop {
        tokio::time::sleep(EVENT_POLL).await;
        for event in events.try_iter() {
            log_event(&event);
            if let AutoDjEvent::SessionEnded { recording } = event {
                match recording {
                    Some(path) => println!("Set finished, cue sheet at {}", path.display()),
                    None => println!("Set finished"),
                }
                return Ok(());
            }
        }
    }
}

fn log_event(event: &AutoDjEvent) {
    match event {
        AutoDjEvent::TransitionStarted {
            kind,
            source,
            target,
            mix_in,
            duration,
        } => log::info!(
            "{} {} -> {} over {:.1}s, target in at {:.1}s",
            kind,
            source,
            target,
            duration,
            mix_in
        ),
        AutoDjEvent::TrackQueued { deck, track, remaining } => {
            log::info!("Deck {} cued {} ({} to go)", deck, track, remaining)
        }
        AutoDjEvent::AnalysisFailed { reason, .. } => log::warn!("Analysis failed: {}", reason),
        other => log::debug!("{:?}", other),
    }
}
