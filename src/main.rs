use anyhow::{Context, Result};
use clap::Parser;
use marie_voice::{PipelineConfig, PipelineEvent, VoicePipeline};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Speak lines typed on stdin
///
/// Lines may start with an emotion tag such as `[happy]`. Commands:
/// `/voice <id>`, `/stop` and `/quit`.
#[derive(Parser, Debug)]
#[command(name = "marie-voice", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Character to start with
    #[arg(long)]
    character: Option<String>,

    /// Piper executable
    #[arg(long)]
    piper: Option<PathBuf>,
}

/// One line of console input
#[derive(Debug, PartialEq)]
enum ConsoleCommand<'a> {
    /// `/voice` shows the current character, `/voice <id>` switches it
    Voice(Option<&'a str>),
    Stop,
    Quit,
    Speak(&'a str),
}

impl<'a> ConsoleCommand<'a> {
    fn parse(line: &'a str) -> Self {
        let line = line.trim();
        match line.split_once(char::is_whitespace) {
            Some(("/voice", id)) => Self::Voice(Some(id.trim())),
            _ => match line {
                "/voice" => Self::Voice(None),
                "/stop" => Self::Stop,
                "/quit" => Self::Quit,
                text => Self::Speak(text),
            },
        }
    }
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marie_voice=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(character) = args.character {
        config = config.with_character(character);
    }
    if let Some(piper) = args.piper {
        config = config.with_piper(piper);
    }

    info!("Starting voice console");
    let pipeline = VoicePipeline::new(config).context("starting voice pipeline")?;

    let settled = Arc::new(AtomicUsize::new(0));
    let events = pipeline.event_receiver();
    let counter = Arc::clone(&settled);
    thread::spawn(move || {
        for event in events.iter() {
            match event {
                PipelineEvent::Started { .. } => {}
                PipelineEvent::Skipped { reason, .. } => {
                    warn!("Skipped: {}", reason);
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                PipelineEvent::Finished { .. } | PipelineEvent::Cancelled { .. } => {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                PipelineEvent::Shutdown => break,
            }
        }
    });

    let mut queued = 0;
    let mut quit = false;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;

        match ConsoleCommand::parse(&line) {
            ConsoleCommand::Voice(None) => {
                info!("Current voice: {}", pipeline.current_voice().display_name());
            }
            ConsoleCommand::Voice(Some(id)) => pipeline.set_voice(id),
            ConsoleCommand::Stop => pipeline.stop(),
            ConsoleCommand::Quit => {
                quit = true;
                break;
            }
            ConsoleCommand::Speak(text) => {
                if pipeline.speak(text).is_some() {
                    queued += 1;
                }
            }
        }
    }

    // On end of input, let queued speech finish before exiting
    while !quit && pipeline.is_running() && settled.load(Ordering::SeqCst) < queued {
        thread::sleep(Duration::from_millis(50));
    }

    info!("{}", pipeline.stats().summary());
    pipeline.shutdown();
    Ok(())
}
