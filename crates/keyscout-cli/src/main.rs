//! Keyscout CLI
//!
//! Runs searches against a configured engine and prints JSON to stdout.
//! Requests are JSON documents read from a file or from stdin (`-`).

use std::io::Read as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use keyscout_lib::core::search::{
    ScrollBound, ScrollRequest, SearchRequest, SearchTemporalRequest, TemporalSearchEngine,
};
use keyscout_lib::core::settings::SearchSettings;
use keyscout_lib::{build_engine, EngineOptions};

#[derive(Parser)]
#[command(name = "keyscout")]
#[command(about = "Temporal keyframe search over news video archives")]
struct Args {
    /// Settings file (JSON); defaults apply when missing
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Exported points (JSON lines); uses the in-memory index instead of Qdrant
    #[arg(long, global = true)]
    points: Option<PathBuf>,

    /// Frame manifest `{video: [frames]}`
    #[arg(long, global = true)]
    manifest: Option<PathBuf>,

    /// Keyframe directory to scan
    #[arg(long, global = true)]
    keyframes: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the loaded frame index and backend
    Stats,

    /// Check that the vector store is reachable
    Health,

    /// Single-vector search
    Search {
        /// Request file, or `-` for stdin
        request: PathBuf,
    },

    /// Multi-segment temporal search
    Temporal {
        /// Request file, or `-` for stdin
        request: PathBuf,
    },

    /// List the frames of one video
    Scroll {
        video: String,

        /// Start frame number or timestamp (`MM:SS`)
        #[arg(long)]
        from: Option<String>,

        /// End frame number or timestamp (`MM:SS`)
        #[arg(long)]
        to: Option<String>,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Write the effective settings to a file
    InitConfig {
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("keyscout=info,keyscout_lib=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let settings = load_settings(args.config.as_deref())?;

    if let Command::InitConfig { path } = &args.command {
        let saved = settings
            .save(path)
            .with_context(|| format!("failed to write settings to {}", path.display()))?;
        info!(path = %path.display(), "Settings written");
        return print_json(&saved, args.pretty);
    }

    let options = EngineOptions {
        points_file: args.points.clone(),
        frame_manifest: args.manifest.clone(),
        keyframe_root: args.keyframes.clone(),
    };
    let engine = build_engine(settings, &options).context("failed to start search engine")?;
    let stats = engine.stats().await;
    info!(
        backend = %stats.backend,
        videos = stats.videos,
        frames = stats.frames,
        "Search engine ready"
    );

    run(&engine, args.command, args.pretty).await
}

async fn run(engine: &TemporalSearchEngine, command: Command, pretty: bool) -> anyhow::Result<()> {
    debug!(command = command.name(), "Dispatching command");
    match command {
        Command::Stats => print_json(&engine.stats().await, pretty),
        Command::Health => {
            engine.health_check().await.context("vector store health check failed")?;
            print_json(&serde_json::json!({ "status": "ok" }), pretty)
        }
        Command::Search { request } => {
            let request: SearchRequest = read_request(&request)?;
            let hits = engine.search(&request).await.context("search failed")?;
            print_json(&hits, pretty)
        }
        Command::Temporal { request } => {
            let request: SearchTemporalRequest = read_request(&request)?;
            let response = engine
                .search_temporal(&request)
                .await
                .context("temporal search failed")?;
            print_json(&response, pretty)
        }
        Command::Scroll {
            video,
            from,
            to,
            limit,
        } => {
            let mut request = ScrollRequest::new(&video).between(
                from.as_deref().map(parse_bound),
                to.as_deref().map(parse_bound),
            );
            request.limit = limit;
            let hits = engine.scroll_video(&request).await.context("scroll failed")?;
            print_json(&hits, pretty)
        }
        Command::InitConfig { .. } => Ok(()),
    }
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Stats => "stats",
            Command::Health => "health",
            Command::Search { .. } => "search",
            Command::Temporal { .. } => "temporal",
            Command::Scroll { .. } => "scroll",
            Command::InitConfig { .. } => "init-config",
        }
    }
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<SearchSettings> {
    match path {
        Some(path) => SearchSettings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => Ok(SearchSettings::default()),
    }
}

fn read_request<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read request from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read request {}", path.display()))?
    };
    serde_json::from_str(&content).context("request is not valid JSON for this command")
}

/// Plain integers are frame numbers, anything else is a timestamp
fn parse_bound(raw: &str) -> ScrollBound {
    match raw.trim().parse() {
        Ok(frame) => ScrollBound::Frame(frame),
        Err(_) => ScrollBound::Time(raw.trim().to_string()),
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", out);
    Ok(())
}
