//! Thin CLI around the walk engine, gated behind the `cli` feature.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use hls_walker::{DefaultLoader, WalkConfig, WalkData, WalkEvent, WalkOptions, Walker};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hls-walk", about = "Walk an HLS master or media playlist and print events")]
struct Args {
    /// Master or media playlist URL (http(s):// or a filesystem path).
    url: String,

    /// Base directory for relative filesystem URLs.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Seconds between refetches of an unchanged master playlist.
    #[arg(long, default_value_t = 30)]
    master_timeout_secs: u64,

    /// Maximum concurrent subresource fetches.
    #[arg(long, default_value_t = 16)]
    max_concurrent_fetches: usize,

    /// Print only event kinds, not full payloads.
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hls_walker=info".parse()?))
        .init();

    let args = Args::parse();

    let options = WalkOptions {
        root_path: args.root,
        master_playlist_timeout: Duration::from_secs(args.master_timeout_secs),
        max_concurrent_fetches: args.max_concurrent_fetches,
        ..WalkOptions::default()
    };
    let config = WalkConfig::new(options);
    let loader = Arc::new(DefaultLoader::new(
        config.http.clone(),
        config.options.root_path.clone(),
    )?);

    let (handle, mut events) = Walker::new(args.url, config, loader).start();

    while let Some(event) = events.next().await {
        match event {
            WalkEvent::Data(WalkData::Master(m)) if args.quiet => {
                println!("master: {} variants, {} renditions", m.variants.len(), m.renditions.len());
            }
            WalkEvent::Data(WalkData::Media(m)) if args.quiet => {
                println!("media {}: {} segments, terminal={}", m.uri, m.segments.len(), m.is_terminal());
            }
            WalkEvent::Data(WalkData::Segment(s)) if args.quiet => {
                println!("segment: {}", s.uri);
            }
            WalkEvent::Error(err) if args.quiet => {
                eprintln!("error: {err}");
            }
            other => println!("{other:?}"),
        }
    }

    handle.close();
    Ok(())
}
