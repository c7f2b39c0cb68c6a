// Example runner: feeds a synthetic scene through a tracking session and prints every
// cycle as JSON.
//
// Usage: blob_tracker [config.json] [log-level]

use anyhow::Context;
use blob_tracker::{PipelineConfig, TrackingSession};
use image::{DynamicImage, GrayImage, Luma};
use tracing::info;

const FRAME_WIDTH: u32 = 320;
const FRAME_HEIGHT: u32 = 240;
const CYCLES: u32 = 40;

/// Two bright squares crossing each other on a dark background.
fn synthetic_frame(step: u32) -> DynamicImage {
    let mut img = GrayImage::new(FRAME_WIDTH, FRAME_HEIGHT);
    let squares = [(20 + 5 * step, 100), (240 - 5 * step, 110)];
    for (x0, y0) in squares {
        for y in y0..(y0 + 24).min(FRAME_HEIGHT) {
            for x in x0..(x0 + 24).min(FRAME_WIDTH) {
                img.put_pixel(x, y, Luma([230]));
            }
        }
    }
    DynamicImage::ImageLuma8(img)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let log_level = args
        .get(2)
        .and_then(|s| s.parse::<tracing_subscriber::filter::LevelFilter>().ok())
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let config = match args.get(1) {
        Some(path) => {
            info!("Loading configuration from {path}");
            PipelineConfig::from_json_file(path)
                .with_context(|| format!("failed to load configuration from {path}"))?
        }
        None => {
            let mut config = PipelineConfig::default();
            config.roi = blob_tracker::Roi::new(0, 0, FRAME_WIDTH, FRAME_HEIGHT)?;
            config.processing.max_area = 1000;
            config
        }
    };

    let session = TrackingSession::spawn(config)?;
    let producer = session.producer();
    let mut snapshots = session.subscribe();

    for step in 0..CYCLES {
        if step % 10 == 9 {
            producer.report_missing()?;
        } else {
            producer.push(synthetic_frame(step))?;
        }
        let cycle = snapshots.recv().await?;
        println!(
            "{}",
            serde_json::json!({
                "frame": cycle.frame_index,
                "blobs": cycle.blobs,
            })
        );
    }

    let stats = session.stats().await?;
    info!(?stats, "final tracker statistics");
    session.shutdown().await?;
    Ok(())
}
