use std::time::{Duration, Instant};

use aerialmap::prelude::*;
use anyhow::{bail, Context};

const USAGE: &str = "usage: aerialmap-app <tile-url-template> <lat> <lon> [zoom] [blocks]";
const FIX_FRAME: &str = "gps";
const FIXED_FRAME: &str = "odom";

/// Headless overlay driver: follows a short synthetic track and logs what
/// a renderer would be handed
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        bail!(USAGE);
    }
    let latitude: f64 = args[1].parse().context("latitude")?;
    let longitude: f64 = args[2].parse().context("longitude")?;

    let mut config = OverlayConfig {
        topic: "/fix".to_string(),
        tile_source: args[0].clone(),
        ..OverlayConfig::default()
    };
    if let Some(zoom) = args.get(3) {
        config.zoom = zoom.parse().context("zoom")?;
    }
    if let Some(blocks) = args.get(4) {
        config.blocks = blocks.parse().context("blocks")?;
    }

    let mut display = AerialMapDisplay::new(config)?;
    display.on_enable();

    let mut frames = StaticFrames::new(FIXED_FRAME)
        .with(MAP_FRAME, RigidTransform::identity())
        .with(FIX_FRAME, RigidTransform::identity());

    // ~11 m north-east per fix
    let track: Vec<(f64, f64)> = (0..20)
        .map(|i| (latitude + i as f64 * 1e-4, longitude + i as f64 * 1e-4))
        .collect();

    let deadline = Instant::now() + Duration::from_secs(30);
    let mut ticker = tokio::time::interval(Duration::from_millis(50));
    let mut tick: u64 = 0;
    let mut next_fix = track.iter().enumerate();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break;
            }
        }
        tick += 1;

        // one fix every 200 ms
        if tick % 4 == 1 {
            if let Some((i, (lat, lon))) = next_fix.next() {
                let meters = i as f64 * 11.0;
                frames.set(FIX_FRAME, RigidTransform::translation(meters, meters, 0.0));
                let fix = PositionFix::new(*lat, *lon, FIX_FRAME, tick as f64 * 0.05);
                if let Err(e) = display.on_fix(&fix, &frames) {
                    log::warn!("Fix rejected: {}", e);
                }
            }
        }

        if let Some(frame) = display.update(&frames) {
            if tick % 20 == 0 {
                let stats = display.cache().stats();
                log::info!(
                    "{} of {} slots visible, cache {:?}",
                    frame.visible_slots().count(),
                    frame.slots.len(),
                    stats
                );
                if let Some(placement) = frame.placement {
                    log::info!("Tile frame at {:?}", placement.translation.vector);
                }
            }
            let track_done = next_fix.len() == 0;
            if track_done && frame.is_complete() {
                log::info!("All tiles received");
                break;
            }
        }

        if Instant::now() >= deadline {
            log::warn!("Giving up waiting for tiles");
            break;
        }
    }

    for (category, status) in display.status().iter() {
        log::info!("{:<12} {:?}: {}", category.to_string(), status.level, status.message);
    }
    display.on_disable();
    Ok(())
}
