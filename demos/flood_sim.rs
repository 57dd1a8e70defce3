//! Simulated flood: a root and two relays on drifting oscillators
//!
//! Run with:
//!
//! ```bash
//! RUST_LOG=flopsync=debug cargo run --example flood_sim
//! ```

use std::time::Duration;

use flopsync::flooding::{FloodingScheme, RelayFlooder, RootFlooder};
use flopsync::sim::{AirConfig, Oscillator, SimAir};
use flopsync::time::ClockDomain;
use flopsync::{FloodingConfig, NodeState, Result};
use tokio::time::timeout;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const ROUNDS: usize = 20;
const PERIOD: Duration = Duration::from_secs(5);

async fn run_root(mut root: RootFlooder) -> Result<()> {
    for _ in 0..ROUNDS + 2 {
        root.synchronize().await?;
    }
    Ok(())
}

/// Waits for the flood for at most two sync periods
///
/// One runtime millisecond stands for one simulated nanosecond.
async fn rejoin(name: &str, relay: &mut RelayFlooder) -> Result<bool> {
    let limit = Duration::from_millis(2 * PERIOD.as_nanos() as u64);
    match timeout(limit, relay.resynchronize()).await {
        Ok(state) => Ok(state?.is_synchronized()),
        Err(_) => {
            println!("{}: no sync packet heard, stopping", name);
            Ok(false)
        }
    }
}

async fn run_relay(name: &str, mut relay: RelayFlooder, rounds: usize) -> Result<()> {
    if !rejoin(name, &mut relay).await? {
        return Ok(());
    }
    println!("{}: joined at hop {}", name, relay.hop().level());

    for round in 1..=rounds {
        if relay.synchronize().await? == NodeState::Unsynchronized {
            warn!(relay = name, "Lost synchronization, waiting for the flood");
            if !rejoin(name, &mut relay).await? {
                return Ok(());
            }
            continue;
        }
        let status = relay.status();
        println!(
            "{} round {:2}: error {:>8} ns  correction {:>8}  window {:>8}  delay {}",
            name,
            round,
            status.sync_error,
            status.clock_correction,
            status.receiver_window,
            status
                .ranging_delay_ns
                .map_or_else(|| "-".to_string(), |d| format!("{} ns", d)),
        );
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread", start_paused = true)]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = FloodingConfig {
        sync_period: PERIOD,
        ..Default::default()
    };
    config.validate()?;

    // 300 m between nodes and 40 ns of timestamping jitter
    let air = SimAir::new(AirConfig {
        propagation_ns: 1_000,
        jitter_ns: 40.0,
        seed: 7,
    });
    let root_node = air.node(Oscillator::ideal());
    let near_node = air.node(Oscillator::new(1_234_567, 25_000));
    let far_node = air.node(Oscillator::new(-7_654_321, -18_000));

    let root = RootFlooder::new(config.clone(), root_node.peripherals())?;
    let near = RelayFlooder::with_flopsync2(
        config.clone(),
        near_node.peripherals(),
        ClockDomain::shared(),
    )?;
    let far_config = FloodingConfig {
        pinned_hop: Some(2),
        ..config
    };
    let far =
        RelayFlooder::with_flopsync2(far_config, far_node.peripherals(), ClockDomain::shared())?;

    info!(rounds = ROUNDS, "Starting simulated flood");
    let (root, near, far) = tokio::join!(
        run_root(root),
        run_relay("hop-1", near, ROUNDS + 1),
        run_relay("hop-2", far, ROUNDS),
    );
    root?;
    near?;
    far?;

    println!("\nDone");
    Ok(())
}
