use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use arena_server::config::ArenaConfig;
use arena_server::game::blueprints::{self, Loadout};
use arena_server::game::game_loop::{run_tick_loop, LoopExit};
use arena_server::game::scheduler::Scheduler;
use arena_server::game::systems::arena;
use arena_server::net::outbound::OutboundQueue;

/// Neutral shapes scattered at startup
const INITIAL_SHAPES: usize = 200;
/// AI tanks at startup
const INITIAL_BOTS: usize = 7;
/// How often the outbound stand-in drains frames
const OUTBOUND_POLL: Duration = Duration::from_millis(10);

fn populate(scheduler: &mut Scheduler) -> anyhow::Result<()> {
    let world = scheduler.world_mut();
    for _ in 0..INITIAL_SHAPES {
        let spot = arena::find_spawn_location(world);
        let (sides, size, health) = match world.rng().gen_range(0..10) {
            0 => (5, 75.0, 100.0),
            1..=3 => (3, 39.0, 30.0),
            _ => (4, 38.0, 10.0),
        };
        blueprints::spawn_shape(world, spot.x, spot.y, sides, size, health)?;
    }
    let loadouts = [
        Loadout::Basic,
        Loadout::Trapper,
        Loadout::Overseer,
        Loadout::Factory,
        Loadout::Industry,
        Loadout::Manufacturer,
        Loadout::Engineer,
    ];
    for i in 0..INITIAL_BOTS {
        let spot = arena::find_spawn_location(world);
        blueprints::spawn_bot(world, spot.x, spot.y, loadouts[i % loadouts.len()])?;
    }
    info!("Arena populated with {} shapes and {} bots", INITIAL_SHAPES, INITIAL_BOTS);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Arena Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ArenaConfig::load_or_default();
    config.validate()?;
    info!(
        "Configuration loaded: {} Hz, {} max entities, {}x{} arena, seed {}",
        config.tick_rate, config.max_entities, config.arena_width, config.arena_height, config.sim_seed
    );

    let outbound = OutboundQueue::new(config.outbound_queue_capacity);
    let mut scheduler = Scheduler::new(config, outbound.sender())?;
    populate(&mut scheduler)?;

    // Stand-in for the transport: drain encoded frames so the queue never fills
    let receiver = outbound.receiver();
    let drain = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(OUTBOUND_POLL);
        let mut bytes: u64 = 0;
        loop {
            ticker.tick().await;
            for message in receiver.try_iter() {
                bytes += message.payload.len() as u64;
            }
            debug!("Outbound: {} bytes drained so far", bytes);
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
                // Keep the sender alive so the loop only stops on arena close
                std::future::pending::<()>().await;
            }
        }
        let _ = shutdown_tx.send(true);
    });

    let result = run_tick_loop(&mut scheduler, shutdown_rx).await;
    drain.abort();

    match result {
        Ok(LoopExit::Shutdown) => info!("Server stopped"),
        Ok(LoopExit::ArenaClosed) => info!("Arena closed, server stopped"),
        Err(e) => {
            error!("Simulation failed: {}", e);
            info!("Dropped {} outbound frames", outbound.dropped());
            return Err(e.into());
        }
    }
    info!("Dropped {} outbound frames", outbound.dropped());
    Ok(())
}
