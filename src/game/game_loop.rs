//! Fixed-rate tick loop
//!
//! Drives [`Scheduler::tick`] on a tokio interval until shutdown is
//! requested, the arena closes, or a tick fails fatally.

use std::time::Instant;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::game::performance::{PerformanceMonitor, PerformanceStatus};
use crate::game::scheduler::{Scheduler, SimulationError};
use crate::game::systems::arena::ArenaEvent;

/// Stats are logged this often
const STATS_INTERVAL_SECS: u64 = 30;

/// Why the loop returned normally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Shutdown,
    ArenaClosed,
}

/// Run ticks until shutdown, arena closure, or a fatal error
pub async fn run_tick_loop(
    scheduler: &mut Scheduler,
    mut shutdown: watch::Receiver<bool>,
) -> Result<LoopExit, SimulationError> {
    let tick_rate = scheduler.world().config().tick_rate;
    let mut ticker = interval(scheduler.world().config().tick_duration());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut performance = PerformanceMonitor::new(tick_rate);
    let stats_every = tick_rate as u64 * STATS_INTERVAL_SECS;
    let start = Instant::now();
    info!("Tick loop started at {} Hz", tick_rate);

    loop {
        if *shutdown.borrow() {
            info!("Tick loop stopping at tick {}", scheduler.world().tick());
            return Ok(LoopExit::Shutdown);
        }

        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    warn!("Shutdown channel dropped, stopping tick loop");
                    return Ok(LoopExit::Shutdown);
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        performance.tick_start();
        let summary = scheduler.tick()?;
        if let Some(status) = performance.tick_end(scheduler.world().len()) {
            match status {
                PerformanceStatus::Good => info!("Tick performance recovered: {}", performance.status_message()),
                _ => warn!("Tick performance degraded: {}", performance.status_message()),
            }
        }

        if summary.arena_event == Some(ArenaEvent::Closed) {
            info!("Arena closed after {}s, stopping tick loop", start.elapsed().as_secs());
            return Ok(LoopExit::ArenaClosed);
        }

        if stats_every > 0 && summary.tick > 0 && summary.tick % stats_every == 0 {
            let grid = scheduler.world().spatial().stats();
            info!(
                "Arena: {}s, tick {}, {} entities, {} viewers, {} grid cells (max {} per cell) | Perf: {:?} ({:.1}%)",
                start.elapsed().as_secs(),
                summary.tick,
                scheduler.world().len(),
                scheduler.encoder().viewer_count(),
                grid.cells,
                grid.max_per_cell,
                performance.status(),
                performance.budget_usage_percent()
            );
        }
    }
}
