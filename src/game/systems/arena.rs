//! Arena management system
//!
//! Handles spawn placement and the open/closing/closed lifecycle of the
//! arena entity.

use rand::Rng;
use tracing::info;

use crate::game::constants::{arena_flags, notify};
use crate::game::input::Controller;
use crate::game::world::{ArenaState, EntityKind, World};
use crate::net::protocol::Notification;
use crate::util::vec2::Vec2;

/// Arena lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaEvent {
    /// Last player left a closing arena
    Closed,
}

/// Whether any live player body is within `radius` of `point`
fn crowded(world: &World, point: Vec2, radius: f32) -> bool {
    let radius_sq = radius * radius;
    world
        .spatial()
        .retrieve(point.x, point.y, radius, radius)
        .into_iter()
        .filter_map(|candidate| world.get(candidate))
        .any(|data| {
            data.kind == EntityKind::Body
                && matches!(data.controller, Controller::Player(_))
                && data.transform.position.distance_sq_to(point) < radius_sq
        })
}

/// Pick a spawn point away from player bodies
///
/// Tries up to the configured number of random points and accepts the last
/// candidate when every attempt was crowded. Uses the world's seeded RNG.
pub fn find_spawn_location(world: &mut World) -> Vec2 {
    let bounds = world.arena_bounds();
    let attempts = world.config().spawn_attempts.max(1);
    let radius = world.config().spawn_clear_radius;
    let (width, height) = (bounds.max.x - bounds.min.x, bounds.max.y - bounds.min.y);

    let mut candidate = bounds.center();
    for _ in 0..attempts {
        let rng = world.rng();
        let x = (bounds.min.x + rng.gen::<f32>() * width).trunc();
        let y = (bounds.min.y + rng.gen::<f32>() * height).trunc();
        candidate = Vec2::new(x, y);
        if !crowded(world, candidate, radius) {
            return candidate;
        }
    }
    candidate
}

/// Stop accepting players and tell every viewer
///
/// Returns false when the arena was not open.
pub fn close(world: &mut World) -> bool {
    if world.arena_state() != ArenaState::Open {
        return false;
    }
    world.set_arena_state(ArenaState::Closing);
    let arena = world.arena_id();
    if let Some(group) = world.get_mut(arena).and_then(|data| data.arena.as_mut()) {
        group.add_flags(arena_flags::NO_JOINING);
    }
    world.notify_all(Notification {
        text: notify::ARENA_CLOSED_TEXT.to_string(),
        color: notify::ARENA_CLOSED_COLOR,
        duration: notify::INFINITE_DURATION,
    });
    info!("Arena closing, no new players accepted");
    true
}

/// Advance the arena lifecycle once per tick
pub fn update(world: &mut World) -> Option<ArenaEvent> {
    if world.arena_state() == ArenaState::Closing && world.player_bodies().is_empty() {
        world.set_arena_state(ArenaState::Closed);
        info!("Arena closed at tick {}", world.tick());
        return Some(ArenaEvent::Closed);
    }
    None
}
