//! Lifecycle finalization
//!
//! The only phase allowed to change registry liveness during a tick. Soft
//! deletions count down (fading the entity out) and free the slot once the
//! countdown has elapsed; queued projectile spawns are materialized after.

use crate::game::blueprints;
use crate::game::entity::RegistryError;
use crate::game::world::World;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleStats {
    pub freed: usize,
    pub fading: usize,
    pub spawned: usize,
}

/// Advance soft deletions, free expired entities, then drain the spawn queue
///
/// Capacity exhaustion while spawning is fatal and propagates.
pub fn finalize(world: &mut World) -> Result<LifecycleStats, RegistryError> {
    let mut stats = LifecycleStats::default();

    for entity in world.live_ids() {
        let Some(data) = world.get_mut(entity) else {
            continue;
        };
        let Some(mut deletion) = data.deletion else {
            continue;
        };
        if deletion.remaining == 0 {
            world.free(entity);
            stats.freed += 1;
            continue;
        }
        deletion.remaining -= 1;
        data.deletion = Some(deletion);
        data.style
            .set_opacity(deletion.remaining as f32 / deletion.total as f32);
        stats.fading += 1;
    }

    for request in world.take_spawn_queue() {
        if blueprints::spawn_projectile(world, &request)?.is_some() {
            stats.spawned += 1;
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArenaConfig;
    use crate::game::world::{EntityData, EntityKind, LogNotifier};

    fn world() -> World {
        let config = ArenaConfig {
            max_entities: 16,
            ..Default::default()
        };
        World::new(config, Box::new(LogNotifier)).unwrap()
    }

    #[test]
    fn test_countdown_fades_then_frees() {
        let mut w = world();
        let e = w.spawn(EntityData::new(EntityKind::Shape)).unwrap();
        w.request_deletion(e, 2);

        let stats = finalize(&mut w).unwrap();
        assert_eq!(stats.fading, 1);
        assert_eq!(w.get(e).unwrap().style.values().opacity, 0.5);

        finalize(&mut w).unwrap();
        assert!(w.contains(e));
        assert_eq!(w.get(e).unwrap().style.values().opacity, 0.0);

        let stats = finalize(&mut w).unwrap();
        assert_eq!(stats.freed, 1);
        assert!(!w.contains(e));
    }

    #[test]
    fn test_zero_countdown_frees_immediately() {
        let mut w = world();
        let e = w.spawn(EntityData::new(EntityKind::Shape)).unwrap();
        w.request_deletion(e, 0);
        finalize(&mut w).unwrap();
        assert!(!w.contains(e));
    }

    #[test]
    fn test_untouched_entities_survive() {
        let mut w = world();
        let e = w.spawn(EntityData::new(EntityKind::Shape)).unwrap();
        let stats = finalize(&mut w).unwrap();
        assert_eq!(stats, LifecycleStats::default());
        assert!(w.contains(e));
    }

    #[test]
    fn test_spawn_capacity_is_fatal() {
        use crate::game::world::{ProjectileKind, ProjectileSpec, SpawnRequest};
        use crate::util::vec2::Vec2;

        let config = ArenaConfig {
            max_entities: 2,
            ..Default::default()
        };
        let mut w = World::new(config, Box::new(LogNotifier)).unwrap();
        let owner = w.spawn(EntityData::new(EntityKind::Body)).unwrap();
        w.queue_spawn(SpawnRequest {
            barrel: owner,
            owner,
            team: owner,
            spec: ProjectileSpec {
                kind: ProjectileKind::Bullet,
                speed: 1.0,
                size_ratio: 1.0,
                damage: 1.0,
                health: 1.0,
                lifetime_ticks: 10,
                absorption_factor: 1.0,
            },
            position: Vec2::ZERO,
            angle: 0.0,
            barrel_width: 10.0,
            color: 0,
        });
        assert!(matches!(finalize(&mut w), Err(RegistryError::Exhausted { .. })));
    }
}
