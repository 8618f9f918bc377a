//! Collision filtering and response
//!
//! Candidate pairs come from the spatial grid in ascending order. Each pair
//! is first filtered by relationship and physics flags, then tested with a
//! circle overlap. Contacts exchange push and, between opposing teams,
//! contact damage.

use tracing::warn;

use crate::game::constants::{input_flags, physics, physics_flags};
use crate::game::entity::EntityId;
use crate::game::world::World;
use crate::util::vec2::Vec2;

/// Counters for one collision pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollisionStats {
    /// Pairs from the broad phase
    pub candidates: usize,
    /// Pairs rejected by relationship flags
    pub filtered: usize,
    /// Pairs that actually touched
    pub contacts: usize,
    /// Entities whose health reached zero
    pub kills: usize,
}

/// Remove entities missing a group their kind requires
///
/// Returns how many were flagged. The tick continues either way.
pub fn validate_groups(world: &mut World) -> usize {
    let mut flagged = 0;
    for entity in world.live_ids() {
        let Some(data) = world.get(entity) else {
            continue;
        };
        if data.kind.requires_health() && data.health.is_none() && !data.is_deleting() {
            warn!("{} ({:?}) has no health group, removing it", entity, data.kind);
            world.request_deletion(entity, 0);
            flagged += 1;
        }
    }
    flagged
}

/// Relationship filter, evaluated before any shape test
pub fn should_collide(world: &World, a: EntityId, b: EntityId) -> bool {
    let (Some(data_a), Some(data_b)) = (world.get(a), world.get(b)) else {
        return false;
    };
    if data_a.is_deleting() || data_b.is_deleting() {
        return false;
    }
    // Only free-moving roots collide; mounted parts move with their parent
    if world.parent_of(a).is_some() || world.parent_of(b).is_some() {
        return false;
    }

    let (owner_a, owner_b) = (world.owner_of(a), world.owner_of(b));
    if owner_a == b || owner_b == a {
        return false;
    }

    if world.team_of(a) == world.team_of(b) {
        let flags = data_a.physics.values().flags | data_b.physics.values().flags;
        if flags & physics_flags::NO_OWN_TEAM_COLLISION != 0 {
            return false;
        }
        if flags & physics_flags::ONLY_SAME_OWNER_COLLISION != 0 && owner_a != owner_b {
            return false;
        }
    }
    true
}

/// Unit vector from `a` to `b` when the two circles overlap
fn contact_normal(world: &World, a: EntityId, b: EntityId) -> Option<Vec2> {
    let (data_a, data_b) = (world.get(a)?, world.get(b)?);
    let delta = data_b.transform.position - data_a.transform.position;
    let reach = data_a.radius() + data_b.radius();
    let dist_sq = delta.length_sq();
    if dist_sq >= reach * reach {
        return None;
    }
    if dist_sq == 0.0 {
        return Some(Vec2::new(1.0, 0.0));
    }
    Some(delta.normalize())
}

fn god_mode(world: &World, entity: EntityId) -> bool {
    world
        .controlling_inputs(entity)
        .is_some_and(|inputs| inputs.has(input_flags::GOD_MODE))
}

/// Subtract `amount` from `target`'s health. Returns true when this hit
/// brought it to zero.
fn deal_damage(world: &mut World, target: EntityId, amount: f32) -> bool {
    if amount <= 0.0 || god_mode(world, target) {
        return false;
    }
    let animation = world.config().deletion_animation_ticks;
    let Some(health) = world.get_mut(target).and_then(|data| data.health.as_mut()) else {
        return false;
    };
    let remaining = (health.values().health - amount).max(0.0);
    health.set_health(remaining);
    if remaining > 0.0 {
        return false;
    }
    world.request_deletion(target, animation)
}

/// Resolve every candidate pair in ascending order
pub fn resolve(world: &mut World) -> CollisionStats {
    let mut stats = CollisionStats::default();
    let pairs = world.spatial().potential_collisions();

    for (a, b) in pairs {
        stats.candidates += 1;
        if !should_collide(world, a, b) {
            stats.filtered += 1;
            continue;
        }
        let Some(normal) = contact_normal(world, a, b) else {
            continue;
        };
        stats.contacts += 1;

        let (Some(data_a), Some(data_b)) = (world.get(a), world.get(b)) else {
            continue;
        };
        let (physics_a, physics_b) = (*data_a.physics.values(), *data_b.physics.values());
        let (damage_a, damage_b) = (data_a.damage, data_b.damage);
        let opposing = world.team_of(a) != world.team_of(b);

        if let Some(data) = world.get_mut(a) {
            data.velocity -= normal * (physics_b.push_factor * physics_a.absorption_factor * physics::PUSH_SCALE);
        }
        if let Some(data) = world.get_mut(b) {
            data.velocity += normal * (physics_a.push_factor * physics_b.absorption_factor * physics::PUSH_SCALE);
        }

        if opposing {
            if deal_damage(world, a, damage_b) {
                stats.kills += 1;
            }
            if deal_damage(world, b, damage_a) {
                stats.kills += 1;
            }
        }
    }
    stats
}
