//! Motion, shape derivation and firing
//!
//! Entities are visited parent-before-child: roots in ascending id order,
//! each followed depth-first by its children in ascending id order. For
//! every entity the shared base step (orphan check, lifetime, integration)
//! runs strictly before its capability-specific logic, and a child is only
//! visited after its parent has fully settled for the tick.

use smallvec::SmallVec;

use crate::game::constants::{body, input_flags, physics, physics_flags};
use crate::game::entity::EntityId;
use crate::game::world::{
    EntityData, LauncherTip, MountStrategy, SizeBasis, SpawnRequest, World,
};
use crate::util::vec2::Vec2;

/// Aim points closer than this leave the heading untouched
const MIN_AIM_DISTANCE_SQ: f32 = 1e-4;

/// Visit order for one tick
pub fn traversal_order(world: &World) -> Vec<EntityId> {
    let mut order = Vec::with_capacity(world.len());
    let mut stack: Vec<EntityId> = Vec::new();

    for root in world.live_ids() {
        if world.parent_of(root).is_some() {
            continue;
        }
        stack.push(root);
        while let Some(current) = stack.pop() {
            order.push(current);
            let Some(data) = world.get(current) else {
                continue;
            };
            let mut children: SmallVec<[EntityId; 8]> = data
                .children
                .iter()
                .copied()
                .filter(|child| world.contains(*child))
                .collect();
            // Popped in ascending order
            children.sort_unstable_by(|a, b| b.cmp(a));
            stack.extend(children);
        }
    }
    order
}

/// Run the physics phase for every live entity
pub fn update(world: &mut World) {
    for entity in traversal_order(world) {
        step(world, entity);
    }
}

/// Derive a freshly spawned part's shape and transform from its parent
pub(crate) fn derive_shape(world: &mut World, entity: EntityId) {
    update_mount(world, entity);
    update_barrel_shape(world, entity);
    settle_transform(world, entity);
}

fn step(world: &mut World, entity: EntityId) {
    if !base_update(world, entity) {
        return;
    }
    update_body(world, entity);
    update_aim(world, entity);
    update_mount(world, entity);
    update_barrel_shape(world, entity);
    settle_transform(world, entity);
    fire_barrel(world, entity);
}

/// Shared logic for every entity. Returns false when the entity should not
/// be specialized this tick.
fn base_update(world: &mut World, entity: EntityId) -> bool {
    let Some(data) = world.get(entity) else {
        return false;
    };
    let parent = data.relations.values().parent;
    let projectile = data.projectile;
    let escapes = data.physics.has_flags(physics_flags::CAN_ESCAPE_ARENA);
    let animation = world.config().deletion_animation_ticks;
    let bounds = world.arena_bounds();
    let padding = world.config().arena_padding;

    if let Some(parent) = parent {
        if !world.contains(parent) {
            tracing::trace!("{} lost its parent {}", entity, parent);
            world.request_deletion(entity, 0);
            return false;
        }
    }

    if let Some(projectile) = projectile {
        let orphaned = projectile.dies_with_owner && !world.contains(projectile.owner);
        if orphaned || projectile.lifetime == 0 {
            world.request_deletion(entity, animation);
        }
    }

    let Some(data) = world.get_mut(entity) else {
        return false;
    };
    if let Some(projectile) = data.projectile.as_mut() {
        projectile.lifetime = projectile.lifetime.saturating_sub(1);
    }
    if parent.is_some() {
        return true;
    }

    if data.acceleration > 0.0 {
        let thrust = data.inputs.movement() * data.acceleration;
        data.velocity += thrust;
    }
    data.velocity *= 1.0 - physics::FRICTION;

    let mut position = data.local_position() + data.velocity;
    if !escapes {
        position.x = position.x.clamp(bounds.min.x - padding, bounds.max.x + padding);
        position.y = position.y.clamp(bounds.min.y - padding, bounds.max.y + padding);
    }
    data.position.set_x(position.x);
    data.position.set_y(position.y);
    true
}

/// Level-driven size and health, suicide requests
fn update_body(world: &mut World, entity: EntityId) {
    let animation = world.config().deletion_animation_ticks;
    let Some(data) = world.get_mut(entity) else {
        return;
    };
    let Some(mut state) = data.body else {
        return;
    };
    let inputs = data.inputs;
    let controlled = data.controller.is_some();

    if controlled && inputs.has(input_flags::LEVEL_UP) && state.level < body::LEVEL_CAP {
        state.level += 1;
    }
    data.body = Some(state);
    data.physics.set_size(state.size());
    if let Some(health) = data.health.as_mut() {
        let max_health = state.max_health();
        let current = health.values().health;
        health.set_max_health(max_health);
        health.set_health(current.min(max_health));
    }

    if controlled && inputs.has(input_flags::SUICIDE) {
        world.request_deletion(entity, animation);
    }
}

/// Controlled entities face their aim point
fn update_aim(world: &mut World, entity: EntityId) {
    let Some(data) = world.get(entity) else {
        return;
    };
    if !data.controller.is_some() {
        return;
    }
    let mouse = data.inputs.mouse;
    let parent_transform = world
        .parent_of(entity)
        .and_then(|parent| world.get(parent))
        .map(|parent| parent.transform);
    // Position as of this tick's integration
    let origin = match parent_transform {
        Some(parent) => parent.position + data.local_position().rotate(parent.angle),
        None => data.local_position(),
    };
    if origin.distance_sq_to(mouse) < MIN_AIM_DISTANCE_SQ {
        return;
    }
    let world_angle = origin.angle_to_point(mouse);
    let local_angle = match parent_transform {
        Some(parent) => world_angle - parent.angle,
        None => world_angle,
    };
    if let Some(data) = world.get_mut(entity) {
        data.position.set_angle(local_angle);
    }
}

/// Mounted sub-objects track their parent's current shape
fn update_mount(world: &mut World, entity: EntityId) {
    let Some(data) = world.get(entity) else {
        return;
    };
    let Some(strategy) = data.mount else {
        return;
    };
    let Some(parent_id) = world.parent_of(entity) else {
        return;
    };
    let Some(parent) = world.get(parent_id) else {
        return;
    };
    let parent_physics = *parent.physics.values();
    let parent_opacity = parent.style.values().opacity;
    let grandparent_physics = world
        .parent_of(parent_id)
        .and_then(|g| world.get(g))
        .map(|g| *g.physics.values());

    let Some(data) = world.get_mut(entity) else {
        return;
    };
    match strategy {
        MountStrategy::FollowParent {
            size_ratio,
            copy_opacity,
        } => {
            data.physics.set_size(parent_physics.size * size_ratio);
            if copy_opacity {
                data.style.set_opacity(parent_opacity);
            }
        }
        MountStrategy::Launcher {
            width_ratio,
            size_basis,
            size_ratio,
            tip,
        } => {
            let basis = match size_basis {
                SizeBasis::Width => parent_physics.width,
                SizeBasis::Size => parent_physics.size,
            };
            let size = basis * size_ratio;
            let x = match tip {
                LauncherTip::Front => (parent_physics.size + size) / 2.0,
                LauncherTip::Back => (size - parent_physics.size) / 2.0,
            };
            data.physics.set_sides(2);
            data.physics.set_size(size);
            data.physics.set_width(parent_physics.width * width_ratio);
            data.position.set_x(x);
            data.position.set_y(0.0);
        }
        MountStrategy::LauncherCap {
            width_ratio,
            size_ratio,
        } => {
            let Some(barrel) = grandparent_physics else {
                return;
            };
            let size = barrel.width * size_ratio;
            data.physics.set_sides(2);
            data.physics.set_size(size);
            data.physics.set_width(barrel.width * width_ratio);
            data.position.set_x((parent_physics.size + size) / 2.0);
            data.position.set_y(0.0);
        }
    }
}

/// Barrel geometry scales with the parent's size
fn update_barrel_shape(world: &mut World, entity: EntityId) {
    let Some(data) = world.get(entity) else {
        return;
    };
    let Some(barrel) = data.barrel else {
        return;
    };
    let Some(parent) = world.parent_of(entity).and_then(|p| world.get(p)) else {
        return;
    };
    let factor = parent.physics.values().size / body::BASE_SIZE;
    let spec = barrel.spec;

    let Some(data) = world.get_mut(entity) else {
        return;
    };
    let size = spec.length * factor;
    let local = Vec2::new(size / 2.0, spec.offset * factor).rotate(spec.angle);
    data.physics.set_sides(2);
    data.physics.set_size(size);
    data.physics.set_width(spec.width * factor);
    data.position.set_x(local.x);
    data.position.set_y(local.y);
    data.position.set_angle(spec.angle);
}

fn settle_transform(world: &mut World, entity: EntityId) {
    let Some(data) = world.get(entity) else {
        return;
    };
    let transform = world.compose_transform(data);
    if let Some(data) = world.get_mut(entity) {
        data.transform = transform;
    }
}

/// Reload and queue a projectile when the controlling ancestor fires
fn fire_barrel(world: &mut World, entity: EntityId) {
    let Some(data) = world.get(entity) else {
        return;
    };
    let Some(mut barrel) = data.barrel else {
        return;
    };
    let root = world.root_of(entity);
    let disabled = data.is_deleting() || world.get(root).map_or(true, EntityData::is_deleting);

    barrel.cooldown = barrel.cooldown.saturating_sub(1);
    let shooting = !disabled
        && world
            .controlling_inputs(entity)
            .is_some_and(|inputs| inputs.attempting_shot());

    let mut request = None;
    if shooting && barrel.cooldown == 0 {
        barrel.cooldown = barrel.spec.reload_ticks.max(1);
        let owner = world.owner_of(root);
        let physics = data.physics.values();
        let tip = data.transform.position + Vec2::from_angle(data.transform.angle) * (physics.size / 2.0);
        request = Some(SpawnRequest {
            barrel: entity,
            owner,
            team: world.team_of(owner),
            spec: barrel.spec.projectile,
            position: tip,
            angle: data.transform.angle,
            barrel_width: physics.width,
            color: world.get(root).map_or(0, |r| r.style.values().color),
        });
    }

    if let Some(data) = world.get_mut(entity) {
        data.barrel = Some(barrel);
    }
    if let Some(request) = request {
        world.queue_spawn(request);
    }
}
