//! Autonomous unit decisions
//!
//! Each AI-carrying entity runs a small state machine once per tick and
//! produces an [`Inputs`] record. The physics phase consumes it exactly like
//! a human viewer's input. Target acquisition goes through the spatial index
//! and is fully deterministic: nearest eligible candidate, ties to the
//! lowest id.

use std::f32::consts::PI;

use crate::game::constants::{ai as ai_consts, input_flags, projectile};
use crate::game::entity::EntityId;
use crate::game::input::{Controller, Inputs};
use crate::game::world::{EntityKind, ProjectileKind, World};
use crate::util::vec2::Vec2;

/// Decision state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AiMode {
    /// No target, default
    #[default]
    Idle,
    /// Looking for a candidate
    Search,
    /// Engaging the current target
    Attack,
    /// Retreating from the current target
    Fear,
}

/// Per-unit AI state
#[derive(Debug, Clone, PartialEq)]
pub struct AiState {
    pub mode: AiMode,
    pub target: Option<EntityId>,
    pub view_range: f32,
    /// Health ratio that triggers a retreat
    pub fear_health_ratio: f32,
    /// Projectile speed used to lead moving targets; zero aims straight
    pub lead_speed: f32,
    /// Stationary units (turrets) only aim
    pub mobile: bool,
}

impl AiState {
    pub fn new(view_range: f32) -> Self {
        Self {
            mode: AiMode::Idle,
            target: None,
            view_range,
            fear_health_ratio: ai_consts::FEAR_HEALTH_RATIO,
            lead_speed: projectile::BASE_SPEED,
            mobile: true,
        }
    }

    pub fn stationary(mut self) -> Self {
        self.mobile = false;
        self
    }

}

impl Default for AiState {
    fn default() -> Self {
        Self::new(ai_consts::DEFAULT_VIEW_RANGE)
    }
}

/// Who a unit fights for
struct Allegiance {
    me: EntityId,
    root: EntityId,
    team: EntityId,
    owner: EntityId,
}

impl Allegiance {
    fn of(world: &World, entity: EntityId) -> Self {
        let root = world.root_of(entity);
        Self {
            me: entity,
            root,
            team: world.team_of(root),
            owner: world.owner_of(root),
        }
    }

    /// Opposing, live, damageable root entity
    fn is_eligible(&self, world: &World, candidate: EntityId) -> bool {
        if candidate == self.me || candidate == self.root {
            return false;
        }
        let Some(data) = world.get(candidate) else {
            return false;
        };
        if data.kind == EntityKind::Arena || data.is_deleting() || data.health.is_none() {
            return false;
        }
        if world.parent_of(candidate).is_some() {
            return false;
        }
        world.team_of(candidate) != self.team && world.owner_of(candidate) != self.owner
    }
}

/// Nearest eligible candidate within `range`, lowest id on ties
fn acquire(world: &World, allegiance: &Allegiance, origin: Vec2, range: f32) -> Option<EntityId> {
    let range_sq = range * range;
    let mut best: Option<(f32, EntityId)> = None;
    // retrieve() yields ascending ids, so a strict comparison keeps the lowest
    for candidate in world.spatial().retrieve(origin.x, origin.y, range, range) {
        if !allegiance.is_eligible(world, candidate) {
            continue;
        }
        let Some(data) = world.get(candidate) else {
            continue;
        };
        let dist_sq = origin.distance_sq_to(data.transform.position);
        if dist_sq > range_sq {
            continue;
        }
        if best.map_or(true, |(best_dist, _)| dist_sq < best_dist) {
            best = Some((dist_sq, candidate));
        }
    }
    best.map(|(_, id)| id)
}

fn target_still_valid(
    world: &World,
    allegiance: &Allegiance,
    origin: Vec2,
    range: f32,
    target: Option<EntityId>,
) -> bool {
    let Some(target) = target else {
        return false;
    };
    if !allegiance.is_eligible(world, target) {
        return false;
    }
    world
        .get(target)
        .is_some_and(|data| origin.distance_sq_to(data.transform.position) <= range * range)
}

/// Aim point leading a moving target
fn lead(origin: Vec2, target_position: Vec2, target_velocity: Vec2, speed: f32) -> Vec2 {
    if speed <= 0.0 {
        return target_position;
    }
    let time = origin.distance_to(target_position) / speed;
    target_position + target_velocity * time
}

/// Evaluate one unit without mutating the world
///
/// Returns the next state and the inputs it wants applied, or `None` when
/// the entity is dead or carries no AI.
pub fn think(world: &World, entity: EntityId) -> Option<(AiState, Inputs)> {
    let data = world.get(entity)?;
    let mut state = data.ai.clone()?;
    let origin = data.transform.position;
    let previous_mouse = data.inputs.mouse;

    if data.controller != Controller::Ai || data.is_deleting() {
        state.mode = AiMode::Idle;
        state.target = None;
        return Some((
            state,
            Inputs {
                mouse: previous_mouse,
                ..Default::default()
            },
        ));
    }

    let allegiance = Allegiance::of(world, entity);
    let range = state.view_range;

    if state.mode == AiMode::Idle {
        state.mode = AiMode::Search;
    }

    if matches!(state.mode, AiMode::Attack | AiMode::Fear)
        && !target_still_valid(world, &allegiance, origin, range, state.target)
    {
        // Replacement must be found this tick or the unit goes idle
        match acquire(world, &allegiance, origin, range) {
            Some(replacement) => {
                state.target = Some(replacement);
                state.mode = AiMode::Attack;
            }
            None => {
                state.target = None;
                state.mode = AiMode::Idle;
            }
        }
    }

    if state.mode == AiMode::Search {
        if let Some(found) = acquire(world, &allegiance, origin, range) {
            state.target = Some(found);
            state.mode = AiMode::Attack;
        }
    }

    let health_ratio = world
        .get(allegiance.root)
        .and_then(|root| root.health.as_ref())
        .map(|health| health.ratio());
    let owner_repelling = allegiance.owner != allegiance.root
        && world
            .get(allegiance.owner)
            .is_some_and(|owner| owner.inputs.attempting_repel());
    let threatened = health_ratio.is_some_and(|ratio| ratio < state.fear_health_ratio);
    let recovered = health_ratio
        .map_or(true, |ratio| ratio >= state.fear_health_ratio + ai_consts::FEAR_RECOVERY_MARGIN);

    match state.mode {
        AiMode::Attack if threatened || owner_repelling => state.mode = AiMode::Fear,
        AiMode::Fear if recovered && !owner_repelling => state.mode = AiMode::Attack,
        _ => {}
    }

    let target = state.target.and_then(|t| world.get(t));
    let inputs = match (state.mode, target) {
        (AiMode::Attack, Some(target)) => {
            let aim = lead(origin, target.transform.position, target.velocity, state.lead_speed);
            Inputs {
                flags: input_flags::LEFT_CLICK,
                movement_angle: origin.angle_to_point(target.transform.position),
                movement_magnitude: if state.mobile { 1.0 } else { 0.0 },
                mouse: aim,
            }
        }
        (AiMode::Fear, Some(target)) => Inputs {
            flags: input_flags::LEFT_CLICK,
            movement_angle: origin.angle_to_point(target.transform.position) + PI,
            movement_magnitude: if state.mobile { 1.0 } else { 0.0 },
            mouse: target.transform.position,
        },
        _ => Inputs {
            mouse: previous_mouse,
            ..Default::default()
        },
    };

    Some((state, inputs))
}

/// Heading toward `aim`, reversed once inside `hold_radius`
fn approach(origin: Vec2, aim: Vec2, hold_radius: f32) -> f32 {
    let angle = origin.angle_to_point(aim);
    if origin.distance_sq_to(aim) < hold_radius * hold_radius {
        angle + PI
    } else {
        angle
    }
}

/// Owner-directed steering for drones and minions
///
/// Runs after the unit's own decision so owner commands take precedence.
/// An idle owner leaves the unit to its own AI state. Returns `None` for
/// anything that is not a live drone or minion with a live owner.
pub fn steer(world: &World, entity: EntityId) -> Option<Inputs> {
    let data = world.get(entity)?;
    let projectile_state = data.projectile?;
    if !matches!(projectile_state.kind, ProjectileKind::Drone | ProjectileKind::Minion { .. }) {
        return None;
    }
    let owner = world.get(projectile_state.owner)?;
    let origin = data.transform.position;
    let commanded = owner.inputs.attempting_shot() || owner.inputs.attempting_repel();
    let mode = data.ai.as_ref().map_or(AiMode::Idle, |state| state.mode);

    if projectile_state.kind == ProjectileKind::Drone {
        let (aim, fleeing) = match mode {
            _ if commanded => (owner.inputs.mouse, owner.inputs.attempting_repel()),
            AiMode::Attack => (data.inputs.mouse, false),
            AiMode::Fear => (data.inputs.mouse, true),
            // Nothing to fight: fall back to the owner
            AiMode::Idle | AiMode::Search => (owner.transform.position, false),
        };
        let angle = origin.angle_to_point(aim);
        return Some(Inputs {
            flags: 0,
            movement_angle: if fleeing { angle + PI } else { angle },
            movement_magnitude: 1.0,
            mouse: aim,
        });
    }

    // Cruise along the current heading, aiming straight ahead
    let cruise = Inputs {
        flags: 0,
        movement_angle: data.transform.angle,
        movement_magnitude: 1.0,
        mouse: origin + Vec2::from_angle(data.transform.angle) * data.radius().max(1.0),
    };
    let age = world.tick().saturating_sub(data.spawn_tick);
    if age < projectile::MINION_WARMUP_TICKS {
        return Some(cruise);
    }

    let hold_radius = projectile::MINION_FOCUS_RADIUS_SQ.sqrt() / 4.0;
    if commanded {
        let aim = owner.inputs.mouse;
        let angle = if owner.inputs.attempting_repel() {
            origin.angle_to_point(aim) + PI
        } else {
            approach(origin, aim, hold_radius)
        };
        return Some(Inputs {
            flags: input_flags::LEFT_CLICK,
            movement_angle: angle,
            movement_magnitude: 1.0,
            mouse: aim,
        });
    }

    match mode {
        AiMode::Attack | AiMode::Fear => {
            let angle = if mode == AiMode::Fear {
                data.inputs.movement_angle
            } else {
                approach(origin, data.inputs.mouse, hold_radius)
            };
            Some(Inputs {
                movement_angle: angle,
                movement_magnitude: 1.0,
                ..data.inputs
            })
        }
        AiMode::Idle | AiMode::Search => Some(cruise),
    }
}

/// Run every AI unit in ascending id order
///
/// Later units observe the inputs earlier units wrote this tick.
pub fn update(world: &mut World) {
    for entity in world.live_ids() {
        if let Some((state, inputs)) = think(world, entity) {
            if let Some(data) = world.get_mut(entity) {
                if data.controller == Controller::Ai {
                    data.inputs = inputs;
                }
                data.ai = Some(state);
            }
        }
        if let Some(inputs) = steer(world, entity) {
            if let Some(data) = world.get_mut(entity) {
                data.inputs = inputs;
            }
        }
    }
}
