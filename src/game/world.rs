//! Simulation context
//!
//! [`World`] is the single authoritative instance of an arena: entity slots,
//! the registry, the spatial cache, queued spawns, the tick counter and the
//! seeded RNG. It is created with the arena and dropped when the arena
//! closes; every system receives it explicitly.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use crate::config::ArenaConfig;
use crate::game::constants::{arena_flags, body, color, physics_flags, position_flags};
use crate::game::entity::{EntityId, EntityRegistry, RegistryError};
use crate::game::fields::{
    ArenaBounds, ArenaGroup, HealthGroup, Physics, PhysicsGroup, PositionGroup, RelationsGroup, Style,
    StyleGroup,
};
use crate::game::input::{Controller, Inputs};
use crate::game::spatial::SpatialGrid;
use crate::game::systems::ai::AiState;
use crate::net::protocol::Notification;
use crate::util::aabb::Aabb;
use crate::util::vec2::Vec2;

/// Wire type tag of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntityKind {
    Arena = 0,
    Body,
    Barrel,
    Mount,
    Turret,
    Bullet,
    Drone,
    Minion,
    Trap,
    Shape,
}

impl EntityKind {
    /// Kinds that cannot exist without a health group
    pub fn requires_health(self) -> bool {
        matches!(
            self,
            EntityKind::Body
                | EntityKind::Bullet
                | EntityKind::Drone
                | EntityKind::Minion
                | EntityKind::Trap
                | EntityKind::Shape
        )
    }
}

/// World-space transform resolved during physics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Transform {
    pub position: Vec2,
    pub angle: f32,
}

/// Level-driven tank body
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState {
    pub base_size: f32,
    pub level: u32,
}

impl BodyState {
    pub fn new(base_size: f32) -> Self {
        Self { base_size, level: 1 }
    }

    /// size = base * 1.01^(level - 1)
    pub fn size(&self) -> f32 {
        self.base_size * body::SIZE_GROWTH.powi(self.level.saturating_sub(1) as i32)
    }

    pub fn max_health(&self) -> f32 {
        body::BASE_MAX_HEALTH + body::HEALTH_PER_LEVEL * self.level.saturating_sub(1) as f32
    }
}

/// Minion armament, picked by the tank that spawns it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MinionVariant {
    /// One barrel
    #[default]
    Standard,
    /// Two offset barrels firing alternately
    Twin,
    /// One heavy barrel, a pronounced decoration and a longer view range
    Destroyer,
}

/// What a barrel fires
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProjectileKind {
    Bullet,
    Drone,
    Minion { variant: MinionVariant },
    Trap,
    /// Trap carrying its own AI turret
    AutoTrap { raider: bool },
}

/// Projectile template carried by a barrel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectileSpec {
    pub kind: ProjectileKind,
    /// Multiplier on the base projectile speed
    pub speed: f32,
    /// Size relative to half the barrel width
    pub size_ratio: f32,
    pub damage: f32,
    pub health: f32,
    pub lifetime_ticks: u32,
    pub absorption_factor: f32,
}

/// Barrel geometry and fire rate, in units of a base-size (50) parent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarrelSpec {
    /// Direction relative to the parent
    pub angle: f32,
    /// Lateral offset from the parent's center line
    pub offset: f32,
    pub length: f32,
    pub width: f32,
    pub reload_ticks: u32,
    /// Ticks before the first shot after the trigger is pulled
    pub delay_ticks: u32,
    pub projectile: ProjectileSpec,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarrelState {
    pub spec: BarrelSpec,
    /// Ticks until the barrel may fire again
    pub cooldown: u32,
}

impl BarrelState {
    pub fn new(spec: BarrelSpec) -> Self {
        Self {
            spec,
            cooldown: spec.delay_ticks,
        }
    }
}

/// Which parent dimension a launcher's size derives from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeBasis {
    Width,
    Size,
}

/// End of the parent barrel a launcher sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherTip {
    Front,
    Back,
}

/// How a mounted sub-object derives its shape from its parent every tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MountStrategy {
    /// Decoration sized as a share of the parent, optionally mirroring its
    /// opacity
    FollowParent { size_ratio: f32, copy_opacity: bool },
    /// Rectangle attached to one end of a barrel
    Launcher {
        width_ratio: f32,
        size_basis: SizeBasis,
        size_ratio: f32,
        tip: LauncherTip,
    },
    /// Plate stacked on the front of a launcher, sized from the barrel the
    /// launcher sits on
    LauncherCap { width_ratio: f32, size_ratio: f32 },
}

/// Projectile bookkeeping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectileState {
    pub kind: ProjectileKind,
    /// Remaining ticks
    pub lifetime: u32,
    /// Root body that fired it
    pub owner: EntityId,
    /// Removed as soon as the owner is gone (drones, minions)
    pub dies_with_owner: bool,
}

/// Soft deletion countdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deletion {
    pub remaining: u32,
    pub total: u32,
}

/// One entity slot
///
/// Groups are always present except health and arena, which only some kinds
/// carry. Capabilities are plain optional data; the systems dispatch on
/// them instead of on the kind.
#[derive(Debug, Clone)]
pub struct EntityData {
    pub id: EntityId,
    pub kind: EntityKind,
    pub relations: RelationsGroup,
    pub position: PositionGroup,
    pub physics: PhysicsGroup,
    pub style: StyleGroup,
    pub health: Option<HealthGroup>,
    pub arena: Option<ArenaGroup>,
    /// Weak back-references, insertion ordered
    pub children: SmallVec<[EntityId; 4]>,
    pub velocity: Vec2,
    pub transform: Transform,
    pub acceleration: f32,
    pub controller: Controller,
    pub inputs: Inputs,
    pub ai: Option<AiState>,
    pub body: Option<BodyState>,
    pub barrel: Option<BarrelState>,
    pub mount: Option<MountStrategy>,
    pub projectile: Option<ProjectileState>,
    /// Contact damage per colliding tick
    pub damage: f32,
    pub deletion: Option<Deletion>,
    pub spawn_tick: u64,
}

impl EntityData {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            id: EntityId::new(0, 0),
            kind,
            relations: RelationsGroup::default(),
            position: PositionGroup::default(),
            physics: PhysicsGroup::default(),
            style: StyleGroup::default(),
            health: None,
            arena: None,
            children: SmallVec::new(),
            velocity: Vec2::ZERO,
            transform: Transform::default(),
            acceleration: 0.0,
            controller: Controller::None,
            inputs: Inputs::default(),
            ai: None,
            body: None,
            barrel: None,
            mount: None,
            projectile: None,
            damage: 0.0,
            deletion: None,
            spawn_tick: 0,
        }
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        let values = self.position.values_mut_untracked();
        values.x = x;
        values.y = y;
        self
    }

    pub fn with_angle(mut self, angle: f32) -> Self {
        self.position.values_mut_untracked().angle = angle;
        self
    }

    pub fn with_parent(mut self, parent: EntityId) -> Self {
        self.relations.values_mut_untracked().parent = Some(parent);
        self
    }

    pub fn with_owner(mut self, owner: EntityId) -> Self {
        self.relations.values_mut_untracked().owner = Some(owner);
        self
    }

    pub fn with_team(mut self, team: EntityId) -> Self {
        self.relations.values_mut_untracked().team = Some(team);
        self
    }

    pub fn with_physics(mut self, physics: Physics) -> Self {
        self.physics = PhysicsGroup::new(physics);
        self
    }

    pub fn with_style(mut self, style: Style) -> Self {
        self.style = StyleGroup::new(style);
        self
    }

    pub fn with_health(mut self, max_health: f32) -> Self {
        self.health = Some(HealthGroup::with_max(max_health));
        self
    }

    pub fn with_controller(mut self, controller: Controller) -> Self {
        self.controller = controller;
        self
    }

    pub fn with_ai(mut self, ai: AiState) -> Self {
        self.ai = Some(ai);
        self
    }

    pub fn with_body(mut self, state: BodyState) -> Self {
        self.physics.values_mut_untracked().size = state.size();
        self.body = Some(state);
        self
    }

    pub fn with_barrel(mut self, spec: BarrelSpec) -> Self {
        self.barrel = Some(BarrelState::new(spec));
        self
    }

    pub fn with_mount(mut self, strategy: MountStrategy) -> Self {
        self.mount = Some(strategy);
        self
    }

    pub fn with_projectile(mut self, state: ProjectileState) -> Self {
        self.projectile = Some(state);
        self
    }

    pub fn with_velocity(mut self, velocity: Vec2) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_acceleration(mut self, acceleration: f32) -> Self {
        self.acceleration = acceleration;
        self
    }

    pub fn with_damage(mut self, damage: f32) -> Self {
        self.damage = damage;
        self
    }

    pub fn with_inputs(mut self, inputs: Inputs) -> Self {
        self.inputs = inputs;
        self
    }

    #[inline]
    pub fn is_deleting(&self) -> bool {
        self.deletion.is_some()
    }

    /// Local position from the position group
    #[inline]
    pub fn local_position(&self) -> Vec2 {
        let values = self.position.values();
        Vec2::new(values.x, values.y)
    }

    /// Broad-phase box around the world transform
    pub fn bounds(&self) -> Aabb {
        let physics = self.physics.values();
        let (half_width, half_height) = if physics.sides == 2 {
            // Rectangle: size is the length, width the thickness
            let (a, b) = (physics.size * 0.5, physics.width * 0.5);
            let (sin, cos) = self.transform.angle.sin_cos();
            (cos.abs() * a + sin.abs() * b, sin.abs() * a + cos.abs() * b)
        } else {
            (physics.size, physics.size)
        };
        Aabb::from_center(self.transform.position, half_width, half_height)
    }

    /// Collision radius for the narrow phase
    pub fn radius(&self) -> f32 {
        let physics = self.physics.values();
        if physics.sides == 2 {
            physics.size.max(physics.width) * 0.5
        } else {
            physics.size
        }
    }

    fn clear_dirty(&mut self) {
        self.relations.clear_dirty();
        self.position.clear_dirty();
        self.physics.clear_dirty();
        self.style.clear_dirty();
        if let Some(health) = self.health.as_mut() {
            health.clear_dirty();
        }
        if let Some(arena) = self.arena.as_mut() {
            arena.clear_dirty();
        }
    }
}

/// Projectile waiting to be materialized at lifecycle finalization
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    pub barrel: EntityId,
    /// Root body credited with the projectile
    pub owner: EntityId,
    pub team: EntityId,
    pub spec: ProjectileSpec,
    pub position: Vec2,
    pub angle: f32,
    pub barrel_width: f32,
    pub color: u32,
}

/// Scheduler phase currently executing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPhase {
    Idle,
    Input,
    Ai,
    Physics,
    Spatial,
    Collision,
    Lifecycle,
    Flush,
}

impl TickPhase {
    /// Registry liveness may only change between ticks or while finalizing
    pub fn allows_registry_mutation(self) -> bool {
        matches!(self, TickPhase::Idle | TickPhase::Lifecycle)
    }
}

/// Arena lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaState {
    Open,
    /// No new players; waiting for the last one to leave
    Closing,
    Closed,
}

/// Fire-and-forget hook for user-facing messages
pub trait ClientNotifier: Send {
    /// Deliver to every connected viewer
    fn notify(&self, notification: Notification);
}

/// Notifier that only logs
pub struct LogNotifier;

impl ClientNotifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        debug!("notify: {}", notification.text);
    }
}

/// Authoritative arena state
pub struct World {
    registry: EntityRegistry,
    entities: Vec<Option<EntityData>>,
    spatial: SpatialGrid,
    spawn_queue: Vec<SpawnRequest>,
    tick: u64,
    phase: TickPhase,
    arena: EntityId,
    arena_state: ArenaState,
    config: ArenaConfig,
    rng: StdRng,
    notifier: Box<dyn ClientNotifier>,
}

impl World {
    /// Create the world and its arena entity (always id 0)
    pub fn new(config: ArenaConfig, notifier: Box<dyn ClientNotifier>) -> Result<Self, RegistryError> {
        let mut world = Self {
            registry: EntityRegistry::new(config.max_entities),
            entities: Vec::new(),
            spatial: SpatialGrid::new(config.grid_cell_size),
            spawn_queue: Vec::new(),
            tick: 0,
            phase: TickPhase::Idle,
            arena: EntityId::new(0, 0),
            arena_state: ArenaState::Open,
            rng: StdRng::seed_from_u64(config.sim_seed),
            notifier,
            config,
        };

        let (half_width, half_height) = (world.config.arena_width / 2.0, world.config.arena_height / 2.0);
        let mut arena = EntityData::new(EntityKind::Arena).with_style(Style {
            color: color::NEUTRAL,
            ..Default::default()
        });
        arena.arena = Some(ArenaGroup::new(ArenaBounds {
            flags: arena_flags::GAME_READY_START,
            left_x: -half_width,
            right_x: half_width,
            top_y: -half_height,
            bottom_y: half_height,
        }));
        world.arena = world.spawn(arena)?;
        Ok(world)
    }

    #[inline]
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    #[inline]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub(crate) fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    #[inline]
    pub fn phase(&self) -> TickPhase {
        self.phase
    }

    pub(crate) fn enter_phase(&mut self, phase: TickPhase) {
        self.phase = phase;
    }

    #[inline]
    pub fn arena_id(&self) -> EntityId {
        self.arena
    }

    #[inline]
    pub fn arena_state(&self) -> ArenaState {
        self.arena_state
    }

    pub(crate) fn set_arena_state(&mut self, state: ArenaState) {
        self.arena_state = state;
    }

    /// Arena bounds as a box
    pub fn arena_bounds(&self) -> Aabb {
        match self.get(self.arena).and_then(|arena| arena.arena.as_ref()) {
            Some(group) => {
                let v = group.values();
                Aabb::new(Vec2::new(v.left_x, v.top_y), Vec2::new(v.right_x, v.bottom_y))
            }
            None => {
                let (hw, hh) = (self.config.arena_width / 2.0, self.config.arena_height / 2.0);
                Aabb::from_center(Vec2::ZERO, hw, hh)
            }
        }
    }

    #[inline]
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    #[inline]
    pub fn contains(&self, entity: EntityId) -> bool {
        self.registry.exists(entity)
    }

    /// Live entity data; dead references resolve to `None`
    pub fn get(&self, entity: EntityId) -> Option<&EntityData> {
        if !self.registry.exists(entity) {
            return None;
        }
        self.entities.get(entity.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, entity: EntityId) -> Option<&mut EntityData> {
        if !self.registry.exists(entity) {
            return None;
        }
        self.entities.get_mut(entity.index()).and_then(Option::as_mut)
    }

    /// Snapshot of live ids in ascending order
    pub fn live_ids(&self) -> Vec<EntityId> {
        self.registry.iter_live().collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Allocate a slot for `data`, link it under its parent and index it
    pub fn spawn(&mut self, mut data: EntityData) -> Result<EntityId, RegistryError> {
        debug_assert!(
            self.phase.allows_registry_mutation(),
            "spawn during {:?}",
            self.phase
        );
        let id = self.registry.allocate()?;
        data.id = id;
        data.spawn_tick = self.tick;
        data.transform = self.compose_transform(&data);

        if let Some(parent) = data.relations.values().parent {
            if let Some(parent_data) = self.get_mut(parent) {
                parent_data.children.push(id);
            }
        }

        let slot = id.index();
        if slot >= self.entities.len() {
            self.entities.resize_with(slot + 1, || None);
        }
        let indexed = data.kind != EntityKind::Arena;
        let bounds = data.bounds();
        self.entities[slot] = Some(data);
        if indexed {
            self.spatial.update(id, bounds);
        }
        Ok(id)
    }

    /// Free a slot immediately. Children are left to notice the dead parent
    /// on their next update.
    pub fn free(&mut self, entity: EntityId) -> bool {
        debug_assert!(
            self.phase.allows_registry_mutation(),
            "free during {:?}",
            self.phase
        );
        if !self.registry.exists(entity) {
            return false;
        }
        let data = self.entities.get_mut(entity.index()).and_then(Option::take);
        if let Some(parent) = data.and_then(|d| d.relations.values().parent) {
            if let Some(parent_data) = self.get_mut(parent) {
                parent_data.children.retain(|child| *child != entity);
            }
        }
        self.spatial.remove(entity);
        self.registry.free(entity)
    }

    /// Start a soft deletion. Returns false if the entity is dead or
    /// already fading.
    pub fn request_deletion(&mut self, entity: EntityId, ticks: u32) -> bool {
        match self.get_mut(entity) {
            Some(data) if data.deletion.is_none() => {
                data.deletion = Some(Deletion {
                    remaining: ticks,
                    total: ticks.max(1),
                });
                true
            }
            _ => false,
        }
    }

    pub fn queue_spawn(&mut self, request: SpawnRequest) {
        self.spawn_queue.push(request);
    }

    pub(crate) fn take_spawn_queue(&mut self) -> Vec<SpawnRequest> {
        std::mem::take(&mut self.spawn_queue)
    }

    #[inline]
    pub fn pending_spawns(&self) -> usize {
        self.spawn_queue.len()
    }

    /// Live parent, if any
    pub fn parent_of(&self, entity: EntityId) -> Option<EntityId> {
        self.get(entity)
            .and_then(|data| data.relations.values().parent)
            .filter(|parent| self.contains(*parent))
    }

    /// Topmost live ancestor (the entity itself when it has none)
    pub fn root_of(&self, entity: EntityId) -> EntityId {
        let mut current = entity;
        for _ in 0..self.registry.capacity() {
            match self.parent_of(current) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current
    }

    /// Number of live ancestors
    pub fn depth_of(&self, entity: EntityId) -> usize {
        let mut depth = 0;
        let mut current = entity;
        while let Some(parent) = self.parent_of(current) {
            depth += 1;
            current = parent;
            if depth >= self.registry.capacity() {
                break;
            }
        }
        depth
    }

    /// Team reference, falling back to the entity itself
    pub fn team_of(&self, entity: EntityId) -> EntityId {
        self.get(entity)
            .and_then(|data| data.relations.values().team)
            .filter(|team| self.contains(*team))
            .unwrap_or(entity)
    }

    /// Owner reference, falling back to the entity itself
    pub fn owner_of(&self, entity: EntityId) -> EntityId {
        self.get(entity)
            .and_then(|data| data.relations.values().owner)
            .filter(|owner| self.contains(*owner))
            .unwrap_or(entity)
    }

    /// Inputs of the nearest ancestor (or self) that has a controller
    pub fn controlling_inputs(&self, entity: EntityId) -> Option<Inputs> {
        let mut current = Some(entity);
        let mut hops = 0;
        while let Some(id) = current {
            let data = self.get(id)?;
            if data.controller.is_some() {
                return Some(data.inputs);
            }
            hops += 1;
            if hops > self.registry.capacity() {
                return None;
            }
            current = self.parent_of(id);
        }
        None
    }

    /// World transform from the parent's current transform and the local
    /// position group
    pub fn compose_transform(&self, data: &EntityData) -> Transform {
        let local = data.local_position();
        let local_angle = data.position.values().angle;
        match data.relations.values().parent.and_then(|p| self.get(p)) {
            Some(parent) => {
                let absolute = data.position.has_flags(position_flags::ABSOLUTE_ROTATION);
                Transform {
                    position: parent.transform.position + local.rotate(parent.transform.angle),
                    angle: if absolute {
                        local_angle
                    } else {
                        parent.transform.angle + local_angle
                    },
                }
            }
            None => Transform {
                position: local,
                angle: local_angle,
            },
        }
    }

    #[inline]
    pub fn spatial(&self) -> &SpatialGrid {
        &self.spatial
    }

    /// Re-derive every live entity's box from its current transform
    pub fn rebuild_spatial(&mut self) {
        self.spatial.clear();
        for slot in self.entities.iter().flatten() {
            if slot.kind != EntityKind::Arena {
                self.spatial.update(slot.id, slot.bounds());
            }
        }
    }

    #[inline]
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Fire the notify hook for every viewer
    pub fn notify_all(&self, notification: Notification) {
        self.notifier.notify(notification);
    }

    /// Live, non-deleting bodies driven by a viewer
    pub fn player_bodies(&self) -> Vec<EntityId> {
        self.entities
            .iter()
            .flatten()
            .filter(|data| {
                data.kind == EntityKind::Body
                    && matches!(data.controller, Controller::Player(_))
                    && !data.is_deleting()
            })
            .map(|data| data.id)
            .collect()
    }

    /// Whether `entity` ignores the arena clamp
    pub fn can_escape_arena(&self, entity: EntityId) -> bool {
        self.get(entity)
            .is_some_and(|data| data.physics.has_flags(physics_flags::CAN_ESCAPE_ARENA))
    }

    /// Reset every group's dirty bits after all viewers were served
    pub fn clear_dirty(&mut self) {
        for data in self.entities.iter_mut().flatten() {
            data.clear_dirty();
        }
    }
}

/// Physics values for a plain circle of `size`
pub fn circle(size: f32) -> Physics {
    Physics {
        sides: 1,
        size,
        ..Default::default()
    }
}
