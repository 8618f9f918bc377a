//! Entity factories
//!
//! Builds composite entities (tanks with barrels and launchers, projectiles
//! with their own mounts) out of plain [`EntityData`] plus capabilities.
//! Stat values are representative defaults, not a balance table.

use std::f32::consts::FRAC_PI_2;

use crate::game::constants::{ai, body, color, mount, physics, physics_flags, projectile, style_flags};
use crate::game::entity::{EntityId, RegistryError};
use crate::game::fields::{Physics, Style};
use crate::game::input::{Controller, Inputs};
use crate::game::systems::ai::AiState;
use crate::game::systems::physics::derive_shape;
use crate::game::world::{
    circle, BarrelSpec, BodyState, EntityData, EntityKind, LauncherTip, MinionVariant, MountStrategy,
    ProjectileKind, ProjectileSpec, ProjectileState, SizeBasis, SpawnRequest, World,
};
use crate::util::vec2::Vec2;

/// Extra parts mounted on a barrel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrelAddon {
    None,
    TrapLauncher,
    /// Trap launcher with a wider cap plate stacked on its front
    EngineerTrapLauncher,
    /// Front and back launcher plates
    MinionLauncher,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarrelPreset {
    pub spec: BarrelSpec,
    pub addon: BarrelAddon,
}

/// Tank archetypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loadout {
    Basic,
    Trapper,
    Overseer,
    Factory,
    /// Factory whose minions carry twin barrels
    Industry,
    /// Factory whose minions carry one heavy barrel
    Manufacturer,
    Engineer,
}

fn bullet() -> ProjectileSpec {
    ProjectileSpec {
        kind: ProjectileKind::Bullet,
        speed: 1.0,
        size_ratio: 1.0,
        damage: 7.0,
        health: 10.0,
        lifetime_ticks: 90,
        absorption_factor: 1.0,
    }
}

fn trap(kind: ProjectileKind) -> ProjectileSpec {
    ProjectileSpec {
        kind,
        speed: 0.8,
        size_ratio: 0.8,
        damage: 8.0,
        health: 20.0,
        lifetime_ticks: 300,
        absorption_factor: 0.5,
    }
}

fn minion(variant: MinionVariant) -> ProjectileSpec {
    ProjectileSpec {
        kind: ProjectileKind::Minion { variant },
        speed: 0.6,
        size_ratio: 1.0,
        damage: 7.0,
        health: 30.0,
        lifetime_ticks: u32::MAX,
        absorption_factor: 1.0,
    }
}

impl Loadout {
    pub fn barrels(self) -> Vec<BarrelPreset> {
        let gun = |angle: f32, length: f32, reload_ticks: u32, projectile: ProjectileSpec, addon| BarrelPreset {
            spec: BarrelSpec {
                angle,
                offset: 0.0,
                length,
                width: 42.0,
                reload_ticks,
                delay_ticks: 0,
                projectile,
            },
            addon,
        };
        match self {
            Loadout::Basic => vec![gun(0.0, 95.0, 15, bullet(), BarrelAddon::None)],
            Loadout::Trapper => vec![gun(0.0, 60.0, 45, trap(ProjectileKind::Trap), BarrelAddon::TrapLauncher)],
            Loadout::Overseer => {
                let drone = ProjectileSpec {
                    kind: ProjectileKind::Drone,
                    speed: 0.8,
                    size_ratio: 1.0,
                    damage: 7.0,
                    health: 20.0,
                    lifetime_ticks: u32::MAX,
                    absorption_factor: 1.0,
                };
                vec![
                    gun(FRAC_PI_2, 70.0, 60, drone, BarrelAddon::None),
                    gun(-FRAC_PI_2, 70.0, 60, drone, BarrelAddon::None),
                ]
            }
            Loadout::Factory => vec![gun(0.0, 70.0, 90, minion(MinionVariant::Standard), BarrelAddon::MinionLauncher)],
            Loadout::Industry => vec![gun(0.0, 70.0, 90, minion(MinionVariant::Twin), BarrelAddon::MinionLauncher)],
            Loadout::Manufacturer => vec![gun(
                0.0,
                70.0,
                120,
                minion(MinionVariant::Destroyer),
                BarrelAddon::MinionLauncher,
            )],
            Loadout::Engineer => vec![gun(
                0.0,
                60.0,
                60,
                trap(ProjectileKind::AutoTrap { raider: false }),
                BarrelAddon::EngineerTrapLauncher,
            )],
        }
    }
}

fn tank_data(x: f32, y: f32, controller: Controller) -> EntityData {
    EntityData::new(EntityKind::Body)
        .with_position(x, y)
        .with_body(BodyState::new(body::BASE_SIZE))
        .with_health(body::BASE_MAX_HEALTH)
        .with_style(Style {
            color: color::TANK,
            ..Default::default()
        })
        .with_acceleration(physics::BASE_ACCELERATION)
        .with_damage(body::CONTACT_DAMAGE)
        .with_controller(controller)
}

fn attach_loadout(world: &mut World, tank: EntityId, loadout: Loadout) -> Result<(), RegistryError> {
    for preset in loadout.barrels() {
        spawn_barrel(world, tank, preset)?;
    }
    Ok(())
}

/// Player-controlled (or inert) tank
pub fn spawn_tank(
    world: &mut World,
    x: f32,
    y: f32,
    controller: Controller,
    loadout: Loadout,
) -> Result<EntityId, RegistryError> {
    let tank = world.spawn(tank_data(x, y, controller))?;
    attach_loadout(world, tank, loadout)?;
    Ok(tank)
}

/// Autonomous tank
pub fn spawn_bot(world: &mut World, x: f32, y: f32, loadout: Loadout) -> Result<EntityId, RegistryError> {
    let data = tank_data(x, y, Controller::Ai).with_ai(AiState::new(ai::DEFAULT_VIEW_RANGE));
    let tank = world.spawn(data)?;
    attach_loadout(world, tank, loadout)?;
    Ok(tank)
}

/// Neutral polygon
pub fn spawn_shape(
    world: &mut World,
    x: f32,
    y: f32,
    sides: u32,
    size: f32,
    health: f32,
) -> Result<EntityId, RegistryError> {
    world.spawn(
        EntityData::new(EntityKind::Shape)
            .with_position(x, y)
            .with_physics(Physics {
                sides,
                size,
                push_factor: 8.0,
                absorption_factor: 0.5,
                ..Default::default()
            })
            .with_style(Style {
                color: color::SHAPE,
                ..Default::default()
            })
            .with_health(health)
            .with_damage(body::CONTACT_DAMAGE),
    )
}

/// Barrel (plus addons) under `parent`
pub fn spawn_barrel(world: &mut World, parent: EntityId, preset: BarrelPreset) -> Result<EntityId, RegistryError> {
    let barrel = world.spawn(
        EntityData::new(EntityKind::Barrel)
            .with_parent(parent)
            .with_physics(Physics {
                sides: 2,
                ..Default::default()
            })
            .with_style(Style {
                color: color::BARREL,
                ..Default::default()
            })
            .with_barrel(preset.spec),
    )?;
    derive_shape(world, barrel);

    let trap_launcher = MountStrategy::Launcher {
        width_ratio: 1.0,
        size_basis: SizeBasis::Width,
        size_ratio: mount::TRAP_LAUNCHER_SIZE_RATIO,
        tip: LauncherTip::Front,
    };
    match preset.addon {
        BarrelAddon::None => {}
        BarrelAddon::TrapLauncher => {
            spawn_launcher(world, barrel, trap_launcher, physics_flags::IS_TRAPEZOID, false)?;
        }
        BarrelAddon::EngineerTrapLauncher => {
            // The cap hangs off the launcher, so it goes when the launcher does
            let launcher = spawn_launcher(world, barrel, trap_launcher, physics_flags::IS_TRAPEZOID, true)?;
            spawn_launcher(
                world,
                launcher,
                MountStrategy::LauncherCap {
                    width_ratio: mount::ENGINEER_CAP_WIDTH_RATIO,
                    size_ratio: mount::ENGINEER_CAP_SIZE_RATIO,
                },
                0,
                true,
            )?;
        }
        BarrelAddon::MinionLauncher => {
            // Both plates are children of the barrel and live exactly as long
            for (size_ratio, tip) in [
                (mount::MINION_LAUNCHER_FRONT_SIZE_RATIO, LauncherTip::Front),
                (mount::MINION_LAUNCHER_BACK_SIZE_RATIO, LauncherTip::Back),
            ] {
                spawn_launcher(
                    world,
                    barrel,
                    MountStrategy::Launcher {
                        width_ratio: mount::MINION_LAUNCHER_WIDTH_RATIO,
                        size_basis: SizeBasis::Size,
                        size_ratio,
                        tip,
                    },
                    0,
                    true,
                )?;
            }
        }
    }
    Ok(barrel)
}

/// Launcher plate under `parent`. Plates always collide as part of their
/// parent.
fn spawn_launcher(
    world: &mut World,
    parent: EntityId,
    strategy: MountStrategy,
    shape_flags: u32,
    above_parent: bool,
) -> Result<EntityId, RegistryError> {
    let mut visibility = style_flags::IS_VISIBLE;
    if above_parent {
        visibility |= style_flags::SHOWS_ABOVE_PARENT;
    }
    let launcher = world.spawn(
        EntityData::new(EntityKind::Mount)
            .with_parent(parent)
            .with_physics(Physics {
                sides: 2,
                flags: shape_flags | physics_flags::DO_CHILDREN_COLLISION,
                ..Default::default()
            })
            .with_style(Style {
                flags: visibility,
                color: color::BARREL,
                ..Default::default()
            })
            .with_mount(strategy),
    )?;
    derive_shape(world, launcher);
    Ok(launcher)
}

/// Hexagonal decoration following the parent's size and fade
fn spawn_pronounced(world: &mut World, parent: EntityId) -> Result<EntityId, RegistryError> {
    let color = world.get(parent).map_or(color::BARREL, |data| data.style.values().color);
    let team = world.team_of(parent);
    let decoration = world.spawn(
        EntityData::new(EntityKind::Mount)
            .with_parent(parent)
            .with_owner(parent)
            .with_team(team)
            .with_physics(Physics {
                sides: mount::PRONOUNCED_SIDES,
                ..Default::default()
            })
            .with_style(Style {
                flags: style_flags::IS_VISIBLE | style_flags::SHOWS_ABOVE_PARENT,
                color,
                ..Default::default()
            })
            .with_mount(MountStrategy::FollowParent {
                size_ratio: mount::PRONOUNCED_SIZE_RATIO,
                copy_opacity: true,
            }),
    )?;
    derive_shape(world, decoration);
    Ok(decoration)
}

/// Thrust that holds `speed` steady against friction
fn cruise_acceleration(speed: f32) -> f32 {
    speed * physics::FRICTION / (1.0 - physics::FRICTION)
}

/// Materialize a queued projectile
///
/// Returns `Ok(None)` when the owner died before the request was processed.
pub fn spawn_projectile(world: &mut World, request: &SpawnRequest) -> Result<Option<EntityId>, RegistryError> {
    if !world.contains(request.owner) {
        return Ok(None);
    }
    let spec = request.spec;
    let speed = projectile::BASE_SPEED * spec.speed;
    let mut size = request.barrel_width * projectile::SIZE_TO_BARREL_WIDTH * spec.size_ratio;
    let heading = Vec2::from_angle(request.angle);

    let kind = match spec.kind {
        ProjectileKind::Bullet => EntityKind::Bullet,
        ProjectileKind::Drone => EntityKind::Drone,
        ProjectileKind::Minion { .. } => EntityKind::Minion,
        ProjectileKind::Trap | ProjectileKind::AutoTrap { .. } => EntityKind::Trap,
    };
    if matches!(spec.kind, ProjectileKind::Minion { .. }) {
        size *= projectile::MINION_SIZE_RATIO;
    }

    let mut data = EntityData::new(kind)
        .with_position(request.position.x, request.position.y)
        .with_angle(request.angle)
        .with_owner(request.owner)
        .with_team(request.team)
        .with_physics(Physics {
            sides: 1,
            size,
            flags: physics_flags::NO_OWN_TEAM_COLLISION | physics_flags::CAN_ESCAPE_ARENA,
            absorption_factor: spec.absorption_factor,
            ..Default::default()
        })
        .with_style(Style {
            color: request.color,
            ..Default::default()
        })
        .with_health(spec.health)
        .with_damage(spec.damage)
        .with_velocity(heading * speed)
        .with_projectile(ProjectileState {
            kind: spec.kind,
            lifetime: spec.lifetime_ticks,
            owner: request.owner,
            dies_with_owner: matches!(spec.kind, ProjectileKind::Drone | ProjectileKind::Minion { .. }),
        });

    match spec.kind {
        ProjectileKind::Bullet => {
            data = data.with_acceleration(cruise_acceleration(speed)).with_inputs(Inputs {
                movement_angle: request.angle,
                movement_magnitude: 1.0,
                ..Default::default()
            });
        }
        ProjectileKind::Drone => {
            data.physics.set_sides(3);
            data = data
                .with_acceleration(cruise_acceleration(speed))
                .with_controller(Controller::Ai)
                .with_ai(AiState::new(projectile::DRONE_VIEW_RANGE));
        }
        ProjectileKind::Minion { variant } => {
            data.physics.remove_flags(physics_flags::NO_OWN_TEAM_COLLISION | physics_flags::CAN_ESCAPE_ARENA);
            data.physics.add_flags(physics_flags::ONLY_SAME_OWNER_COLLISION);
            let view_range = match variant {
                MinionVariant::Destroyer => projectile::MINION_VIEW_RANGE * projectile::DESTROYER_VIEW_RANGE_SCALE,
                MinionVariant::Standard | MinionVariant::Twin => projectile::MINION_VIEW_RANGE,
            };
            data = data
                .with_acceleration(cruise_acceleration(speed))
                .with_controller(Controller::Ai)
                .with_ai(AiState::new(view_range));
        }
        ProjectileKind::Trap | ProjectileKind::AutoTrap { .. } => {
            data.physics.set_sides(3);
            data.style.add_flags(style_flags::IS_STAR);
        }
    }
    let id = world.spawn(data)?;

    match spec.kind {
        ProjectileKind::Minion { variant } => {
            for barrel in minion_barrels(variant) {
                spawn_barrel(
                    world,
                    id,
                    BarrelPreset {
                        spec: barrel,
                        addon: BarrelAddon::None,
                    },
                )?;
            }
            if variant == MinionVariant::Destroyer {
                spawn_pronounced(world, id)?;
            }
        }
        ProjectileKind::AutoTrap { raider } => {
            spawn_trap_turret(world, id, request, raider)?;
        }
        _ => {}
    }
    Ok(Some(id))
}

/// Guns a minion carries
fn minion_barrels(variant: MinionVariant) -> Vec<BarrelSpec> {
    let gun = BarrelSpec {
        angle: 0.0,
        offset: 0.0,
        length: 80.0,
        width: 40.0,
        reload_ticks: 30,
        delay_ticks: 0,
        projectile: ProjectileSpec {
            damage: 4.0,
            health: 6.0,
            ..bullet()
        },
    };
    match variant {
        MinionVariant::Standard => vec![gun],
        MinionVariant::Twin => {
            let twin = BarrelSpec {
                projectile: ProjectileSpec {
                    damage: 2.0,
                    health: 5.0,
                    ..bullet()
                },
                ..gun
            };
            // Alternate: the second barrel fires half a reload later
            vec![
                BarrelSpec { offset: -26.0, ..twin },
                BarrelSpec {
                    offset: 26.0,
                    delay_ticks: twin.reload_ticks / 2,
                    ..twin
                },
            ]
        }
        MinionVariant::Destroyer => vec![BarrelSpec {
            width: 68.0,
            reload_ticks: 120,
            projectile: ProjectileSpec {
                speed: 0.5,
                damage: 10.0,
                health: 15.0,
                absorption_factor: 0.1,
                ..bullet()
            },
            ..gun
        }],
    }
}

/// AI turret riding on an auto trap
fn spawn_trap_turret(
    world: &mut World,
    trap: EntityId,
    request: &SpawnRequest,
    raider: bool,
) -> Result<EntityId, RegistryError> {
    let view_range = if raider {
        projectile::RAIDER_TRAP_VIEW_RANGE
    } else {
        projectile::AUTO_TRAP_VIEW_RANGE
    };
    let turret = world.spawn(
        EntityData::new(EntityKind::Turret)
            .with_parent(trap)
            .with_owner(request.owner)
            .with_team(request.team)
            .with_physics(circle(0.0))
            .with_style(Style {
                color: color::BARREL,
                ..Default::default()
            })
            .with_mount(MountStrategy::FollowParent {
                size_ratio: 0.5,
                copy_opacity: true,
            })
            .with_controller(Controller::Ai)
            .with_ai(AiState::new(view_range).stationary()),
    )?;
    derive_shape(world, turret);

    spawn_barrel(
        world,
        turret,
        BarrelPreset {
            spec: BarrelSpec {
                angle: 0.0,
                offset: 0.0,
                length: 110.0,
                width: 50.0,
                reload_ticks: 25,
                delay_ticks: 0,
                projectile: ProjectileSpec {
                    damage: 5.0,
                    health: 8.0,
                    ..bullet()
                },
            },
            addon: BarrelAddon::None,
        },
    )?;
    Ok(turret)
}
