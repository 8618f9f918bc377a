/// Motion tuning shared by every root entity
pub mod physics {
    /// Fraction of velocity lost per tick
    pub const FRICTION: f32 = 0.1;
    /// Default acceleration for entities driven by movement input
    pub const BASE_ACCELERATION: f32 = 1.6;
    /// Scale applied to push responses between colliding entities
    pub const PUSH_SCALE: f32 = 0.5;
    /// Default push factor of a freshly created physics group
    pub const DEFAULT_PUSH_FACTOR: f32 = 8.0;
    /// Simulation tick rate in Hz
    pub const TICK_RATE: u32 = 30;
}

/// Tank body progression
pub mod body {
    pub const BASE_SIZE: f32 = 50.0;
    /// Size multiplier applied per level above 1
    pub const SIZE_GROWTH: f32 = 1.01;
    pub const LEVEL_CAP: u32 = 45;
    pub const BASE_MAX_HEALTH: f32 = 50.0;
    pub const HEALTH_PER_LEVEL: f32 = 2.0;
    /// Contact damage dealt by a body per colliding tick
    pub const CONTACT_DAMAGE: f32 = 2.0;
}

/// Mounted sub-object ratios
pub mod mount {
    /// Pronounced decoration tracks this share of its parent's size
    pub const PRONOUNCED_SIZE_RATIO: f32 = 0.65;
    pub const PRONOUNCED_SIDES: u32 = 6;
    /// Trap launcher: size = barrel width * 20 / 42
    pub const TRAP_LAUNCHER_SIZE_RATIO: f32 = 20.0 / 42.0;
    /// Minion launchers are wider than the barrel they sit on
    pub const MINION_LAUNCHER_WIDTH_RATIO: f32 = 1.35;
    pub const MINION_LAUNCHER_FRONT_SIZE_RATIO: f32 = 12.5 / 50.0;
    pub const MINION_LAUNCHER_BACK_SIZE_RATIO: f32 = 42.5 / 50.0;
    /// Engineer launcher cap, relative to the barrel width
    pub const ENGINEER_CAP_WIDTH_RATIO: f32 = 1.75;
    pub const ENGINEER_CAP_SIZE_RATIO: f32 = 10.0 / 42.0;
}

/// Projectile behavior
pub mod projectile {
    /// Base projectile speed scale (barrel speed multipliers apply on top)
    pub const BASE_SPEED: f32 = 20.0;
    /// Projectile size relative to the barrel width
    pub const SIZE_TO_BARREL_WIDTH: f32 = 0.5;
    /// Ticks after spawning before a minion starts steering
    pub const MINION_WARMUP_TICKS: u64 = 5;
    /// Squared focus radius minions orbit around the aim point
    pub const MINION_FOCUS_RADIUS_SQ: f32 = 850.0 * 850.0;
    pub const MINION_VIEW_RANGE: f32 = 900.0;
    pub const MINION_SIZE_RATIO: f32 = 1.2;
    /// Destroyer minions see this much further than standard ones
    pub const DESTROYER_VIEW_RANGE_SCALE: f32 = 1.5;
    /// Drones look for targets of their own while the owner is idle
    pub const DRONE_VIEW_RANGE: f32 = 1000.0;
    pub const AUTO_TRAP_VIEW_RANGE: f32 = 850.0;
    pub const RAIDER_TRAP_VIEW_RANGE: f32 = 1400.0;
}

/// AI decision thresholds
pub mod ai {
    /// Default view range for autonomous units
    pub const DEFAULT_VIEW_RANGE: f32 = 1000.0;
    /// Health ratio below which an attacking unit retreats
    pub const FEAR_HEALTH_RATIO: f32 = 0.25;
    /// Extra health ratio required before a retreating unit re-engages
    pub const FEAR_RECOVERY_MARGIN: f32 = 0.1;
}

/// Position group flags
pub mod position_flags {
    pub const ABSOLUTE_ROTATION: u32 = 1 << 0;
}

/// Physics group flags (wire bit positions)
pub mod physics_flags {
    pub const IS_TRAPEZOID: u32 = 1 << 0;
    pub const NO_OWN_TEAM_COLLISION: u32 = 1 << 3;
    pub const BASE: u32 = 1 << 4;
    pub const ONLY_SAME_OWNER_COLLISION: u32 = 1 << 5;
    pub const CAN_ESCAPE_ARENA: u32 = 1 << 6;
    pub const DO_CHILDREN_COLLISION: u32 = 1 << 7;
}

/// Style group flags
pub mod style_flags {
    pub const IS_VISIBLE: u32 = 1 << 0;
    pub const IS_STAR: u32 = 1 << 4;
    pub const SHOWS_ABOVE_PARENT: u32 = 1 << 6;
}

/// Arena group flags
pub mod arena_flags {
    pub const NO_JOINING: u32 = 1 << 0;
    pub const GAME_READY_START: u32 = 1 << 3;
}

/// Client input flags (wire bit positions 0..8)
pub mod input_flags {
    pub const LEFT_CLICK: u32 = 1 << 0;
    pub const UP: u32 = 1 << 1;
    pub const LEFT: u32 = 1 << 2;
    pub const DOWN: u32 = 1 << 3;
    pub const RIGHT: u32 = 1 << 4;
    pub const GOD_MODE: u32 = 1 << 5;
    pub const SUICIDE: u32 = 1 << 6;
    pub const RIGHT_CLICK: u32 = 1 << 7;
    pub const LEVEL_UP: u32 = 1 << 8;
    /// Every bit a client may legally set
    pub const ALL: u32 = (1 << 9) - 1;
}

/// Entity colors (wire palette indices)
pub mod color {
    pub const BARREL: u32 = 1;
    pub const TANK: u32 = 2;
    pub const NEUTRAL: u32 = 12;
    pub const SHAPE: u32 = 8;
}

/// Notification colors
pub mod notify {
    pub const ARENA_CLOSED_COLOR: u32 = 0xFF0000;
    /// Duration used for notifications that never expire
    pub const INFINITE_DURATION: f32 = -1.0;
    pub const ARENA_CLOSED_TEXT: &str = "Arena closed: No players can join";
}
