use std::str::FromStr;

use crate::game::constants::physics::TICK_RATE;

/// Arena simulation configuration
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Entity slot capacity; running out is fatal
    pub max_entities: usize,
    pub arena_width: f32,
    pub arena_height: f32,
    /// Extra room beyond the arena bounds before non-escaping entities are clamped
    pub arena_padding: f32,
    /// Spatial grid cell size
    pub grid_cell_size: f32,
    /// Spawn location attempts before accepting the last candidate
    pub spawn_attempts: u32,
    /// Minimum distance between a new spawn and any player body
    pub spawn_clear_radius: f32,
    /// Fade-out length for soft deletion
    pub deletion_animation_ticks: u32,
    /// Viewer visibility rectangle half extents
    pub view_half_width: f32,
    pub view_half_height: f32,
    pub input_queue_capacity: usize,
    pub outbound_queue_capacity: usize,
    /// Seed for the simulation RNG (replays reuse it)
    pub sim_seed: u64,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            tick_rate: TICK_RATE,
            max_entities: 16_384,
            arena_width: 22_300.0,
            arena_height: 22_300.0,
            arena_padding: 200.0,
            grid_cell_size: 256.0,
            spawn_attempts: 20,
            spawn_clear_radius: 1000.0,
            deletion_animation_ticks: 5,
            view_half_width: 1920.0,
            view_half_height: 1080.0,
            input_queue_capacity: 1000,
            outbound_queue_capacity: 256,
            sim_seed: 0x5EED,
        }
    }
}

/// Read `key` and parse it, keeping `current` when missing, unparsable or
/// rejected by `accept`
fn env_or<T, F>(key: &str, current: T, accept: F) -> T
where
    T: FromStr + Copy,
    F: Fn(T) -> bool,
{
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(parsed) if accept(parsed) => parsed,
            Ok(_) => {
                tracing::warn!("{} '{}' out of range, using default", key, raw);
                current
            }
            Err(_) => {
                tracing::warn!("Invalid {} '{}', using default", key, raw);
                current
            }
        },
        Err(_) => current,
    }
}

impl ArenaConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let d = Self::default();
        Self {
            tick_rate: env_or("TICK_RATE", d.tick_rate, |v| (1..=240).contains(&v)),
            max_entities: env_or("MAX_ENTITIES", d.max_entities, |v| (2..=1 << 20).contains(&v)),
            arena_width: env_or("ARENA_WIDTH", d.arena_width, |v: f32| v.is_finite() && v > 0.0),
            arena_height: env_or("ARENA_HEIGHT", d.arena_height, |v: f32| v.is_finite() && v > 0.0),
            arena_padding: env_or("ARENA_PADDING", d.arena_padding, |v: f32| v.is_finite() && v >= 0.0),
            grid_cell_size: env_or("GRID_CELL_SIZE", d.grid_cell_size, |v: f32| v.is_finite() && v >= 16.0),
            spawn_attempts: env_or("SPAWN_ATTEMPTS", d.spawn_attempts, |v| v > 0),
            spawn_clear_radius: env_or("SPAWN_CLEAR_RADIUS", d.spawn_clear_radius, |v: f32| v.is_finite() && v >= 0.0),
            deletion_animation_ticks: env_or("DELETION_ANIMATION_TICKS", d.deletion_animation_ticks, |v| v <= 600),
            view_half_width: env_or("VIEW_HALF_WIDTH", d.view_half_width, |v: f32| v.is_finite() && v > 0.0),
            view_half_height: env_or("VIEW_HALF_HEIGHT", d.view_half_height, |v: f32| v.is_finite() && v > 0.0),
            input_queue_capacity: env_or("INPUT_QUEUE_CAPACITY", d.input_queue_capacity, |v| v > 0),
            outbound_queue_capacity: env_or("OUTBOUND_QUEUE_CAPACITY", d.outbound_queue_capacity, |v| v > 0),
            sim_seed: env_or("SIM_SEED", d.sim_seed, |_| true),
        }
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick_rate must be at least 1"));
        }
        if self.max_entities < 2 {
            return Err(ConfigError::Invalid("max_entities must leave room beyond the arena"));
        }
        if self.max_entities > u32::MAX as usize {
            return Err(ConfigError::Invalid("max_entities exceeds the id space"));
        }
        if !(self.arena_width > 0.0 && self.arena_height > 0.0) {
            return Err(ConfigError::Invalid("arena dimensions must be positive"));
        }
        if !(self.grid_cell_size > 0.0) {
            return Err(ConfigError::Invalid("grid_cell_size must be positive"));
        }
        if self.spawn_attempts == 0 {
            return Err(ConfigError::Invalid("spawn_attempts must be at least 1"));
        }
        if self.input_queue_capacity == 0 || self.outbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue capacities must be at least 1"));
        }
        Ok(())
    }

    /// Tick period
    pub fn tick_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.tick_rate as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ArenaConfig::default();
        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.arena_width, 22_300.0);
        assert_eq!(config.arena_padding, 200.0);
        assert_eq!(config.spawn_attempts, 20);
        assert_eq!(config.spawn_clear_radius, 1000.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_default() {
        let config = ArenaConfig::load_or_default();
        assert!(config.tick_rate > 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = ArenaConfig {
            max_entities: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ArenaConfig {
            outbound_queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tick_duration() {
        let config = ArenaConfig {
            tick_rate: 20,
            ..Default::default()
        };
        assert_eq!(config.tick_duration().as_millis(), 50);
    }
}
