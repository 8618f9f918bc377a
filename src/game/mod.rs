pub mod blueprints;
pub mod constants;
pub mod entity;
pub mod fields;
pub mod game_loop;
pub mod input;
pub mod input_buffer;
pub mod performance;
pub mod scheduler;
pub mod spatial;
pub mod systems;
pub mod world;
