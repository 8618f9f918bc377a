pub mod ai;
pub mod arena;
pub mod collision;
pub mod lifecycle;
pub mod physics;
