//! Arena Server Library
//!
//! Authoritative simulation core for a real-time arena game: a generational
//! entity registry, dirty-tracked field groups, a uniform-grid spatial index,
//! a fixed-phase tick scheduler and a per-viewer delta encoder. Transport is
//! left to the embedding binary, which only feeds input frames in and drains
//! encoded frames out.

pub mod config;
pub mod game;
pub mod net;
pub mod util;
