//! Networking seam: wire records, per-viewer encoding and outbound frames

pub mod encoder;
pub mod outbound;
pub mod protocol;
