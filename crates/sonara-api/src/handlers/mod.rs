//! Route handlers, grouped by surface.

pub mod admin;
pub mod health;
pub mod objects;
pub mod playlists;
pub mod telemetry;
pub mod tracks;
