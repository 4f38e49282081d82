//! Client for the slice of the Jellyfin HTTP API this system consumes:
//! `/Users`, `/Users/{id}/Views`, `/Users/{id}/Items` and `/Sessions`.
//!
//! The models only pin down the fields we read and tolerate everything
//! else, so minor server version drift does not break polling.

mod client;
mod models;

pub use client::{JellyfinClient, JellyfinError, SessionSource};
pub use models::{
    DeviceMatchField, Library, MediaItem, MediaSource, NowPlayingItem, Page, PlayState, Session,
    User, VIDEO_ITEM_TYPES,
};
