//! # Audio Module
//!
//! Playback-queue controller for the music bot.
//!
//! ## Architecture
//!
//! ### [`track`] - Track descriptors
//! - Identity (catalog id or direct link) and lazily filled metadata
//! - Audio source classification and `@offset` / `#source` attributes
//!
//! ### [`queue`] - Queue Store
//! - Ordered queue without duplicate identities
//! - Bounded history used by `previous`
//!
//! ### [`mode`] - Play modes
//! - Sequential, sequential loop, random and random loop
//! - Pure `advance` step with reshuffle after every full random lap
//!
//! ### [`presence`] - Presence tracking
//! - Listeners in the bot's own channel, auto-pause when it empties
//!
//! ### [`pipeline`] - Resolution and playback
//! - Bounded skip-on-failure cascades, `previous`, `stop`
//! - Cancellation of stale cascades
//!
//! ### [`player`] - Songbird backend
//! - Plays local files and HTTP streams, reports track end/error back

pub mod mode;
pub mod pipeline;
pub mod player;
pub mod presence;
pub mod queue;
pub mod track;
