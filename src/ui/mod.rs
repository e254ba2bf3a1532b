//! Discord presentation: embeds for now-playing, queue status and help.

pub mod embeds;
