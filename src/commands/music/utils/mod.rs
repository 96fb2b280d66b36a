//! The playback pipeline: per-guild queues, play sessions and the pieces they are built from.

pub mod disconnect_timer;
pub mod events;
pub mod frame_encoder;
pub mod music_manager;
pub mod playback_session;
pub mod queue_manager;
pub mod voice;
