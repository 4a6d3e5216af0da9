// 播放器核心模块

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_backend;
pub mod frame_queue;
pub mod frame_source;
pub mod manager;
pub mod source;
pub mod sync;
pub mod synthetic;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg_backend::FfmpegBackend;
pub use frame_queue::FrameQueue;
pub use frame_source::FrameSource;
pub use manager::{InputCallback, PlaybackManager, StateCallback, TimestampCallback};
pub use source::{codec_profile_for, CodecProfile, Decoder, DecoderConfig, Demuxer, MediaBackend, OpenedStream};
pub use sync::{SyncAction, SyncDecision, SyncPolicy};
pub use synthetic::{SyntheticBackend, SyntheticMedia};
