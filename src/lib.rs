//! MYY Player 播放核心
//!
//! 解码生产者（FrameSource）、拉模式音频引擎（AudioEngine）和以音频时钟为主的
//! 播放协调器（PlaybackManager）。解封装/解码、音频设备和视频渲染都以 trait
//! 形式接入，默认构建只带合成测试源和模拟音频设备；FFmpeg 与 cpal 后端通过
//! `ffmpeg` / `audio-cpal` 特性启用。

pub mod app;
pub mod audio;
pub mod core;
pub mod player;
pub mod renderer;

pub use crate::core::{PlaybackState, PlayerConfig, PlayerError, Result};
pub use crate::player::PlaybackManager;
