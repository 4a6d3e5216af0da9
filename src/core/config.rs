use crate::core::error::{PlayerError, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 播放器配置
///
/// 所有字段都有默认值，JSON 文件里只需写出要覆盖的项。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 视频帧队列容量
    pub video_queue_capacity: usize,
    /// 音频帧队列容量
    pub audio_queue_capacity: usize,
    /// Seek 到目标后额外缓冲的帧数
    pub seek_run_in_frames: usize,
    /// PCM 环形缓冲区时长（秒）
    pub ring_buffer_seconds: f64,
    /// PCM 环形缓冲区最小字节数
    pub min_ring_bytes: usize,
    /// 环形缓冲区满时生产者最长等待（毫秒），超时丢弃
    pub producer_max_wait_ms: u64,
    /// 请求的设备回调缓冲样本数
    pub device_buffer_samples: u16,
    /// 渲染端帧队列容量（满时丢弃最旧帧）
    pub renderer_queue_capacity: usize,
    /// 同步阈值（毫秒）：小于该值不校正
    pub sync_threshold_min_ms: i64,
    /// 同步阈值（毫秒）：大于该值强制校正
    pub sync_threshold_max_ms: i64,
    /// 视频落后超过该值（毫秒）时立即追赶
    pub sync_framedup_threshold_ms: i64,
    /// 延迟平滑系数（上一次延迟的权重）
    pub delay_smoothing: f64,
    /// 暂停/空闲轮询间隔（毫秒）
    pub idle_poll_ms: u64,
    /// 解码失败或无数据时的退避（毫秒）
    pub decode_backoff_ms: u64,
    /// 连续失败达到该次数视为数据源不可用
    pub max_consecutive_errors: u32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            video_queue_capacity: 30,
            audio_queue_capacity: 50,
            seek_run_in_frames: 5,
            ring_buffer_seconds: 2.0,
            min_ring_bytes: 4096,
            producer_max_wait_ms: 200,
            device_buffer_samples: 1024,
            renderer_queue_capacity: 5,
            sync_threshold_min_ms: 40,
            sync_threshold_max_ms: 100,
            sync_framedup_threshold_ms: 200,
            delay_smoothing: 0.9,
            idle_poll_ms: 10,
            decode_backoff_ms: 5,
            max_consecutive_errors: 64,
        }
    }
}

impl PlayerConfig {
    /// 从 JSON 文件加载并校验
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: PlayerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        info!("📄 已加载配置: {}", path.display());
        Ok(config)
    }

    /// 有路径则加载，否则使用默认配置
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.video_queue_capacity == 0 || self.audio_queue_capacity == 0 {
            return Err(PlayerError::ConfigError("帧队列容量必须大于 0".into()));
        }
        if self.renderer_queue_capacity == 0 {
            return Err(PlayerError::ConfigError("渲染队列容量必须大于 0".into()));
        }
        if self.seek_run_in_frames == 0 {
            return Err(PlayerError::ConfigError("seek_run_in_frames 必须大于 0".into()));
        }
        if !(self.ring_buffer_seconds > 0.0) {
            return Err(PlayerError::ConfigError("环形缓冲区时长必须为正数".into()));
        }
        if self.sync_threshold_min_ms < 0
            || self.sync_threshold_min_ms > self.sync_threshold_max_ms
            || self.sync_threshold_max_ms > self.sync_framedup_threshold_ms
        {
            return Err(PlayerError::ConfigError(format!(
                "同步阈值必须满足 0 <= min <= max <= framedup（当前 {}/{}/{}）",
                self.sync_threshold_min_ms, self.sync_threshold_max_ms, self.sync_framedup_threshold_ms
            )));
        }
        if !(0.0..1.0).contains(&self.delay_smoothing) {
            return Err(PlayerError::ConfigError("delay_smoothing 必须在 [0, 1) 内".into()));
        }
        Ok(())
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn decode_backoff(&self) -> Duration {
        Duration::from_millis(self.decode_backoff_ms)
    }

    pub fn producer_max_wait(&self) -> Duration {
        Duration::from_millis(self.producer_max_wait_ms)
    }
}
