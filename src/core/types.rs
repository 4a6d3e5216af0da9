use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// 统一时间基：微秒
pub const TIME_BASE: i64 = 1_000_000;

/// 无效时间戳（等价于 AV_NOPTS_VALUE）
pub const NO_PTS: i64 = i64::MIN;

/// 流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Video => "视频",
            StreamKind::Audio => "音频",
        }
    }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    RGB,
    YUV420P,
    NV12,
    Unknown,
}

/// 音频采样格式（每个样本的存储类型）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    I16,
    I32,
    F32,
    F64,
}

impl SampleFormat {
    /// 单个样本的字节数
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::I16 => 2,
            SampleFormat::I32 | SampleFormat::F32 => 4,
            SampleFormat::F64 => 8,
        }
    }
}

/// 流参数（解封装器从容器中读出）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamParams {
    pub kind: StreamKind,
    pub codec_name: String,
    pub duration_us: i64,
    // 视频参数
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub pixel_format: PixelFormat,
    // 音频参数
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: Option<SampleFormat>,
    pub planar: bool,
}

impl StreamParams {
    pub fn video(codec_name: &str, width: u32, height: u32, frame_rate: f64, duration_us: i64) -> Self {
        Self {
            kind: StreamKind::Video,
            codec_name: codec_name.to_string(),
            duration_us,
            width,
            height,
            frame_rate,
            pixel_format: PixelFormat::YUV420P,
            sample_rate: 0,
            channels: 0,
            sample_format: None,
            planar: false,
        }
    }

    pub fn audio(
        codec_name: &str,
        sample_rate: u32,
        channels: u16,
        sample_format: SampleFormat,
        planar: bool,
        duration_us: i64,
    ) -> Self {
        Self {
            kind: StreamKind::Audio,
            codec_name: codec_name.to_string(),
            duration_us,
            width: 0,
            height: 0,
            frame_rate: 0.0,
            pixel_format: PixelFormat::Unknown,
            sample_rate,
            channels,
            sample_format: Some(sample_format),
            planar,
        }
    }
}

/// 压缩数据包（解封装输出，解码输入）
#[derive(Debug, Clone, Default)]
pub struct Packet {
    pub stream_index: usize,
    pub pts: Option<i64>, // 微秒
    pub dts: Option<i64>, // 微秒
    pub duration: i64,    // 微秒，0 表示未知
    pub keyframe: bool,
    pub data: Vec<u8>,
}

/// 视频画面（按平面存储）
#[derive(Debug, Clone, PartialEq)]
pub struct VideoPicture {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Vec<u8>>,
    pub strides: Vec<usize>,
}

/// 音频样本（平面或交织）
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSamples {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub planar: bool,
    pub nb_samples: usize, // 每声道样本数
    pub planes: Vec<Vec<u8>>,
}

/// 解码后的帧数据
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    Video(VideoPicture),
    Audio(AudioSamples),
}

/// 解码器直接输出的帧，时间戳已换算为微秒
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub pts: Option<i64>,
    pub duration: Option<i64>,
    pub payload: FramePayload,
}

/// 进入帧队列的帧
///
/// payload 由 Arc 共享：队列、消费者和渲染器持有同一份只读数据，
/// 生产者交出后不再触碰。
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub payload: Arc<FramePayload>,
    pub pts: i64,      // 显示时间戳（微秒）
    pub duration: i64, // 帧持续时间（微秒，可能是估算值）
}

impl DecodedFrame {
    pub fn new(payload: FramePayload, pts: i64, duration: i64) -> Self {
        Self {
            payload: Arc::new(payload),
            pts,
            duration,
        }
    }

    pub fn video(&self) -> Option<&VideoPicture> {
        match self.payload.as_ref() {
            FramePayload::Video(picture) => Some(picture),
            FramePayload::Audio(_) => None,
        }
    }

    pub fn audio(&self) -> Option<&AudioSamples> {
        match self.payload.as_ref() {
            FramePayload::Audio(samples) => Some(samples),
            FramePayload::Video(_) => None,
        }
    }
}

/// 播放状态（协调器）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
    Error,
}

impl PlaybackState {
    fn to_u8(self) -> u8 {
        match self {
            PlaybackState::Stopped => 0,
            PlaybackState::Playing => 1,
            PlaybackState::Paused => 2,
            PlaybackState::Error => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => PlaybackState::Playing,
            2 => PlaybackState::Paused,
            3 => PlaybackState::Error,
            _ => PlaybackState::Stopped,
        }
    }
}

/// 解码线程状态（单个 FrameSource）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Stopped,
    Paused,
    Running,
}

impl SourceState {
    fn to_u8(self) -> u8 {
        match self {
            SourceState::Stopped => 0,
            SourceState::Paused => 1,
            SourceState::Running => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => SourceState::Paused,
            2 => SourceState::Running,
            _ => SourceState::Stopped,
        }
    }
}

macro_rules! atomic_state {
    ($name:ident, $state:ty) => {
        /// 原子状态，所有转换都通过 CAS 完成
        #[derive(Debug)]
        pub struct $name(AtomicU8);

        impl $name {
            pub fn new(state: $state) -> Self {
                Self(AtomicU8::new(state.to_u8()))
            }

            pub fn load(&self) -> $state {
                <$state>::from_u8(self.0.load(Ordering::Acquire))
            }

            pub fn store(&self, state: $state) {
                self.0.store(state.to_u8(), Ordering::Release);
            }

            /// 仅当当前状态为 `from` 时切换到 `to`
            pub fn transition(&self, from: $state, to: $state) -> bool {
                self.0
                    .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            }
        }
    };
}

atomic_state!(AtomicSourceState, SourceState);
atomic_state!(AtomicPlaybackState, PlaybackState);

/// 媒体信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration_us: i64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// 播放器状态快照（供 UI 读取或序列化）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub state: PlaybackState,
    pub position: f64, // 秒
    pub duration: f64, // 秒
    pub volume: f64,   // 0.0 - 1.0
    pub media_info: Option<MediaInfo>,
}
