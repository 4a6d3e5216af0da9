use crate::core::{Packet, PixelFormat, PlayerError, RawFrame, Result, StreamKind, StreamParams};
use log::debug;

/// 解封装器抽象接口
///
/// 每个实例只绑定容器中的一条流（视频或音频），由对应的 FrameSource 独占使用。
pub trait Demuxer: Send {
    /// 绑定流的参数
    fn stream_params(&self) -> &StreamParams;

    /// 读取下一个压缩数据包
    ///
    /// - Ok(Some(packet)): 成功读取
    /// - Ok(None): 到达流末尾
    /// - Err(e): 读取失败（坏包等瞬时错误可重试）
    fn read_next_unit(&mut self) -> Result<Option<Packet>>;

    /// Seek 到目标时间（微秒），落在目标之前最近的关键帧上
    fn seek(&mut self, target_us: i64) -> Result<()>;

    fn is_eof(&self) -> bool;

    /// 描述信息（用于日志）
    fn description(&self) -> String;
}

/// 解码器抽象接口（send/receive 模型）
pub trait Decoder: Send {
    /// 送入一个数据包；`None` 表示流结束，解码器开始吐出缓存帧
    fn send(&mut self, packet: Option<&Packet>) -> Result<()>;

    /// 取出一帧；`Ok(None)` 表示需要更多输入（或已全部吐完）
    fn receive(&mut self) -> Result<Option<RawFrame>>;

    /// 丢弃解码器内部缓存（seek 后调用）
    fn flush(&mut self);

    fn config(&self) -> &DecoderConfig;
}

/// 解码器配置（由 CodecProfile 根据流参数生成）
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderConfig {
    pub kind: StreamKind,
    pub codec_name: String,
    /// 解码线程数，0 表示由解码库决定
    pub thread_count: usize,
    /// 视频：解码器输出的像素格式，音频为 None（重采样由音频引擎负责）
    pub output_pixel_format: Option<PixelFormat>,
    /// 没有时间戳时用来推算 PTS 的帧间隔（微秒）
    pub frame_interval_us: i64,
}

/// 编解码能力接口：按流参数生成解码配置
pub trait CodecProfile: Send + Sync {
    fn configure(&self, params: &StreamParams) -> Result<DecoderConfig>;
}

/// 视频解码配置
#[derive(Debug, Default)]
pub struct VideoCodecProfile;

/// 音频解码配置
#[derive(Debug, Default)]
pub struct AudioCodecProfile;

/// 回退帧率（容器里没有帧率时）
const FALLBACK_VIDEO_FPS: f64 = 30.0;
/// 回退音频帧间隔的分母（每秒 50 帧）
const FALLBACK_AUDIO_FPS: f64 = 50.0;

impl CodecProfile for VideoCodecProfile {
    fn configure(&self, params: &StreamParams) -> Result<DecoderConfig> {
        if params.kind != StreamKind::Video {
            return Err(PlayerError::NoVideoStream);
        }
        if params.width == 0 || params.height == 0 {
            return Err(PlayerError::OpenError(format!(
                "视频尺寸无效: {}x{}",
                params.width, params.height
            )));
        }

        let fps = if params.frame_rate.is_finite() && params.frame_rate > 0.0 {
            params.frame_rate
        } else {
            FALLBACK_VIDEO_FPS
        };

        let config = DecoderConfig {
            kind: StreamKind::Video,
            codec_name: params.codec_name.clone(),
            thread_count: 0,
            output_pixel_format: Some(PixelFormat::YUV420P),
            frame_interval_us: (1_000_000.0 / fps) as i64,
        };
        debug!("视频解码配置: {:?}", config);
        Ok(config)
    }
}

impl CodecProfile for AudioCodecProfile {
    fn configure(&self, params: &StreamParams) -> Result<DecoderConfig> {
        if params.kind != StreamKind::Audio {
            return Err(PlayerError::NoAudioStream);
        }
        if params.sample_rate == 0 || params.channels == 0 {
            return Err(PlayerError::OpenError(format!(
                "音频参数无效: {} Hz, {} 声道",
                params.sample_rate, params.channels
            )));
        }

        let config = DecoderConfig {
            kind: StreamKind::Audio,
            codec_name: params.codec_name.clone(),
            // 音频解码很轻，单线程即可
            thread_count: 1,
            output_pixel_format: None,
            frame_interval_us: (1_000_000.0 / FALLBACK_AUDIO_FPS) as i64,
        };
        debug!("音频解码配置: {:?}", config);
        Ok(config)
    }
}

/// 按流类型选择解码配置
pub fn codec_profile_for(kind: StreamKind) -> Box<dyn CodecProfile> {
    match kind {
        StreamKind::Video => Box::new(VideoCodecProfile),
        StreamKind::Audio => Box::new(AudioCodecProfile),
    }
}

/// 一条已打开的流：解封装器 + 解码器（解码配置由 `Decoder::config` 给出）
pub struct OpenedStream {
    pub demuxer: Box<dyn Demuxer>,
    pub decoder: Box<dyn Decoder>,
}

/// 媒体后端（FFmpeg、合成测试源等）
///
/// 为每个 FrameSource 单独打开一次流，两个 FrameSource 之间不共享容器句柄。
pub trait MediaBackend: Send + Sync {
    fn open_stream(&self, path: &str, kind: StreamKind, profile: &dyn CodecProfile) -> Result<OpenedStream>;
}
