use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON 错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("无法打开媒体: {0}")]
    OpenError(String),

    #[error("无法找到视频流")]
    NoVideoStream,

    #[error("无法找到音频流")]
    NoAudioStream,

    /// 单帧级别的解码/解封装错误，解码线程吸收后重试
    #[error("解码错误: {0}")]
    DecodeError(String),

    /// 底层资源已不可用（文件被移除、设备断开等）
    #[error("数据源不可用: {0}")]
    SourceUnavailable(String),

    #[error("渲染错误: {0}")]
    RenderError(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("Seek 失败: {0}")]
    SeekError(String),

    #[error("状态错误: {0}")]
    InvalidState(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("其他错误: {0}")]
    Other(String),
}

impl PlayerError {
    /// 是否为可重试的瞬时错误（坏包、解码器需要更多输入）
    pub fn is_transient(&self) -> bool {
        match self {
            PlayerError::DecodeError(_) => true,
            #[cfg(feature = "ffmpeg")]
            PlayerError::FFmpegError(e) => !matches!(e, ffmpeg_next::Error::Exit),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
