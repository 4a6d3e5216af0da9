// 渲染器模块：视频渲染协作方接口

pub mod frame_sink;

pub use frame_sink::{FrameSink, RenderStats};

use crate::core::{DecodedFrame, Result};
use std::sync::Arc;

/// 播放器关心的按键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Space,
    P,
    Q,
    Escape,
    R,
    Left,
    Right,
    Up,
    Down,
    S,
    M,
}

/// 窗口/控制台转发给播放器的输入事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    KeyPressed(Key),
    Resized { width: u32, height: u32 },
    CloseRequested,
}

pub type InputHandler = Arc<dyn Fn(InputEvent) + Send + Sync>;

/// 视频渲染协作方
///
/// 上传纹理、色彩转换都由实现方在自己的线程里异步完成；播放器只负责按节奏交帧。
pub trait VideoRenderer: Send + Sync {
    /// 按视频尺寸启动
    fn start(&self, width: u32, height: u32) -> Result<()>;

    fn stop(&self);

    /// 交付一帧；内部队列满时丢弃最旧的帧
    fn enqueue_frame(&self, frame: DecodedFrame);

    /// 丢弃所有待显示的帧（seek 时调用）
    fn clear_frames(&self);

    fn request_resize(&self, width: u32, height: u32);

    fn is_running(&self) -> bool;

    fn set_input_handler(&self, handler: InputHandler);

    /// 运行中出现不可恢复的错误（设备丢失等）
    fn has_failed(&self) -> bool {
        false
    }
}
