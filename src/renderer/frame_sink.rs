use crate::core::{log_ctx, DecodedFrame, PlayerError, Result};
use crate::player::FrameQueue;
use crate::renderer::{InputEvent, InputHandler, VideoRenderer};
use log::{debug, error, info};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// 渲染统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub frames_enqueued: u64,
    pub frames_dropped: u64,
    pub frames_presented: u64,
    pub last_pts: Option<i64>,
}

/// 渲染侧帧队列
///
/// 播放器按节奏把帧放进来，显示端（窗口、GPU 上传线程）用 `take_frame` 取走。
/// 队列满时丢弃最旧的帧，显示端跟不上时不会反压播放器。
pub struct FrameSink {
    queue: FrameQueue,
    running: AtomicBool,
    failed: AtomicBool,
    size: Mutex<(u32, u32)>,
    handler: Mutex<Option<InputHandler>>,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    presented: AtomicU64,
    last_pts: AtomicI64,
}

impl FrameSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: FrameQueue::new(capacity),
            running: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            size: Mutex::new((0, 0)),
            handler: Mutex::new(None),
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            presented: AtomicU64::new(0),
            last_pts: AtomicI64::new(-1),
        }
    }

    /// 显示端取下一帧
    pub fn take_frame(&self) -> Option<DecodedFrame> {
        let frame = self.queue.pop()?;
        self.presented.fetch_add(1, Ordering::AcqRel);
        self.last_pts.store(frame.pts, Ordering::Release);
        Some(frame)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn size(&self) -> (u32, u32) {
        *self.size.lock()
    }

    /// 显示端把输入事件转交给播放器
    pub fn dispatch_input(&self, event: InputEvent) {
        if let InputEvent::Resized { width, height } = event {
            *self.size.lock() = (width, height);
        }
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => handler(event),
            None => debug!("{} 输入事件无人处理: {:?}", log_ctx(), event),
        }
    }

    /// 显示端报告不可恢复的错误
    pub fn report_failure(&self, reason: &str) {
        error!("{} ❌ 渲染失败: {}", log_ctx(), reason);
        self.failed.store(true, Ordering::Release);
    }

    pub fn stats(&self) -> RenderStats {
        let last_pts = self.last_pts.load(Ordering::Acquire);
        RenderStats {
            frames_enqueued: self.enqueued.load(Ordering::Acquire),
            frames_dropped: self.dropped.load(Ordering::Acquire),
            frames_presented: self.presented.load(Ordering::Acquire),
            last_pts: (last_pts >= 0).then_some(last_pts),
        }
    }
}

impl VideoRenderer for FrameSink {
    fn start(&self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(PlayerError::RenderError(format!("无效的视频尺寸: {}x{}", width, height)));
        }
        *self.size.lock() = (width, height);
        self.failed.store(false, Ordering::Release);
        self.running.store(true, Ordering::Release);
        info!("{} 🎨 渲染队列启动: {}x{}, 容量 {}", log_ctx(), width, height, self.queue.capacity());
        Ok(())
    }

    fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            let dropped = self.queue.clear();
            info!("{} 🎨 渲染队列停止，丢弃 {} 帧", log_ctx(), dropped);
        }
    }

    fn enqueue_frame(&self, frame: DecodedFrame) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        self.enqueued.fetch_add(1, Ordering::AcqRel);
        if let Some(evicted) = self.queue.push_drop_oldest(frame) {
            let total = self.dropped.fetch_add(1, Ordering::AcqRel) + 1;
            debug!("{} 渲染跟不上，丢弃最旧帧 pts={}us（累计 {}）", log_ctx(), evicted.pts, total);
        }
    }

    fn clear_frames(&self) {
        let dropped = self.queue.clear();
        if dropped > 0 {
            debug!("{} 🧹 渲染队列清空 {} 帧", log_ctx(), dropped);
        }
    }

    fn request_resize(&self, width: u32, height: u32) {
        *self.size.lock() = (width, height);
        debug!("{} 📐 请求调整尺寸: {}x{}", log_ctx(), width, height);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn set_input_handler(&self, handler: InputHandler) {
        *self.handler.lock() = Some(handler);
    }

    fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}
