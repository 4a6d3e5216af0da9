use crate::core::{
    log_ctx, AtomicSourceState, DecodedFrame, FramePayload, PlayerConfig, PlayerError, RawFrame, Result,
    SourceState, StreamKind, StreamParams, NO_PTS, TIME_BASE,
};
use crate::player::frame_queue::FrameQueue;
use crate::player::source::{codec_profile_for, Decoder, DecoderConfig, Demuxer, MediaBackend};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 解码线程参数（取自 PlayerConfig）
#[derive(Debug, Clone, Copy)]
struct SourceSettings {
    run_in_frames: usize,
    idle_poll: Duration,
    backoff: Duration,
    max_consecutive_errors: u32,
}

/// 解封装器 + 解码器，以及推算时间戳所需的状态
///
/// 只在 `SourceShared::io` 锁内访问：解码线程和 seek 不会同时驱动解码器。
struct StreamIo {
    demuxer: Box<dyn Demuxer>,
    decoder: Box<dyn Decoder>,
    /// 下一帧缺少时间戳时使用的推算 PTS
    fake_pts: i64,
    /// 最近一帧的持续时间（推算 PTS 的步长）
    last_duration: i64,
    /// 解封装已到末尾，解码器正在吐出缓存帧
    draining: bool,
    /// 当前是否处于时间戳缺失状态（只在进入时打一次 warn）
    pts_missing: bool,
    consecutive_errors: u32,
}

impl StreamIo {
    /// 取下一帧解码结果；`Ok(None)` 表示解码器已完全排空（流结束）
    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        loop {
            if let Some(frame) = self.decoder.receive()? {
                return Ok(Some(frame));
            }
            if self.draining {
                return Ok(None);
            }
            match self.demuxer.read_next_unit()? {
                Some(packet) => self.decoder.send(Some(&packet))?,
                None => {
                    // 空包 = 冲刷信号
                    self.decoder.send(None)?;
                    self.draining = true;
                }
            }
        }
    }

    /// 分配 PTS 并包装为队列帧
    fn stamp(&mut self, kind: StreamKind, raw: RawFrame) -> DecodedFrame {
        let duration = match (&raw.payload, raw.duration) {
            (_, Some(duration)) if duration > 0 => duration,
            (FramePayload::Audio(samples), _) if samples.sample_rate > 0 => {
                samples.nb_samples as i64 * TIME_BASE / samples.sample_rate as i64
            }
            _ => self.last_duration,
        };

        let pts = match raw.pts {
            Some(pts) if pts != NO_PTS => {
                if self.pts_missing {
                    info!("{} ✅ {}流时间戳恢复: {}us", log_ctx(), kind.as_str(), pts);
                    self.pts_missing = false;
                }
                pts
            }
            _ => {
                if !self.pts_missing {
                    warn!(
                        "{} ⚠️  {}帧缺少时间戳，使用推算值 {}us（步长 {}us）",
                        log_ctx(),
                        kind.as_str(),
                        self.fake_pts,
                        duration
                    );
                    self.pts_missing = true;
                }
                self.fake_pts
            }
        };

        self.fake_pts = pts + duration;
        self.last_duration = duration;
        DecodedFrame::new(raw.payload, pts, duration)
    }

    fn reset_after_seek(&mut self, target_us: i64, frame_interval_us: i64) {
        self.decoder.flush();
        self.fake_pts = target_us;
        self.last_duration = frame_interval_us;
        self.draining = false;
        self.pts_missing = false;
        self.consecutive_errors = 0;
    }
}

struct SourceShared {
    kind: StreamKind,
    params: StreamParams,
    config: DecoderConfig,
    io: Mutex<StreamIo>,
    queue: FrameQueue,
    state: AtomicSourceState,
    /// 所有解码帧都已入队，解码器已排空
    eof: AtomicBool,
    /// 每次 seek 加一；旧代的帧不会再进入队列
    generation: AtomicU64,
    settings: SourceSettings,
}

/// 解码生产者：独占一对解封装器/解码器，在专用线程里填充有界帧队列
pub struct FrameSource {
    shared: Arc<SourceShared>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl FrameSource {
    /// 打开 `path` 中第一条 `kind` 类型的流
    pub fn open(backend: &dyn MediaBackend, path: &str, kind: StreamKind, config: &PlayerConfig) -> Result<Self> {
        info!("{} 📂 打开{}流: {}", log_ctx(), kind.as_str(), path);

        let profile = codec_profile_for(kind);
        let opened = backend.open_stream(path, kind, profile.as_ref())?;
        let params = opened.demuxer.stream_params().clone();
        if params.kind != kind {
            return Err(match kind {
                StreamKind::Video => PlayerError::NoVideoStream,
                StreamKind::Audio => PlayerError::NoAudioStream,
            });
        }

        let capacity = match kind {
            StreamKind::Video => config.video_queue_capacity,
            StreamKind::Audio => config.audio_queue_capacity,
        };
        let decoder_config = opened.decoder.config().clone();
        let frame_interval_us = decoder_config.frame_interval_us;

        info!(
            "{} ✅ {}流已打开: {} ({}), 队列容量 {}",
            log_ctx(),
            kind.as_str(),
            params.codec_name,
            opened.demuxer.description(),
            capacity
        );

        let shared = SourceShared {
            kind,
            params,
            config: decoder_config,
            io: Mutex::new(StreamIo {
                demuxer: opened.demuxer,
                decoder: opened.decoder,
                fake_pts: 0,
                last_duration: frame_interval_us,
                draining: false,
                pts_missing: false,
                consecutive_errors: 0,
            }),
            queue: FrameQueue::new(capacity),
            state: AtomicSourceState::new(SourceState::Stopped),
            eof: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            settings: SourceSettings {
                run_in_frames: config.seek_run_in_frames,
                idle_poll: config.idle_poll(),
                backoff: config.decode_backoff(),
                max_consecutive_errors: config.max_consecutive_errors.max(1),
            },
        };

        Ok(Self {
            shared: Arc::new(shared),
            worker: Mutex::new(None),
        })
    }

    pub fn kind(&self) -> StreamKind {
        self.shared.kind
    }

    pub fn stream_params(&self) -> &StreamParams {
        &self.shared.params
    }

    pub fn duration_us(&self) -> i64 {
        self.shared.params.duration_us
    }

    pub fn state(&self) -> SourceState {
        self.shared.state.load()
    }

    pub fn is_eof(&self) -> bool {
        self.shared.eof.load(Ordering::Acquire)
    }

    /// 已到末尾且解码线程已停止（所有帧都已被取走）
    pub fn is_finished(&self) -> bool {
        self.is_eof() && self.state() == SourceState::Stopped
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// 队首帧的 PTS（下一帧将要交付的时间戳）
    pub fn current_timestamp(&self) -> Option<i64> {
        self.shared.queue.front_pts()
    }

    /// 非阻塞取帧
    pub fn take_next_frame(&self) -> Option<DecodedFrame> {
        self.shared.queue.pop()
    }

    /// 启动解码
    ///
    /// Stopped → Running：清空队列和 EOF 后启动解码线程；Paused → Running 等同于 resume。
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        let shared = &self.shared;

        match shared.state.load() {
            SourceState::Running => {
                warn!("{} ⚠️  {}解码已在运行", log_ctx(), shared.kind.as_str());
                Ok(())
            }
            SourceState::Paused => {
                if shared.state.transition(SourceState::Paused, SourceState::Running) {
                    debug!("{} ▶️  {}解码从暂停恢复", log_ctx(), shared.kind.as_str());
                }
                Ok(())
            }
            SourceState::Stopped => {
                if let Some(handle) = worker.take() {
                    let _ = handle.join();
                }
                let dropped = shared.queue.clear();
                shared.eof.store(false, Ordering::Release);
                shared.state.store(SourceState::Running);
                *worker = Some(spawn_decode_thread(shared.clone())?);
                info!(
                    "{} 🚀 {}解码线程已启动（丢弃 {} 帧旧数据）",
                    log_ctx(),
                    shared.kind.as_str(),
                    dropped
                );
                Ok(())
            }
        }
    }

    /// Running → Paused，其他状态下无操作
    pub fn pause(&self) {
        if self.shared.state.transition(SourceState::Running, SourceState::Paused) {
            debug!("{} ⏸️  {}解码暂停", log_ctx(), self.shared.kind.as_str());
        }
    }

    /// Paused → Running，其他状态下无操作
    pub fn resume(&self) {
        if self.shared.state.transition(SourceState::Paused, SourceState::Running) {
            debug!("{} ▶️  {}解码恢复", log_ctx(), self.shared.kind.as_str());
        }
    }

    /// 强制停止并等待解码线程退出
    pub fn stop(&self) {
        let mut worker = self.worker.lock();
        self.shared.state.store(SourceState::Stopped);
        self.shared.queue.notify_all();
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                error!("{} ❌ {}解码线程异常退出", log_ctx(), self.shared.kind.as_str());
            }
            info!("{} ⏹️  {}解码线程已停止", log_ctx(), self.shared.kind.as_str());
        }
    }

    /// 丢弃队列里已解码的帧，返回丢弃数量
    pub fn discard_queued(&self) -> usize {
        self.shared.queue.clear()
    }

    /// 停止并清空队列
    pub fn close(&self) {
        self.stop();
        let dropped = self.discard_queued();
        info!(
            "{} 🗑️  关闭{}流，清空 {} 帧",
            log_ctx(),
            self.shared.kind.as_str(),
            dropped
        );
    }

    /// Seek 到 `target_us`
    ///
    /// 解封装器回退到目标前的关键帧，解码并丢弃 PTS < 目标的帧，
    /// 然后把目标处起的 `seek_run_in_frames` 帧放入队列再返回。
    /// 处于 Stopped 的数据源会以 Paused 状态带着解码线程返回，resume 后接着往下解。
    pub fn seek(&self, target_us: i64) -> Result<()> {
        let shared = &self.shared;
        let duration = shared.params.duration_us;
        if target_us < 0 || (duration > 0 && target_us > duration) {
            return Err(PlayerError::SeekError(format!(
                "{}流 seek 目标 {}us 超出范围 [0, {}]",
                shared.kind.as_str(),
                target_us,
                duration
            )));
        }

        info!("{} 🎯 {}流 Seek 到 {}us", log_ctx(), shared.kind.as_str(), target_us);

        let buffered = {
            let mut io = shared.io.lock();

            // 先换代再清队列：解码线程手里的旧帧会在入队时被丢弃
            shared.generation.fetch_add(1, Ordering::AcqRel);
            let dropped = shared.queue.clear();
            debug!("{} 🧹 {}流 seek 清空 {} 帧", log_ctx(), shared.kind.as_str(), dropped);

            io.demuxer
                .seek(target_us)
                .map_err(|e| PlayerError::SeekError(format!("{}流解封装 seek 失败: {}", shared.kind.as_str(), e)))?;
            io.reset_after_seek(target_us, shared.config.frame_interval_us);
            shared.eof.store(false, Ordering::Release);

            self.decode_run_in(&mut io, target_us)?
        };

        info!(
            "{} ✅ {}流 Seek 完成: 目标 {}us, 缓冲 {} 帧, 队首 {:?}",
            log_ctx(),
            shared.kind.as_str(),
            target_us,
            buffered,
            shared.queue.front_pts()
        );

        self.park_if_stopped()
    }

    /// 解码并丢弃目标前的帧，随后缓冲 run-in 帧
    fn decode_run_in(&self, io: &mut StreamIo, target_us: i64) -> Result<usize> {
        let shared = &self.shared;
        let mut buffered = 0;
        let mut discarded = 0usize;

        while buffered < shared.settings.run_in_frames {
            match io.next_frame() {
                Ok(Some(raw)) => {
                    io.consecutive_errors = 0;
                    let frame = io.stamp(shared.kind, raw);
                    if buffered == 0 && frame.pts < target_us {
                        discarded += 1;
                        continue;
                    }
                    if shared.queue.try_push(frame).is_err() {
                        break;
                    }
                    buffered += 1;
                }
                Ok(None) => {
                    debug!("{} 🏁 {}流 seek 解码到达末尾", log_ctx(), shared.kind.as_str());
                    shared.eof.store(true, Ordering::Release);
                    break;
                }
                Err(e) if e.is_transient() => {
                    io.consecutive_errors += 1;
                    warn!("{} ⚠️  {}流 seek 解码错误（已跳过）: {}", log_ctx(), shared.kind.as_str(), e);
                    if io.consecutive_errors >= shared.settings.max_consecutive_errors {
                        return Err(PlayerError::SeekError(format!(
                            "{}流 seek 连续解码失败 {} 次",
                            shared.kind.as_str(),
                            io.consecutive_errors
                        )));
                    }
                }
                Err(e) => {
                    return Err(PlayerError::SeekError(format!("{}流 seek 解码失败: {}", shared.kind.as_str(), e)));
                }
            }
        }

        debug!(
            "{} {}流 seek 丢弃目标前 {} 帧",
            log_ctx(),
            shared.kind.as_str(),
            discarded
        );
        Ok(buffered)
    }

    /// Stopped 的数据源在 seek 后转为 Paused，并重新拉起解码线程
    fn park_if_stopped(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        let shared = &self.shared;
        if shared.state.load() != SourceState::Stopped {
            return Ok(());
        }
        if let Some(handle) = worker.take() {
            let _ = handle.join();
        }
        shared.state.store(SourceState::Paused);
        *worker = Some(spawn_decode_thread(shared.clone())?);
        debug!("{} ⏸️  {}流 seek 后停在暂停状态", log_ctx(), shared.kind.as_str());
        Ok(())
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_decode_thread(shared: Arc<SourceShared>) -> Result<thread::JoinHandle<()>> {
    let name = match shared.kind {
        StreamKind::Video => "video-decode",
        StreamKind::Audio => "audio-decode",
    };
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || decode_loop(shared))?;
    Ok(handle)
}

/// 解码线程主循环
fn decode_loop(shared: Arc<SourceShared>) {
    let kind = shared.kind.as_str();
    let settings = shared.settings;
    info!("{} 🎬 {}解码线程启动", log_ctx(), kind);

    let mut decoded: u64 = 0;

    loop {
        match shared.state.load() {
            SourceState::Stopped => break,
            SourceState::Paused => {
                thread::sleep(settings.idle_poll);
                continue;
            }
            SourceState::Running => {}
        }

        if shared.eof.load(Ordering::Acquire) {
            // 等消费者取完剩余帧后再进入 Stopped
            let drained = shared.queue.wait_until_empty(|| {
                shared.state.load() != SourceState::Running || !shared.eof.load(Ordering::Acquire)
            });
            if drained
                && shared.eof.load(Ordering::Acquire)
                && shared.state.transition(SourceState::Running, SourceState::Stopped)
            {
                info!("{} 🏁 {}流播放完毕，共解码 {} 帧", log_ctx(), kind, decoded);
                break;
            }
            continue;
        }

        let (result, generation) = {
            let mut io = shared.io.lock();
            let generation = shared.generation.load(Ordering::Acquire);
            let result = io.next_frame().map(|raw| raw.map(|raw| io.stamp(shared.kind, raw)));
            match &result {
                Ok(Some(_)) => io.consecutive_errors = 0,
                Ok(None) => {
                    info!("{} 📭 {}流到达 EOF，解码器已排空", log_ctx(), kind);
                    shared.eof.store(true, Ordering::Release);
                }
                Err(e) => {
                    io.consecutive_errors += 1;
                    if !e.is_transient() || io.consecutive_errors >= settings.max_consecutive_errors {
                        error!(
                            "{} ❌ {}流不可用（连续失败 {} 次）: {}，按 EOF 处理",
                            log_ctx(),
                            kind,
                            io.consecutive_errors,
                            e
                        );
                        shared.eof.store(true, Ordering::Release);
                    }
                }
            }
            (result, generation)
        };

        match result {
            Ok(Some(frame)) => {
                let pts = frame.pts;
                let pushed = shared.queue.push_blocking(frame, || {
                    shared.state.load() == SourceState::Stopped
                        || shared.generation.load(Ordering::Acquire) != generation
                });
                if pushed {
                    decoded += 1;
                } else {
                    debug!("{} 丢弃 seek 前解码的{}帧 pts={}us", log_ctx(), kind, pts);
                }
            }
            Ok(None) => {}
            Err(e) => {
                if !shared.eof.load(Ordering::Acquire) {
                    warn!("{} ⚠️  {}解码错误（已跳过）: {}", log_ctx(), kind, e);
                    thread::sleep(settings.backoff);
                }
            }
        }
    }

    info!("{} 🛑 {}解码线程退出", log_ctx(), kind);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::synthetic::{SyntheticBackend, SyntheticMedia};
    use std::time::Instant;

    fn config() -> PlayerConfig {
        PlayerConfig::default()
    }

    fn open(media: SyntheticMedia, kind: StreamKind) -> FrameSource {
        let backend = SyntheticBackend::new(media);
        FrameSource::open(&backend, "synthetic://test", kind, &config()).unwrap()
    }

    /// 轮询取帧直到 EOF 或超时
    fn drain(source: &FrameSource, timeout: Duration) -> Vec<DecodedFrame> {
        let deadline = Instant::now() + timeout;
        let mut frames = Vec::new();
        while Instant::now() < deadline {
            match source.take_next_frame() {
                Some(frame) => frames.push(frame),
                None if source.is_finished() => break,
                None => thread::sleep(Duration::from_millis(1)),
            }
        }
        frames
    }

    #[test]
    fn test_decodes_all_frames_in_order() {
        let source = open(SyntheticMedia::new(1_000_000), StreamKind::Video);
        source.start().unwrap();

        let frames = drain(&source, Duration::from_secs(5));
        assert_eq!(frames.len(), 25);
        assert!(frames.windows(2).all(|w| w[0].pts < w[1].pts));
        assert!(source.is_finished());
    }

    #[test]
    fn test_queue_bounded_without_consumer() {
        let source = open(SyntheticMedia::new(10_000_000), StreamKind::Video);
        source.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(source.queued(), 30);
        assert!(!source.is_eof());
        source.stop();
        assert_eq!(source.state(), SourceState::Stopped);
    }

    #[test]
    fn test_pause_resume_only_between_running_and_paused() {
        let source = open(SyntheticMedia::new(2_000_000), StreamKind::Audio);
        source.pause();
        assert_eq!(source.state(), SourceState::Stopped);
        source.resume();
        assert_eq!(source.state(), SourceState::Stopped);

        source.start().unwrap();
        source.pause();
        assert_eq!(source.state(), SourceState::Paused);
        source.resume();
        assert_eq!(source.state(), SourceState::Running);
        source.stop();
    }

    #[test]
    fn test_seek_first_frame_at_or_after_target() {
        let source = open(SyntheticMedia::new(10_000_000), StreamKind::Video);
        source.start().unwrap();
        thread::sleep(Duration::from_millis(20));

        source.seek(4_020_000).unwrap();
        let first = source.take_next_frame().unwrap();
        assert!(first.pts >= 4_020_000);
        assert!(first.pts < 4_020_000 + 40_000);
        source.stop();
    }

    #[test]
    fn test_seek_from_stopped_parks_paused_with_run_in() {
        let source = open(SyntheticMedia::new(10_000_000), StreamKind::Video);
        source.seek(2_000_000).unwrap();

        assert_eq!(source.state(), SourceState::Paused);
        assert_eq!(source.queued(), 5);
        assert_eq!(source.current_timestamp(), Some(2_000_000));

        source.resume();
        let frames = drain(&source, Duration::from_millis(200));
        assert!(frames.len() > 5);
        assert!(frames.windows(2).all(|w| w[0].pts < w[1].pts));
        source.stop();
    }

    #[test]
    fn test_seek_out_of_range_is_rejected() {
        let source = open(SyntheticMedia::new(1_000_000), StreamKind::Audio);
        assert!(matches!(source.seek(-1), Err(PlayerError::SeekError(_))));
        assert!(matches!(source.seek(1_000_001), Err(PlayerError::SeekError(_))));
        assert_eq!(source.state(), SourceState::Stopped);
    }

    #[test]
    fn test_missing_timestamps_are_synthesized() {
        let media = SyntheticMedia::new(1_000_000).without_timestamps();
        let source = open(media, StreamKind::Video);
        source.start().unwrap();

        let frames = drain(&source, Duration::from_secs(5));
        assert_eq!(frames.len(), 25);
        for (index, frame) in frames.iter().enumerate() {
            assert_eq!(frame.pts, index as i64 * 40_000);
        }
    }

    #[test]
    fn test_corrupt_packets_are_skipped() {
        let media = SyntheticMedia::new(1_000_000).with_corruption_every(7);
        let source = open(media, StreamKind::Video);
        source.start().unwrap();

        let frames = drain(&source, Duration::from_secs(5));
        assert!(!frames.is_empty());
        assert!(frames.len() < 25);
        assert!(source.is_finished());
    }

    #[test]
    fn test_restart_after_eof_needs_seek() {
        let source = open(SyntheticMedia::new(400_000), StreamKind::Video);
        source.start().unwrap();
        assert_eq!(drain(&source, Duration::from_secs(5)).len(), 10);

        source.seek(0).unwrap();
        assert_eq!(source.state(), SourceState::Paused);
        source.start().unwrap();
        assert_eq!(drain(&source, Duration::from_secs(5)).len(), 10);
    }
}
