use crate::audio::{AudioEngine, AudioOutput};
use crate::core::{
    log_ctx, AtomicPlaybackState, MediaInfo, PlaybackState, PlayerConfig, PlayerError, PlayerSnapshot, Result,
    SourceState, StreamKind, TIME_BASE,
};
use crate::player::source::MediaBackend;
use crate::player::sync::{base_delay_us, SyncAction, SyncPolicy};
use crate::player::FrameSource;
use crate::renderer::{InputEvent, VideoRenderer};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

/// 时间戳回调：(当前视频 PTS, 总时长)，单位微秒
pub type TimestampCallback = Arc<dyn Fn(i64, i64) + Send + Sync>;
/// 状态变化回调
pub type StateCallback = Arc<dyn Fn(PlaybackState) + Send + Sync>;
/// 输入事件回调（由渲染器转发）
pub type InputCallback = Arc<dyn Fn(InputEvent) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    timestamp: Option<TimestampCallback>,
    state: Option<StateCallback>,
    input: Option<InputCallback>,
}

/// 一次 open 打开的媒体
struct Media {
    path: String,
    video: Arc<FrameSource>,
    audio: Arc<FrameSource>,
    info: MediaInfo,
}

/// open 到 close 之间的会话：媒体 + 渲染线程
struct Session {
    media: Arc<Media>,
    render_stop: Arc<AtomicBool>,
    render_thread: Option<thread::JoinHandle<()>>,
}

struct ManagerInner {
    config: PlayerConfig,
    backend: Arc<dyn MediaBackend>,
    engine: AudioEngine,
    renderer: Arc<dyn VideoRenderer>,
    state: AtomicPlaybackState,
    /// 串行化所有控制操作（open/play/pause/seek/stop/close）
    control: Mutex<()>,
    session: Mutex<Option<Session>>,
    /// 最近一次交给渲染器的视频 PTS
    last_video_pts: AtomicI64,
    /// stop 或自然播完后，下次 play 需要先回到开头
    needs_rewind: AtomicBool,
    /// 每次 seek 加一，渲染线程据此清除平滑历史
    epoch: AtomicU64,
    callbacks: Mutex<Callbacks>,
}

/// 播放管理器 - 整体控制播放流程
///
/// 持有视频/音频两个 FrameSource、音频引擎和渲染线程；音频时钟是主时钟，
/// 渲染线程按它的节奏把视频帧交给渲染器。
pub struct PlaybackManager {
    inner: Arc<ManagerInner>,
}

impl PlaybackManager {
    pub fn new(
        config: PlayerConfig,
        backend: Arc<dyn MediaBackend>,
        audio_output: Box<dyn AudioOutput>,
        renderer: Arc<dyn VideoRenderer>,
    ) -> Result<Self> {
        config.validate()?;
        info!("{} 🎮 创建播放管理器...", log_ctx());
        let engine = AudioEngine::new(audio_output, &config);
        let manager = Self {
            inner: Arc::new(ManagerInner {
                config,
                backend,
                engine,
                renderer,
                state: AtomicPlaybackState::new(PlaybackState::Stopped),
                control: Mutex::new(()),
                session: Mutex::new(None),
                last_video_pts: AtomicI64::new(0),
                needs_rewind: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                callbacks: Mutex::new(Callbacks::default()),
            }),
        };
        info!("{} ✅ 播放管理器创建完成", log_ctx());
        Ok(manager)
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.inner.config
    }

    // ==================== 回调注册 ====================

    pub fn on_timestamp(&self, callback: TimestampCallback) {
        self.inner.callbacks.lock().timestamp = Some(callback);
    }

    pub fn on_state_change(&self, callback: StateCallback) {
        self.inner.callbacks.lock().state = Some(callback);
    }

    pub fn on_input(&self, callback: InputCallback) {
        self.inner.callbacks.lock().input = Some(callback);
    }

    // ==================== 控制 ====================

    /// 打开媒体文件
    ///
    /// 两个 FrameSource 各自打开一次，初始化音频引擎、启动渲染器和渲染线程。
    /// 成功后仍处于 Stopped，等待 `play()`。缺少音视频流、音频设备或渲染器
    /// 初始化失败都会进入 Error，直到 `close()`。
    pub fn open(&self, path: &str) -> Result<MediaInfo> {
        self.close();

        let inner = &self.inner;
        let _control = inner.control.lock();
        info!("{} 📂 打开媒体文件: {}", log_ctx(), path);

        let opened = FrameSource::open(inner.backend.as_ref(), path, StreamKind::Video, &inner.config).and_then(|video| {
            let audio = FrameSource::open(inner.backend.as_ref(), path, StreamKind::Audio, &inner.config)?;
            Ok((Arc::new(video), Arc::new(audio)))
        });
        let (video, audio) = match opened {
            Ok(sources) => sources,
            Err(e) => {
                error!("{} ❌ 打开媒体失败: {}", log_ctx(), e);
                inner.set_state(PlaybackState::Error);
                return Err(e);
            }
        };
        let info = media_info(&video, &audio);
        info!("{} 📎 媒体信息: {:?}", log_ctx(), info);

        if let Err(e) = inner.engine.initialize(audio.clone()) {
            error!("{} ❌ 音频引擎初始化失败: {}", log_ctx(), e);
            inner.set_state(PlaybackState::Error);
            return Err(e);
        }

        if let Err(e) = inner.renderer.start(info.width, info.height) {
            error!("{} ❌ 渲染器启动失败: {}", log_ctx(), e);
            inner.engine.stop();
            inner.set_state(PlaybackState::Error);
            return Err(e);
        }

        let weak: Weak<ManagerInner> = Arc::downgrade(inner);
        inner.renderer.set_input_handler(Arc::new(move |event: InputEvent| {
            if let Some(inner) = weak.upgrade() {
                inner.notify_input(event);
            }
        }));

        let media = Arc::new(Media {
            path: path.to_string(),
            video,
            audio,
            info: info.clone(),
        });

        let render_stop = Arc::new(AtomicBool::new(false));
        let render_thread = {
            let inner = inner.clone();
            let media = media.clone();
            let stop = render_stop.clone();
            thread::Builder::new()
                .name("render-pacing".to_string())
                .spawn(move || render_loop(inner, media, stop))
        };
        let render_thread = match render_thread {
            Ok(handle) => handle,
            Err(e) => {
                inner.engine.stop();
                inner.renderer.stop();
                inner.set_state(PlaybackState::Error);
                return Err(e.into());
            }
        };

        *inner.session.lock() = Some(Session {
            media,
            render_stop,
            render_thread: Some(render_thread),
        });
        inner.last_video_pts.store(0, Ordering::Release);
        inner.needs_rewind.store(false, Ordering::Release);
        inner.set_state(PlaybackState::Stopped);

        info!("{} ✅ 媒体已就绪: {}", log_ctx(), path);
        Ok(info)
    }

    /// 播放
    ///
    /// Paused 时等同于 resume；stop 或播完之后会先回到开头再播放。
    pub fn play(&self) -> Result<()> {
        let inner = &self.inner;
        let _control = inner.control.lock();
        let media = inner.require_media()?;

        match inner.state.load() {
            PlaybackState::Error => Err(PlayerError::InvalidState("播放器处于错误状态，需要先 close".into())),
            PlaybackState::Playing => Ok(()),
            PlaybackState::Paused => inner.resume_locked(&media),
            PlaybackState::Stopped => {
                if inner.needs_rewind.load(Ordering::Acquire) {
                    info!("{} 🔁 从停止状态重新播放: {}", log_ctx(), media.path);
                    inner.ensure_engine(&media)?;
                    // 自然播完时引擎仍在运行，先停住再清缓冲区
                    inner.engine.pause();
                    inner.reposition(&media, 0)?;
                }
                info!("{} 🎬 播放", log_ctx());
                inner.resume_locked(&media)
            }
        }
    }

    /// 暂停播放（两个解码线程和音频设备同时暂停）
    pub fn pause(&self) -> Result<()> {
        let inner = &self.inner;
        let _control = inner.control.lock();
        let media = inner.require_media()?;

        match inner.state.load() {
            PlaybackState::Error => Err(PlayerError::InvalidState("播放器处于错误状态".into())),
            PlaybackState::Playing => {
                info!("{} ⏸️  暂停", log_ctx());
                inner.pause_locked(&media);
                inner.set_state(PlaybackState::Paused);
                Ok(())
            }
            PlaybackState::Paused | PlaybackState::Stopped => Ok(()),
        }
    }

    /// 从暂停恢复，其他状态下无操作
    pub fn resume(&self) -> Result<()> {
        let inner = &self.inner;
        let _control = inner.control.lock();
        let media = inner.require_media()?;

        match inner.state.load() {
            PlaybackState::Error => Err(PlayerError::InvalidState("播放器处于错误状态".into())),
            PlaybackState::Paused => inner.resume_locked(&media),
            PlaybackState::Playing | PlaybackState::Stopped => Ok(()),
        }
    }

    /// ==================== 音画同步核心: Seek 跳转 ====================
    ///
    /// 1. 暂停两个解码线程和音频设备，避免和正在进行的缓冲区消费竞争
    /// 2. 目标时间钳制到 [0, duration]
    /// 3. 重置音频时钟和环形缓冲区到目标时间
    /// 4. 两个 FrameSource 各自 seek：回退到关键帧、冲刷解码器、解码丢弃到目标、再缓冲 5 帧
    /// 5. 播放器停在 Paused，由调用方 `play()`/`resume()` 继续
    ///
    /// 任一条流 seek 失败都返回错误并保持 Paused（不进入 Error），调用方可以重试。
    pub fn seek(&self, seconds: f64) -> Result<()> {
        let inner = &self.inner;
        let _control = inner.control.lock();
        let media = inner.require_media()?;

        if inner.state.load() == PlaybackState::Error {
            return Err(PlayerError::InvalidState("播放器处于错误状态".into()));
        }

        // 步骤 1
        inner.pause_locked(&media);
        inner.set_state(PlaybackState::Paused);

        // 步骤 2
        let duration = media.info.duration_us.max(0);
        let target = ((seconds.max(0.0) * TIME_BASE as f64) as i64).min(duration);
        info!("{} 🎯 Seek 到: {:.3}s（{}us）", log_ctx(), seconds, target);

        inner.ensure_engine(&media)?;
        inner.engine.pause();

        // 步骤 3 + 4
        match inner.reposition(&media, target) {
            Ok(()) => {
                info!("{} ✅ Seek 完成: {}us", log_ctx(), target);
                Ok(())
            }
            Err(e) => {
                error!("{} ❌ Seek 失败: {}", log_ctx(), e);
                Err(match e {
                    PlayerError::SeekError(_) => e,
                    other => PlayerError::SeekError(other.to_string()),
                })
            }
        }
    }

    /// 停止播放：停止解码线程、关闭音频设备，位置保持，下次 play 从头开始
    pub fn stop(&self) {
        let inner = &self.inner;
        let _control = inner.control.lock();
        inner.stop_locked();
    }

    /// 关闭媒体，等待所有线程退出
    pub fn close(&self) {
        let inner = &self.inner;
        let session = {
            let _control = inner.control.lock();
            let session = inner.session.lock().take();
            if session.is_some() {
                info!("{} ⏹️  关闭媒体", log_ctx());
            }
            if let Some(session) = &session {
                session.render_stop.store(true, Ordering::Release);
                inner.stop_sources(&session.media);
                inner.renderer.stop();
            }
            inner.engine.stop();
            inner.needs_rewind.store(false, Ordering::Release);
            inner.last_video_pts.store(0, Ordering::Release);
            inner.set_state(PlaybackState::Stopped);
            session
        };

        // 释放控制锁后再等渲染线程，回调里调用控制接口不会死锁
        if let Some(mut session) = session {
            if let Some(handle) = session.render_thread.take() {
                if handle.join().is_err() {
                    error!("{} ❌ 渲染线程异常退出", log_ctx());
                }
            }
            session.media.video.close();
            session.media.audio.close();
            info!("{} ✅ 媒体已关闭，所有线程已清理", log_ctx());
        }
    }

    // ==================== 查询 ====================

    pub fn state(&self) -> PlaybackState {
        self.inner.state.load()
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    /// 总时长（秒）
    pub fn duration(&self) -> f64 {
        self.inner
            .current_media()
            .map_or(0.0, |media| media.info.duration_us as f64 / TIME_BASE as f64)
    }

    /// 当前播放时间（微秒）：音频时钟优先，其次是最近渲染的视频 PTS
    pub fn current_timestamp(&self) -> i64 {
        self.inner.current_timestamp()
    }

    /// 当前播放时间（秒）
    pub fn position(&self) -> f64 {
        self.current_timestamp() as f64 / TIME_BASE as f64
    }

    pub fn set_volume(&self, volume: f64) {
        self.inner.engine.set_volume(volume);
    }

    pub fn volume(&self) -> f64 {
        self.inner.engine.volume()
    }

    /// 两条流都到达 EOF、队列已排空且播放器已停止
    pub fn is_finished(&self) -> bool {
        match self.inner.current_media() {
            Some(media) => {
                self.state() == PlaybackState::Stopped && media.video.is_finished() && media.audio.is_finished()
            }
            None => false,
        }
    }

    pub fn media_info(&self) -> Option<MediaInfo> {
        self.inner.current_media().map(|media| media.info.clone())
    }

    pub fn state_snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            state: self.state(),
            position: self.position(),
            duration: self.duration(),
            volume: self.volume(),
            media_info: self.media_info(),
        }
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl ManagerInner {
    fn current_media(&self) -> Option<Arc<Media>> {
        self.session.lock().as_ref().map(|session| session.media.clone())
    }

    fn require_media(&self) -> Result<Arc<Media>> {
        self.current_media()
            .ok_or_else(|| PlayerError::InvalidState("没有打开的媒体".into()))
    }

    fn current_timestamp(&self) -> i64 {
        let clock = self.engine.clock();
        if clock > 0 {
            return clock;
        }
        let video = self.last_video_pts.load(Ordering::Acquire);
        if video > 0 {
            video
        } else {
            0
        }
    }

    fn set_state(&self, state: PlaybackState) {
        let old = self.state.load();
        self.state.store(state);
        if old != state {
            info!("{} 🔄 播放状态: {:?} → {:?}", log_ctx(), old, state);
            self.notify_state(state);
        }
    }

    fn notify_state(&self, state: PlaybackState) {
        let callback = self.callbacks.lock().state.clone();
        if let Some(callback) = callback {
            callback(state);
        }
    }

    fn notify_timestamp(&self, pts: i64, duration: i64) {
        let callback = self.callbacks.lock().timestamp.clone();
        if let Some(callback) = callback {
            callback(pts, duration);
        }
    }

    fn notify_input(&self, event: InputEvent) {
        let callback = self.callbacks.lock().input.clone();
        match callback {
            Some(callback) => callback(event),
            None => debug!("{} 输入事件未注册处理: {:?}", log_ctx(), event),
        }
    }

    /// 运行中出现不可恢复的错误：进入 Error，解码线程和音频引擎停在暂停状态直到 close
    fn fail(&self, media: &Media, reason: &str) {
        if self.state.transition(PlaybackState::Playing, PlaybackState::Error)
            || self.state.transition(PlaybackState::Paused, PlaybackState::Error)
        {
            error!("{} ❌ 播放器进入错误状态: {}", log_ctx(), reason);
            self.pause_locked(media);
            self.notify_state(PlaybackState::Error);
        }
    }

    fn pause_locked(&self, media: &Media) {
        media.video.pause();
        media.audio.pause();
        self.engine.pause();
    }

    fn resume_locked(&self, media: &Media) -> Result<()> {
        ensure_running(&media.video)?;
        ensure_running(&media.audio)?;
        self.engine.resume();
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    fn stop_sources(&self, media: &Media) {
        media.video.stop();
        media.audio.stop();
    }

    fn stop_locked(&self) {
        let Some(media) = self.current_media() else {
            return;
        };
        info!("{} ⏹️  停止播放", log_ctx());
        self.stop_sources(&media);
        // 停止位置的旧帧不能留到下次播放
        media.video.discard_queued();
        media.audio.discard_queued();
        self.engine.stop();
        self.renderer.clear_frames();
        self.needs_rewind.store(true, Ordering::Release);
        if self.state.load() != PlaybackState::Error {
            self.set_state(PlaybackState::Stopped);
        }
    }

    /// 音频引擎在 stop 之后需要重新初始化，重新初始化后停在暂停状态
    fn ensure_engine(&self, media: &Media) -> Result<()> {
        if self.engine.is_initialized() {
            return Ok(());
        }
        debug!("{} 🔊 重新初始化音频引擎", log_ctx());
        if let Err(e) = self.engine.initialize_paused(media.audio.clone()) {
            error!("{} ❌ 音频引擎初始化失败: {}", log_ctx(), e);
            self.set_state(PlaybackState::Error);
            return Err(e);
        }
        Ok(())
    }

    /// 重置音频时钟并让两条流都定位到 `target_us`，两条流都停在 Paused
    fn reposition(&self, media: &Media, target_us: i64) -> Result<()> {
        self.engine.reset_clock(target_us);
        // 两条流时长可能不同，各自钳制
        let clamp = |source: &FrameSource| match source.duration_us() {
            d if d > 0 => target_us.min(d),
            _ => target_us,
        };
        let result = media
            .video
            .seek(clamp(&media.video))
            .and_then(|_| media.audio.seek(clamp(&media.audio)));

        self.renderer.clear_frames();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.last_video_pts.store(target_us, Ordering::Release);
        if result.is_ok() {
            self.needs_rewind.store(false, Ordering::Release);
        }
        result
    }
}

/// Paused → resume，Stopped → start，Running 不变
fn ensure_running(source: &FrameSource) -> Result<()> {
    match source.state() {
        SourceState::Running => Ok(()),
        SourceState::Paused => {
            source.resume();
            Ok(())
        }
        SourceState::Stopped => source.start(),
    }
}

fn media_info(video: &FrameSource, audio: &FrameSource) -> MediaInfo {
    let v = video.stream_params();
    let a = audio.stream_params();
    MediaInfo {
        duration_us: v.duration_us.max(a.duration_us),
        width: v.width,
        height: v.height,
        fps: v.frame_rate,
        video_codec: v.codec_name.clone(),
        audio_codec: a.codec_name.clone(),
        sample_rate: a.sample_rate,
        channels: a.channels,
    }
}

/// 渲染/节奏线程：以音频时钟为基准把视频帧交给渲染器
fn render_loop(inner: Arc<ManagerInner>, media: Arc<Media>, stop: Arc<AtomicBool>) {
    info!("{} 🎞️  渲染线程启动", log_ctx());
    let config = &inner.config;
    let mut sync = SyncPolicy::new(config);
    let mut epoch = inner.epoch.load(Ordering::Acquire);
    let mut rendered: u64 = 0;

    while !stop.load(Ordering::Acquire) {
        let state = inner.state.load();
        if matches!(state, PlaybackState::Playing | PlaybackState::Paused) {
            if inner.engine.has_failed() {
                inner.fail(&media, "音频设备错误");
                continue;
            }
            if inner.renderer.has_failed() {
                inner.fail(&media, "渲染器错误");
                continue;
            }
        }

        if state != PlaybackState::Playing {
            thread::sleep(config.idle_poll());
            continue;
        }

        let current_epoch = inner.epoch.load(Ordering::Acquire);
        if current_epoch != epoch {
            sync.reset();
            epoch = current_epoch;
        }

        let Some(frame) = media.video.take_next_frame() else {
            if media.video.is_eof() {
                // 视频已播完，等音频也播完
                if inner.engine.is_drained() {
                    if inner.state.transition(PlaybackState::Playing, PlaybackState::Stopped) {
                        inner.needs_rewind.store(true, Ordering::Release);
                        info!("{} 🏁 播放完成，共渲染 {} 帧", log_ctx(), rendered);
                        inner.notify_state(PlaybackState::Stopped);
                    }
                } else {
                    thread::sleep(config.idle_poll());
                }
            } else {
                thread::sleep(config.decode_backoff());
            }
            continue;
        };

        // 取帧期间发生了 seek，这一帧属于旧位置
        if inner.epoch.load(Ordering::Acquire) != epoch {
            continue;
        }

        let pts = frame.pts;
        let audio_clock = inner.engine.clock();
        let base = base_delay_us(frame.duration, media.info.fps);
        let decision = sync.compute(pts, audio_clock, base);
        match decision.action {
            SyncAction::CatchUp => warn!(
                "{} ⚠️  视频落后 {}ms，立即追赶",
                log_ctx(),
                -decision.diff_us / 1000
            ),
            SyncAction::Corrected => debug!(
                "{} 🔧 同步校正: diff={}ms, delay {}ms → {}ms",
                log_ctx(),
                decision.diff_us / 1000,
                base / 1000,
                decision.delay_us / 1000
            ),
            SyncAction::InSync | SyncAction::Drift => {}
        }

        inner.renderer.enqueue_frame(frame);
        inner.last_video_pts.store(pts, Ordering::Release);
        rendered += 1;
        inner.notify_timestamp(pts, media.info.duration_us);

        let delay_ms = decision.delay_us / 1000;
        if delay_ms > 0 {
            thread::sleep(Duration::from_millis(delay_ms as u64));
        }
    }

    info!("{} 🛑 渲染线程退出，共渲染 {} 帧", log_ctx(), rendered);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SimulatedAudioOutput;
    use crate::player::synthetic::{SyntheticBackend, SyntheticMedia};
    use crate::renderer::FrameSink;
    use std::time::Instant;

    fn manager_with(media: SyntheticMedia, output: SimulatedAudioOutput) -> (PlaybackManager, Arc<FrameSink>) {
        let sink = Arc::new(FrameSink::new(5));
        let manager = PlaybackManager::new(
            PlayerConfig::default(),
            Arc::new(SyntheticBackend::new(media)),
            Box::new(output),
            sink.clone(),
        )
        .unwrap();
        (manager, sink)
    }

    fn manager(duration_us: i64) -> (PlaybackManager, Arc<FrameSink>) {
        manager_with(SyntheticMedia::new(duration_us), SimulatedAudioOutput::new())
    }

    fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_open_stays_stopped() {
        let (manager, _sink) = manager(2_000_000);
        let info = manager.open("synthetic://clip").unwrap();
        assert_eq!(info.duration_us, 2_000_000);
        assert_eq!(info.width, 64);
        assert_eq!(manager.state(), PlaybackState::Stopped);
        assert_eq!(manager.current_timestamp(), 0);
        assert!(!manager.is_finished());
    }

    #[test]
    fn test_missing_audio_stream_is_error() {
        let (manager, _sink) = manager_with(SyntheticMedia::new(1_000_000).video_only(), SimulatedAudioOutput::new());
        assert!(matches!(manager.open("synthetic://clip"), Err(PlayerError::NoAudioStream)));
        assert_eq!(manager.state(), PlaybackState::Error);
        assert!(manager.play().is_err());

        manager.close();
        assert_eq!(manager.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_device_open_failure_is_error_state() {
        let (manager, _sink) =
            manager_with(SyntheticMedia::new(1_000_000), SimulatedAudioOutput::new().failing_open("busy"));
        assert!(manager.open("synthetic://clip").is_err());
        assert_eq!(manager.state(), PlaybackState::Error);

        manager.close();
        assert_eq!(manager.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_play_pause_state_callbacks() {
        let (manager, _sink) = manager(5_000_000);
        let states = Arc::new(Mutex::new(Vec::new()));
        let log = states.clone();
        manager.on_state_change(Arc::new(move |state: PlaybackState| log.lock().push(state)));

        manager.open("synthetic://clip").unwrap();
        manager.play().unwrap();
        assert!(manager.is_playing());
        manager.pause().unwrap();
        manager.resume().unwrap();
        manager.stop();

        assert_eq!(
            *states.lock(),
            vec![
                PlaybackState::Playing,
                PlaybackState::Paused,
                PlaybackState::Playing,
                PlaybackState::Stopped
            ]
        );
    }

    #[test]
    fn test_renderer_receives_frames() {
        let (manager, sink) = manager(5_000_000);
        let stamps = Arc::new(AtomicU64::new(0));
        let counter = stamps.clone();
        manager.on_timestamp(Arc::new(move |_pts: i64, _duration: i64| {
            counter.fetch_add(1, Ordering::AcqRel);
        }));

        manager.open("synthetic://clip").unwrap();
        manager.play().unwrap();
        assert!(wait_until(Duration::from_secs(2), || sink.stats().frames_enqueued >= 5));
        assert!(stamps.load(Ordering::Acquire) >= 5);
        manager.close();
    }

    #[test]
    fn test_seek_leaves_paused_at_target() {
        let (manager, _sink) = manager(5_000_000);
        manager.open("synthetic://clip").unwrap();
        manager.seek(2.0).unwrap();
        assert_eq!(manager.state(), PlaybackState::Paused);
        assert_eq!(manager.current_timestamp(), 2_000_000);

        // 超出范围的目标被钳制
        manager.seek(99.0).unwrap();
        assert_eq!(manager.current_timestamp(), 5_000_000);
        manager.seek(-3.0).unwrap();
        assert_eq!(manager.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_plays_to_completion_and_replays() {
        let (manager, _sink) = manager(500_000);
        manager.open("synthetic://clip").unwrap();
        manager.play().unwrap();

        assert!(wait_until(Duration::from_secs(5), || manager.is_finished()));
        assert_eq!(manager.state(), PlaybackState::Stopped);

        manager.play().unwrap();
        assert!(manager.is_playing());
        assert!(!manager.is_finished());
        assert!(wait_until(Duration::from_secs(5), || manager.is_finished()));
    }

    #[test]
    fn test_device_loss_moves_to_error() {
        let (manager, _sink) =
            manager_with(SyntheticMedia::new(5_000_000), SimulatedAudioOutput::new().failing_after(5));
        manager.open("synthetic://clip").unwrap();
        manager.play().unwrap();
        assert!(wait_until(Duration::from_secs(2), || manager.state() == PlaybackState::Error));
        assert!(matches!(manager.play(), Err(PlayerError::InvalidState(_))));
        assert!(matches!(manager.seek(1.0), Err(PlayerError::InvalidState(_))));

        // 进入 Error 后解码线程和音频引擎都停下
        let media = manager.inner.current_media().unwrap();
        assert!(wait_until(Duration::from_secs(1), || {
            media.audio.state() == SourceState::Paused && manager.inner.engine.is_paused()
        }));
        assert_eq!(media.video.state(), SourceState::Paused);
    }

    #[test]
    fn test_seek_failure_stays_paused_and_retries() {
        let media = SyntheticMedia::new(5_000_000);
        let fault = media.seek_fault();
        let (manager, _sink) = manager_with(media, SimulatedAudioOutput::new());
        manager.open("synthetic://clip").unwrap();
        manager.play().unwrap();

        fault.store(true, Ordering::Release);
        assert!(matches!(manager.seek(2.0), Err(PlayerError::SeekError(_))));
        assert_eq!(manager.state(), PlaybackState::Paused);

        fault.store(false, Ordering::Release);
        manager.seek(2.0).unwrap();
        assert_eq!(manager.current_timestamp(), 2_000_000);
        manager.play().unwrap();
        assert!(manager.is_playing());
        manager.close();
    }

    #[test]
    fn test_stop_discards_queued_frames() {
        let (manager, _sink) = manager(5_000_000);
        manager.open("synthetic://clip").unwrap();
        manager.play().unwrap();
        let media = manager.inner.current_media().unwrap();
        assert!(wait_until(Duration::from_secs(2), || media.audio.queued() > 0));

        manager.stop();
        assert_eq!(media.audio.queued(), 0);
        assert_eq!(media.video.queued(), 0);
        assert!(!manager.inner.engine.is_initialized());
    }

    #[test]
    fn test_volume_passthrough() {
        let (manager, _sink) = manager(1_000_000);
        manager.set_volume(0.25);
        assert_eq!(manager.volume(), 0.25);
        let snapshot = manager.state_snapshot();
        assert_eq!(snapshot.volume, 0.25);
        assert!(snapshot.media_info.is_none());
    }
}
