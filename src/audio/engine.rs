use crate::audio::convert::{apply_volume, to_interleaved_i16};
use crate::audio::output::{AudioOutput, AudioSpec};
use crate::audio::ring_buffer::PcmRingBuffer;
use crate::core::{log_ctx, AudioClock, PlayerConfig, PlayerError, Result, StreamKind};
use crate::player::FrameSource;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 音量满刻度（整数缩放因子）
pub const MAX_VOLUME: u32 = 128;

/// 引擎状态：生产者线程、设备回调和控制线程共享，全部是原子量
struct EngineState {
    clock: AudioClock,
    initialized: AtomicBool,
    paused: AtomicBool,
    stopping: AtomicBool,
    end_of_stream: AtomicBool,
    failed: AtomicBool,
    /// 0..=MAX_VOLUME
    volume: AtomicU32,
    /// 缓冲区持续满载时丢弃的 PCM 字节数
    dropped_bytes: AtomicU64,
}

/// 一次 initialize 到 stop 之间的资源
struct Session {
    ring: Arc<PcmRingBuffer>,
    producer: Option<thread::JoinHandle<()>>,
    spec: AudioSpec,
}

/// 音频引擎：转换线程把 PCM 写入环形缓冲区，设备在自己的线程上拉取并推进音频时钟
pub struct AudioEngine {
    state: Arc<EngineState>,
    output: Mutex<Box<dyn AudioOutput>>,
    session: Mutex<Option<Session>>,
    config: PlayerConfig,
}

impl AudioEngine {
    pub fn new(output: Box<dyn AudioOutput>, config: &PlayerConfig) -> Self {
        Self {
            state: Arc::new(EngineState {
                clock: AudioClock::new(),
                initialized: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                end_of_stream: AtomicBool::new(false),
                failed: AtomicBool::new(false),
                volume: AtomicU32::new(MAX_VOLUME),
                dropped_bytes: AtomicU64::new(0),
            }),
            output: Mutex::new(output),
            session: Mutex::new(None),
            config: config.clone(),
        }
    }

    /// 按音频源参数打开设备、分配环形缓冲区并启动转换线程，设备立即开始拉取
    pub fn initialize(&self, source: Arc<FrameSource>) -> Result<()> {
        self.initialize_with(source, false)
    }

    /// 同 `initialize`，但引擎停在暂停状态，`resume()` 之前不取帧也不出声
    pub fn initialize_paused(&self, source: Arc<FrameSource>) -> Result<()> {
        self.initialize_with(source, true)
    }

    fn initialize_with(&self, source: Arc<FrameSource>, start_paused: bool) -> Result<()> {
        if self.state.initialized.load(Ordering::Acquire) {
            return Err(PlayerError::InvalidState("音频引擎已初始化".into()));
        }
        if source.kind() != StreamKind::Audio {
            return Err(PlayerError::NoAudioStream);
        }

        let params = source.stream_params();
        let desired = AudioSpec {
            sample_rate: params.sample_rate,
            channels: params.channels,
            buffer_samples: self.config.device_buffer_samples,
        };
        info!(
            "{} 🔊 初始化音频引擎: {} Hz, {} 声道, 源格式 {:?}{}",
            log_ctx(),
            desired.sample_rate,
            desired.channels,
            params.sample_format,
            if params.planar { " (planar)" } else { "" }
        );

        let bytes_per_frame = desired.bytes_per_frame();
        let ring_bytes = ((desired.sample_rate as f64 * self.config.ring_buffer_seconds) as usize * bytes_per_frame)
            .max(self.config.min_ring_bytes);
        let ring_bytes = ring_bytes / bytes_per_frame * bytes_per_frame;
        let ring = Arc::new(PcmRingBuffer::new(ring_bytes));

        let state = &self.state;
        state.clock.clear();
        state.clock.set_sample_rate(desired.sample_rate);
        state.paused.store(start_paused, Ordering::Release);
        state.stopping.store(false, Ordering::Release);
        state.end_of_stream.store(false, Ordering::Release);
        state.failed.store(false, Ordering::Release);
        state.dropped_bytes.store(0, Ordering::Release);

        let mut output = self.output.lock();

        let callback_state = state.clone();
        let callback_ring = ring.clone();
        let data = Box::new(move |out: &mut [u8]| fill_callback(&callback_state, &callback_ring, bytes_per_frame, out));

        let error_state = state.clone();
        let on_error = Box::new(move |message: String| {
            error!("{} ❌ 音频设备错误: {}", log_ctx(), message);
            error_state.failed.store(true, Ordering::Release);
        });

        let granted = output.open(&desired, data, on_error)?;
        if granted.sample_rate != desired.sample_rate || granted.channels != desired.channels {
            output.close();
            return Err(PlayerError::AudioError(format!(
                "音频设备 {} 给出的规格不兼容: 期望 {} Hz/{} 声道，实际 {} Hz/{} 声道",
                output.name(),
                desired.sample_rate,
                desired.channels,
                granted.sample_rate,
                granted.channels
            )));
        }

        let producer = {
            let state = state.clone();
            let ring = ring.clone();
            let settings = ProducerSettings {
                channels: granted.channels,
                bytes_per_frame,
                max_wait: self.config.producer_max_wait(),
                idle_poll: self.config.idle_poll(),
                backoff: self.config.decode_backoff(),
            };
            let spawned = thread::Builder::new()
                .name("audio-resample".to_string())
                .spawn(move || producer_loop(state, ring, source, settings));
            match spawned {
                Ok(handle) => handle,
                Err(e) => {
                    output.close();
                    return Err(e.into());
                }
            }
        };

        *self.session.lock() = Some(Session {
            ring,
            producer: Some(producer),
            spec: granted,
        });
        state.initialized.store(true, Ordering::Release);
        output.set_paused(start_paused);

        info!(
            "{} ✅ 音频引擎就绪: 设备 {}, 环形缓冲区 {} 字节, 回调 {} 样本",
            log_ctx(),
            output.name(),
            ring_bytes,
            granted.buffer_samples
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.initialized.load(Ordering::Acquire)
    }

    /// 设备实际规格
    pub fn spec(&self) -> Option<AudioSpec> {
        self.session.lock().as_ref().map(|session| session.spec)
    }

    /// 暂停设备拉取，缓冲区内容保持不变
    pub fn pause(&self) {
        self.state.paused.store(true, Ordering::Release);
        self.output.lock().set_paused(true);
        debug!("{} ⏸️  音频引擎暂停", log_ctx());
    }

    pub fn resume(&self) {
        self.state.paused.store(false, Ordering::Release);
        if self.is_initialized() {
            self.output.lock().set_paused(false);
        }
        debug!("{} ▶️  音频引擎恢复", log_ctx());
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::Acquire)
    }

    /// 停止转换线程、关闭设备、释放缓冲区并重置所有计数
    pub fn stop(&self) {
        self.state.stopping.store(true, Ordering::Release);

        let session = self.session.lock().take();
        if let Some(mut session) = session {
            if let Some(handle) = session.producer.take() {
                if handle.join().is_err() {
                    error!("{} ❌ 音频转换线程异常退出", log_ctx());
                }
            }
        }

        {
            let mut output = self.output.lock();
            output.set_paused(true);
            output.close();
        }

        let state = &self.state;
        state.clock.clear();
        state.initialized.store(false, Ordering::Release);
        state.end_of_stream.store(false, Ordering::Release);
        state.failed.store(false, Ordering::Release);
        state.dropped_bytes.store(0, Ordering::Release);
        info!("{} ⏹️  音频引擎已停止", log_ctx());
    }

    /// 清空缓冲区和计时状态，设备保持打开
    pub fn clear(&self) {
        match self.session.lock().as_ref() {
            Some(session) => session.ring.clear_and_then(|| self.state.clock.clear()),
            None => self.state.clock.clear(),
        }
        self.state.end_of_stream.store(false, Ordering::Release);
        debug!("{} 🧹 音频缓冲区已清空", log_ctx());
    }

    /// Seek 用：清空缓冲区并把时钟设为 `pts`
    ///
    /// 设备先暂停，游标、消费计数、基准和时钟在缓冲区锁内一起重置，之后再恢复设备。
    pub fn reset_clock(&self, pts: i64) {
        let mut output = self.output.lock();
        output.set_paused(true);

        match self.session.lock().as_ref() {
            Some(session) => session.ring.clear_and_then(|| self.state.clock.reset(pts)),
            None => self.state.clock.reset(pts),
        }
        self.state.end_of_stream.store(false, Ordering::Release);

        if self.is_initialized() {
            output.set_paused(false);
        }
        info!("{} ⏱️  音频时钟重置到 {}us", log_ctx(), pts);
    }

    /// 当前音频时钟（微秒）
    pub fn clock(&self) -> i64 {
        self.state.clock.now()
    }

    pub fn set_volume(&self, volume: f64) {
        let volume = if volume.is_nan() { 1.0 } else { volume.clamp(0.0, 1.0) };
        let scale = (volume * MAX_VOLUME as f64).round() as u32;
        self.state.volume.store(scale, Ordering::Release);
        debug!("{} 🔈 音量: {:.3} ({}/{})", log_ctx(), volume, scale, MAX_VOLUME);
    }

    pub fn volume(&self) -> f64 {
        self.state.volume.load(Ordering::Acquire) as f64 / MAX_VOLUME as f64
    }

    /// 音频源已结束（转换线程已取完所有帧）
    pub fn is_end_of_stream(&self) -> bool {
        self.state.end_of_stream.load(Ordering::Acquire)
    }

    /// 音频源已结束且缓冲区已被设备取空
    pub fn is_drained(&self) -> bool {
        self.is_end_of_stream() && self.buffered_bytes() == 0
    }

    pub fn buffered_bytes(&self) -> usize {
        self.session
            .lock()
            .as_ref()
            .map_or(0, |session| session.ring.len())
    }

    /// 本次 initialize 以来因缓冲区满载丢弃的字节数
    pub fn dropped_bytes(&self) -> u64 {
        self.state.dropped_bytes.load(Ordering::Acquire)
    }

    /// 设备在运行中报告过错误
    pub fn has_failed(&self) -> bool {
        self.state.failed.load(Ordering::Acquire)
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        if self.is_initialized() {
            self.stop();
        }
    }
}

/// 设备拉数据回调：先填静音，再从缓冲区取数据，最后只对有数据的部分施加音量
fn fill_callback(state: &EngineState, ring: &PcmRingBuffer, bytes_per_frame: usize, out: &mut [u8]) {
    out.fill(0);
    if !state.initialized.load(Ordering::Acquire)
        || state.paused.load(Ordering::Acquire)
        || state.stopping.load(Ordering::Acquire)
    {
        return;
    }

    let mut filled = 0;
    while filled < out.len() {
        let n = ring.pop_and_then(&mut out[filled..], |n| {
            state.clock.advance((n / bytes_per_frame) as u64);
        });
        if n == 0 {
            break;
        }
        filled += n;
    }

    apply_volume(&mut out[..filled], state.volume.load(Ordering::Acquire), MAX_VOLUME);
}

#[derive(Debug, Clone, Copy)]
struct ProducerSettings {
    channels: u16,
    bytes_per_frame: usize,
    max_wait: Duration,
    idle_poll: Duration,
    backoff: Duration,
}

/// 转换线程：取音频帧 → 交织 16 位 PCM → 写入环形缓冲区
fn producer_loop(state: Arc<EngineState>, ring: Arc<PcmRingBuffer>, source: Arc<FrameSource>, settings: ProducerSettings) {
    info!("{} 🎵 音频转换线程启动", log_ctx());
    let mut written_frames: u64 = 0;

    while !state.stopping.load(Ordering::Acquire) {
        // 先记下代号再看暂停标志：pause + reset_clock 落在两者之间时，
        // 这里取到的帧会因代号过期被丢弃
        let generation = ring.generation();
        if state.paused.load(Ordering::Acquire) {
            thread::sleep(settings.idle_poll);
            continue;
        }

        let frame = match source.take_next_frame() {
            Some(frame) => frame,
            None => {
                if source.is_eof() {
                    if !state.end_of_stream.swap(true, Ordering::AcqRel) {
                        info!("{} 🏁 音频源结束，已写入 {} 帧", log_ctx(), written_frames);
                    }
                    thread::sleep(settings.idle_poll);
                } else {
                    thread::sleep(settings.backoff);
                }
                continue;
            }
        };

        state.end_of_stream.store(false, Ordering::Release);
        if ring.generation() != generation {
            debug!("{} 丢弃缓冲区清空前取出的音频 pts={}us", log_ctx(), frame.pts);
            continue;
        }
        if state.clock.establish_base(frame.pts) {
            debug!("{} ⏱️  音频时钟基准: {}us", log_ctx(), frame.pts);
        }

        let Some(samples) = frame.audio() else {
            warn!("{} ⚠️  音频队列中出现非音频帧，已丢弃", log_ctx());
            continue;
        };
        let pcm = match to_interleaved_i16(samples, settings.channels) {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!("{} ⚠️  音频转换失败（已跳过）: {}", log_ctx(), e);
                continue;
            }
        };

        let deadline = Instant::now() + settings.max_wait;
        let mut offset = 0;
        while offset < pcm.len() {
            if state.stopping.load(Ordering::Acquire) {
                break;
            }
            match ring.push_if(generation, &pcm[offset..], settings.bytes_per_frame) {
                None => {
                    debug!("{} 丢弃缓冲区清空前转换的音频 pts={}us", log_ctx(), frame.pts);
                    break;
                }
                Some(n) => offset += n,
            }
            if offset >= pcm.len() {
                break;
            }
            if Instant::now() >= deadline {
                let dropped = pcm.len() - offset;
                let total = state.dropped_bytes.fetch_add(dropped as u64, Ordering::AcqRel) + dropped as u64;
                warn!(
                    "{} ⚠️  环形缓冲区持续满载 {:?}，丢弃 {} 字节 PCM（累计 {}）",
                    log_ctx(),
                    settings.max_wait,
                    dropped,
                    total
                );
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        written_frames += 1;
    }

    info!("{} 🛑 音频转换线程退出", log_ctx());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::{AudioCallback, ErrorCallback, SimulatedAudioOutput};
    use crate::player::synthetic::{SyntheticBackend, SyntheticMedia};

    fn audio_source(duration_us: i64) -> Arc<FrameSource> {
        let backend = SyntheticBackend::new(SyntheticMedia::new(duration_us));
        Arc::new(FrameSource::open(&backend, "synthetic://tone", StreamKind::Audio, &PlayerConfig::default()).unwrap())
    }

    fn engine() -> AudioEngine {
        AudioEngine::new(Box::new(SimulatedAudioOutput::new()), &PlayerConfig::default())
    }

    /// 打开成功但从不拉数据的设备
    struct StalledOutput;

    impl AudioOutput for StalledOutput {
        fn open(&mut self, desired: &AudioSpec, _data: AudioCallback, _error: ErrorCallback) -> Result<AudioSpec> {
            Ok(*desired)
        }

        fn set_paused(&mut self, _paused: bool) {}

        fn close(&mut self) {}

        fn name(&self) -> String {
            "Stalled".to_string()
        }
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
    fn test_clock_advances_with_consumption() {
        let source = audio_source(10_000_000);
        let engine = engine();
        engine.initialize(source.clone()).unwrap();
        source.start().unwrap();

        assert!(wait_until(Duration::from_secs(2), || engine.clock() > 100_000));
        let mut last = engine.clock();
        for _ in 0..20 {
            thread::sleep(Duration::from_millis(5));
            let now = engine.clock();
            assert!(now >= last);
            last = now;
        }
        engine.stop();
        source.stop();
        assert_eq!(engine.clock(), 0);
    }

    #[test]
    fn test_pause_freezes_clock() {
        let source = audio_source(10_000_000);
        let engine = engine();
        engine.initialize(source.clone()).unwrap();
        source.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || engine.clock() > 50_000));

        engine.pause();
        thread::sleep(Duration::from_millis(30));
        let frozen = engine.clock();
        let buffered = engine.buffered_bytes();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(engine.clock(), frozen);
        assert_eq!(engine.buffered_bytes(), buffered);

        engine.resume();
        assert!(wait_until(Duration::from_secs(1), || engine.clock() > frozen));
        engine.stop();
        source.stop();
    }

    #[test]
    fn test_reset_clock_sets_target() {
        let source = audio_source(10_000_000);
        let engine = engine();
        engine.initialize(source.clone()).unwrap();
        source.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || engine.clock() > 50_000));

        engine.pause();
        engine.reset_clock(2_000_000);
        assert_eq!(engine.clock(), 2_000_000);
        assert_eq!(engine.buffered_bytes(), 0);
        engine.stop();
        source.stop();
    }

    #[test]
    fn test_short_source_drains() {
        let source = audio_source(300_000);
        let engine = engine();
        engine.initialize(source.clone()).unwrap();
        source.start().unwrap();

        assert!(wait_until(Duration::from_secs(3), || engine.is_drained()));
        // 14 帧 * 1024 样本
        assert!(engine.clock() >= 14 * 1024 * 1_000_000 / 48_000 - 1);
        engine.stop();
    }

    #[test]
    fn test_full_ring_drops_after_bounded_wait() {
        let config = PlayerConfig {
            ring_buffer_seconds: 0.01,
            min_ring_bytes: 6000,
            producer_max_wait_ms: 30,
            ..PlayerConfig::default()
        };
        let source = audio_source(10_000_000);
        let engine = AudioEngine::new(Box::new(StalledOutput), &config);
        engine.initialize(source.clone()).unwrap();
        source.start().unwrap();

        // 一帧 1024 样本 * 4 字节：第一帧写入 4096，第二帧只写得下 1904，其余丢弃
        assert!(wait_until(Duration::from_secs(2), || engine.dropped_bytes() >= 2192));
        assert_eq!(engine.buffered_bytes(), 6000);

        // 转换线程没有卡住：整帧继续被丢弃，缓冲区保持满载
        let dropped = engine.dropped_bytes();
        assert!(wait_until(Duration::from_secs(2), || engine.dropped_bytes() >= dropped + 3 * 4096));
        assert_eq!(engine.buffered_bytes(), 6000);
        assert_eq!(engine.clock(), 0);

        engine.stop();
        source.stop();
        assert_eq!(engine.dropped_bytes(), 0);
    }

    #[test]
    fn test_initialize_paused_takes_nothing() {
        let source = audio_source(10_000_000);
        let engine = engine();
        engine.initialize_paused(source.clone()).unwrap();
        source.start().unwrap();
        assert!(wait_until(Duration::from_secs(1), || source.queued() >= 10));

        thread::sleep(Duration::from_millis(100));
        assert!(engine.is_paused());
        assert_eq!(engine.buffered_bytes(), 0);
        assert_eq!(engine.clock(), 0);

        engine.resume();
        assert!(wait_until(Duration::from_secs(2), || engine.clock() > 0));
        engine.stop();
        source.stop();
    }

    #[test]
    fn test_incompatible_device_spec_fails() {
        let source = audio_source(1_000_000);
        let output = SimulatedAudioOutput::new().granting(AudioSpec {
            sample_rate: 44_100,
            channels: 2,
            buffer_samples: 1024,
        });
        let engine = AudioEngine::new(Box::new(output), &PlayerConfig::default());
        assert!(matches!(engine.initialize(source), Err(PlayerError::AudioError(_))));
        assert!(!engine.is_initialized());
    }

    #[test]
    fn test_volume_clamped_and_nan() {
        let engine = engine();
        engine.set_volume(0.5);
        assert_eq!(engine.volume(), 0.5);
        engine.set_volume(3.0);
        assert_eq!(engine.volume(), 1.0);
        engine.set_volume(-1.0);
        assert_eq!(engine.volume(), 0.0);
        engine.set_volume(f64::NAN);
        assert_eq!(engine.volume(), 1.0);
    }

    #[test]
    fn test_mute_silences_output() {
        let source = audio_source(10_000_000);
        let output = SimulatedAudioOutput::new();
        let stats = output.stats();
        let engine = AudioEngine::new(Box::new(output), &PlayerConfig::default());
        engine.initialize(source.clone()).unwrap();
        source.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || stats.last_peak() > 0));

        engine.set_volume(0.0);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(stats.last_peak(), 0);
        engine.stop();
        source.stop();
    }

    #[test]
    fn test_device_error_marks_failed() {
        let source = audio_source(10_000_000);
        let engine = AudioEngine::new(Box::new(SimulatedAudioOutput::new().failing_after(3)), &PlayerConfig::default());
        engine.initialize(source.clone()).unwrap();
        assert!(wait_until(Duration::from_secs(1), || engine.has_failed()));
        engine.stop();
        assert!(!engine.has_failed());
    }
}
