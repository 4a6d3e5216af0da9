use crate::core::{log_ctx, PlayerError, Result};
use log::{debug, error, info};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 音频设备规格（样本格式固定为交织的 16 位有符号整数）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
    /// 每次回调的样本数（每声道）
    pub buffer_samples: u16,
}

impl AudioSpec {
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * 2
    }
}

/// 设备拉数据回调：把请求的字节填满
pub type AudioCallback = Box<dyn FnMut(&mut [u8]) + Send + 'static>;

/// 设备错误回调（设备线程中调用）
pub type ErrorCallback = Box<dyn FnMut(String) + Send + 'static>;

/// 音频输出设备抽象
///
/// 设备在自己的线程上调用数据回调；打开后处于暂停状态，`set_paused(false)` 开始拉取。
pub trait AudioOutput: Send {
    /// 按期望规格打开设备，返回设备实际给出的规格
    fn open(&mut self, desired: &AudioSpec, data: AudioCallback, error: ErrorCallback) -> Result<AudioSpec>;

    fn set_paused(&mut self, paused: bool);

    /// 关闭设备；返回后不会再调用数据回调
    fn close(&mut self);

    fn name(&self) -> String;
}

/// 第一声道样本录制
#[derive(Debug, Default)]
struct Capture {
    limit: usize,
    samples: Vec<i16>,
}

/// 模拟设备的统计数据
#[derive(Debug, Default)]
pub struct SimulatedStats {
    callbacks: AtomicU64,
    bytes: AtomicU64,
    last_peak: AtomicU32,
    capture: Mutex<Capture>,
}

impl SimulatedStats {
    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Acquire)
    }

    /// 累计拉取的字节数
    pub fn bytes_pulled(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    /// 最近一次回调中样本绝对值的最大值
    pub fn last_peak(&self) -> u32 {
        self.last_peak.load(Ordering::Acquire)
    }

    /// 从下一次回调开始录制第一声道：跳过开头的静音，录满 `limit` 个样本为止
    pub fn capture_first_channel(&self, limit: usize) {
        let mut capture = self.capture.lock();
        capture.limit = limit;
        capture.samples.clear();
    }

    /// 已录制的样本
    pub fn captured(&self) -> Vec<i16> {
        self.capture.lock().samples.clone()
    }

    fn record(&self, buffer: &[u8], channels: usize) {
        let mut capture = self.capture.lock();
        if capture.samples.len() >= capture.limit {
            return;
        }
        for frame in buffer.chunks_exact(channels * 2) {
            let sample = i16::from_ne_bytes([frame[0], frame[1]]);
            if capture.samples.is_empty() && sample == 0 {
                continue;
            }
            capture.samples.push(sample);
            if capture.samples.len() >= capture.limit {
                break;
            }
        }
    }
}

/// 无声模拟设备：按实时速率在独立线程里调用回调
///
/// 用于测试和没有声卡的环境，也可以模拟设备给出不同规格、打开失败或运行中掉线。
pub struct SimulatedAudioOutput {
    granted: Option<AudioSpec>,
    fail_open: Option<String>,
    fail_after_callbacks: Option<u64>,
    paused: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    stats: Arc<SimulatedStats>,
    worker: Option<thread::JoinHandle<()>>,
}

impl SimulatedAudioOutput {
    pub fn new() -> Self {
        Self {
            granted: None,
            fail_open: None,
            fail_after_callbacks: None,
            paused: Arc::new(AtomicBool::new(true)),
            stop: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(SimulatedStats::default()),
            worker: None,
        }
    }

    /// 打开时给出指定规格，而不是照单全收
    pub fn granting(mut self, spec: AudioSpec) -> Self {
        self.granted = Some(spec);
        self
    }

    pub fn failing_open(mut self, reason: &str) -> Self {
        self.fail_open = Some(reason.to_string());
        self
    }

    /// 回调 `callbacks` 次后报告设备错误并停止拉取
    pub fn failing_after(mut self, callbacks: u64) -> Self {
        self.fail_after_callbacks = Some(callbacks);
        self
    }

    pub fn stats(&self) -> Arc<SimulatedStats> {
        self.stats.clone()
    }
}

impl Default for SimulatedAudioOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for SimulatedAudioOutput {
    fn open(&mut self, desired: &AudioSpec, mut data: AudioCallback, mut error: ErrorCallback) -> Result<AudioSpec> {
        if let Some(reason) = &self.fail_open {
            return Err(PlayerError::AudioError(format!("无法打开模拟音频设备: {}", reason)));
        }
        self.close();

        let spec = self.granted.unwrap_or(*desired);
        if spec.sample_rate == 0 || spec.channels == 0 || spec.buffer_samples == 0 {
            return Err(PlayerError::AudioError(format!("无效的音频规格: {:?}", spec)));
        }

        self.stop.store(false, Ordering::Release);
        self.paused.store(true, Ordering::Release);

        let paused = self.paused.clone();
        let stop = self.stop.clone();
        let stats = self.stats.clone();
        let fail_after = self.fail_after_callbacks;
        let channels = spec.channels as usize;
        let period = Duration::from_secs_f64(spec.buffer_samples as f64 / spec.sample_rate as f64);
        let mut buffer = vec![0u8; spec.buffer_samples as usize * spec.bytes_per_frame()];

        let handle = thread::Builder::new()
            .name("simulated-audio".to_string())
            .spawn(move || {
                debug!("{} 🔈 模拟音频设备线程启动，周期 {:?}", log_ctx(), period);
                let mut next = Instant::now();
                while !stop.load(Ordering::Acquire) {
                    if paused.load(Ordering::Acquire) {
                        thread::sleep(Duration::from_millis(2));
                        next = Instant::now();
                        continue;
                    }

                    data(&mut buffer);
                    let peak = buffer
                        .chunks_exact(2)
                        .map(|c| (i16::from_ne_bytes([c[0], c[1]]) as i32).unsigned_abs())
                        .max()
                        .unwrap_or(0);
                    stats.last_peak.store(peak, Ordering::Release);
                    stats.record(&buffer, channels);
                    stats.bytes.fetch_add(buffer.len() as u64, Ordering::AcqRel);
                    let calls = stats.callbacks.fetch_add(1, Ordering::AcqRel) + 1;

                    if fail_after.map_or(false, |limit| calls >= limit) {
                        error("模拟音频设备已断开".to_string());
                        break;
                    }

                    next += period;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
                debug!("{} 🔈 模拟音频设备线程退出", log_ctx());
            })?;

        self.worker = Some(handle);
        info!(
            "{} 🔈 模拟音频设备已打开: {} Hz, {} 声道, 缓冲 {} 样本",
            log_ctx(),
            spec.sample_rate,
            spec.channels,
            spec.buffer_samples
        );
        Ok(spec)
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
            info!("{} 🔈 模拟音频设备已关闭", log_ctx());
        }
    }

    fn name(&self) -> String {
        "Simulated".to_string()
    }
}

impl Drop for SimulatedAudioOutput {
    fn drop(&mut self) {
        self.close();
    }
}
