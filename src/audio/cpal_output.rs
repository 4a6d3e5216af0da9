use crate::audio::output::{AudioCallback, AudioOutput, AudioSpec, ErrorCallback};
use crate::core::{log_ctx, PlayerError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use log::{debug, info, warn};

/// 系统默认声卡输出（cpal）
pub struct CpalAudioOutput {
    device: Option<Device>,
    stream: Option<Stream>,
}

// cpal::Stream 本身不是 Send，但它只在 AudioEngine 的 output 锁内被访问，
// 回调线程由 cpal 自己管理
unsafe impl Send for CpalAudioOutput {}

impl CpalAudioOutput {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;
        debug!("使用音频设备: {}", device.name().unwrap_or_default());
        Ok(Self {
            device: Some(device),
            stream: None,
        })
    }

    /// 检查配置是否兼容
    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;

        let channels_match = config.channels == supported.channels();

        rate_in_range && channels_match
    }

    /// 设备支持的样本格式，优先 i16
    fn pick_sample_format(device: &Device, config: &StreamConfig) -> Result<SampleFormat> {
        let supported = device
            .supported_output_configs()
            .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?;

        let formats: Vec<SampleFormat> = supported
            .filter(|range| Self::is_config_compatible(config, range))
            .map(|range| range.sample_format())
            .collect();

        if formats.contains(&SampleFormat::I16) {
            Ok(SampleFormat::I16)
        } else if formats.contains(&SampleFormat::F32) {
            Ok(SampleFormat::F32)
        } else {
            Err(PlayerError::AudioError(format!(
                "音频设备不支持 {} Hz, {} 声道（可用格式: {:?}）",
                config.sample_rate.0, config.channels, formats
            )))
        }
    }
}

impl AudioOutput for CpalAudioOutput {
    fn open(&mut self, desired: &AudioSpec, mut data: AudioCallback, mut error: ErrorCallback) -> Result<AudioSpec> {
        self.close();
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| PlayerError::AudioError("音频设备不可用".to_string()))?;

        let config = StreamConfig {
            channels: desired.channels,
            sample_rate: cpal::SampleRate(desired.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(desired.buffer_samples as u32),
        };
        let format = Self::pick_sample_format(device, &config)?;

        let on_error = move |err: cpal::StreamError| error(err.to_string());
        let stream = match format {
            SampleFormat::I16 => device.build_output_stream(
                &config,
                move |out: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    data(bytemuck::cast_slice_mut(out));
                },
                on_error,
                None,
            ),
            _ => {
                warn!("{} ⚠️  音频设备不支持 i16，回调内转换为 f32", log_ctx());
                let mut scratch: Vec<i16> = Vec::new();
                device.build_output_stream(
                    &config,
                    move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(out.len(), 0);
                        data(bytemuck::cast_slice_mut(scratch.as_mut_slice()));
                        for (dst, src) in out.iter_mut().zip(scratch.iter()) {
                            *dst = *src as f32 / 32768.0;
                        }
                    },
                    on_error,
                    None,
                )
            }
        }
        .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;

        // 和其他设备一样以暂停状态返回
        stream
            .pause()
            .map_err(|e| PlayerError::AudioError(format!("暂停音频流失败: {}", e)))?;
        self.stream = Some(stream);

        info!(
            "🔊 音频输出已打开: {} Hz, {} 声道, {:?}",
            desired.sample_rate, desired.channels, format
        );
        Ok(*desired)
    }

    fn set_paused(&mut self, paused: bool) {
        if let Some(stream) = &self.stream {
            let result = if paused { stream.pause() } else { stream.play() };
            if let Err(e) = result {
                warn!("{} ⚠️  切换音频流状态失败: {}", log_ctx(), e);
            }
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("{} 音频输出已停止", log_ctx());
        }
    }

    fn name(&self) -> String {
        self.device
            .as_ref()
            .and_then(|device| device.name().ok())
            .unwrap_or_else(|| "cpal".to_string())
    }
}

impl Drop for CpalAudioOutput {
    fn drop(&mut self) {
        self.close();
    }
}
