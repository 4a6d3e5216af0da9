// 音频：PCM 环形缓冲区、格式转换、输出设备、音频引擎

pub mod convert;
#[cfg(feature = "audio-cpal")]
pub mod cpal_output;
pub mod engine;
pub mod output;
pub mod ring_buffer;

#[cfg(feature = "audio-cpal")]
pub use cpal_output::CpalAudioOutput;
pub use engine::{AudioEngine, MAX_VOLUME};
pub use output::{AudioCallback, AudioOutput, AudioSpec, ErrorCallback, SimulatedAudioOutput, SimulatedStats};
pub use ring_buffer::PcmRingBuffer;
