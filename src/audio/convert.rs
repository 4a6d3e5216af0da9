use crate::core::{AudioSamples, PlayerError, Result, SampleFormat};

/// 读出第 `index` 个样本（平面内序号），归一化到 [-1, 1]
fn sample_at(plane: &[u8], format: SampleFormat, index: usize) -> f32 {
    let size = format.bytes_per_sample();
    let bytes = &plane[index * size..(index + 1) * size];
    match format {
        SampleFormat::U8 => (bytes[0] as f32 - 128.0) / 128.0,
        SampleFormat::I16 => i16::from_ne_bytes([bytes[0], bytes[1]]) as f32 / 32768.0,
        SampleFormat::I32 => i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32 / 2_147_483_648.0,
        SampleFormat::F32 => f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        SampleFormat::F64 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            f64::from_ne_bytes(raw) as f32
        }
    }
}

fn to_i16(value: f32) -> i16 {
    if value.is_nan() {
        return 0;
    }
    (value.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// 平面/交织的任意采样格式 → 交织的 16 位本机字节序 PCM
///
/// 声道数不一致时按 `min(c, src_channels - 1)` 映射：单声道复制到所有输出声道，
/// 多余的源声道被丢弃。
pub fn to_interleaved_i16(samples: &AudioSamples, out_channels: u16) -> Result<Vec<u8>> {
    let src_channels = samples.channels as usize;
    let out_channels = out_channels as usize;
    if src_channels == 0 || out_channels == 0 {
        return Err(PlayerError::DecodeError("音频帧声道数为 0".into()));
    }

    let size = samples.format.bytes_per_sample();
    let nb = samples.nb_samples;
    let needed_planes = if samples.planar { src_channels } else { 1 };
    if samples.planes.len() < needed_planes {
        return Err(PlayerError::DecodeError(format!(
            "音频帧平面数不足: {} < {}",
            samples.planes.len(),
            needed_planes
        )));
    }
    let plane_len = if samples.planar { nb * size } else { nb * size * src_channels };
    if samples.planes[..needed_planes].iter().any(|plane| plane.len() < plane_len) {
        return Err(PlayerError::DecodeError("音频帧数据长度不足".into()));
    }

    let mut out: Vec<i16> = Vec::with_capacity(nb * out_channels);
    for n in 0..nb {
        for c in 0..out_channels {
            let src = c.min(src_channels - 1);
            let value = if samples.planar {
                sample_at(&samples.planes[src], samples.format, n)
            } else {
                sample_at(&samples.planes[0], samples.format, n * src_channels + src)
            };
            out.push(to_i16(value));
        }
    }
    Ok(bytemuck::cast_slice(&out).to_vec())
}

/// 对交织的 16 位 PCM 施加线性音量（scale/max_scale）
pub fn apply_volume(pcm: &mut [u8], scale: u32, max_scale: u32) {
    if scale >= max_scale {
        return;
    }
    for chunk in pcm.chunks_exact_mut(2) {
        let sample = i16::from_ne_bytes([chunk[0], chunk[1]]) as i32;
        let scaled = (sample * scale as i32 / max_scale as i32) as i16;
        chunk.copy_from_slice(&scaled.to_ne_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_i16(pcm: &[u8]) -> Vec<i16> {
        pcm.chunks_exact(2).map(|c| i16::from_ne_bytes([c[0], c[1]])).collect()
    }

    #[test]
    fn test_planar_f32_interleaves() {
        let left: Vec<u8> = [0.5f32, -0.5].iter().flat_map(|v| v.to_ne_bytes()).collect();
        let right: Vec<u8> = [1.0f32, 0.0].iter().flat_map(|v| v.to_ne_bytes()).collect();
        let samples = AudioSamples {
            sample_rate: 48_000,
            channels: 2,
            format: SampleFormat::F32,
            planar: true,
            nb_samples: 2,
            planes: vec![left, right],
        };

        let pcm = to_interleaved_i16(&samples, 2).unwrap();
        assert_eq!(decode_i16(&pcm), vec![16384, 32767, -16384, 0]);
    }

    #[test]
    fn test_mono_upmix_and_clipping() {
        let data: Vec<u8> = [2.0f64, -3.0].iter().flat_map(|v| v.to_ne_bytes()).collect();
        let samples = AudioSamples {
            sample_rate: 44_100,
            channels: 1,
            format: SampleFormat::F64,
            planar: false,
            nb_samples: 2,
            planes: vec![data],
        };

        let pcm = to_interleaved_i16(&samples, 2).unwrap();
        assert_eq!(decode_i16(&pcm), vec![32767, 32767, -32767, -32767]);
    }

    #[test]
    fn test_packed_u8_downmix_takes_first_channels() {
        let samples = AudioSamples {
            sample_rate: 8_000,
            channels: 3,
            format: SampleFormat::U8,
            planar: false,
            nb_samples: 1,
            planes: vec![vec![128, 192, 0]],
        };

        let pcm = to_interleaved_i16(&samples, 2).unwrap();
        assert_eq!(decode_i16(&pcm), vec![0, 16384]);
    }

    #[test]
    fn test_short_plane_is_rejected() {
        let samples = AudioSamples {
            sample_rate: 48_000,
            channels: 2,
            format: SampleFormat::I16,
            planar: true,
            nb_samples: 4,
            planes: vec![vec![0; 8], vec![0; 4]],
        };
        assert!(to_interleaved_i16(&samples, 2).is_err());
    }

    #[test]
    fn test_volume_scales_samples() {
        let mut pcm: Vec<u8> = [1000i16, -1000].iter().flat_map(|v| v.to_ne_bytes()).collect();
        apply_volume(&mut pcm, 64, 128);
        assert_eq!(decode_i16(&pcm), vec![500, -500]);

        apply_volume(&mut pcm, 128, 128);
        assert_eq!(decode_i16(&pcm), vec![500, -500]);

        apply_volume(&mut pcm, 0, 128);
        assert_eq!(decode_i16(&pcm), vec![0, 0]);
    }
}
