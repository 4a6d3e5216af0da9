use crate::core::{
    AudioSamples, FramePayload, Packet, PixelFormat, PlayerError, RawFrame, Result, SampleFormat, StreamKind,
    StreamParams, VideoPicture, TIME_BASE,
};
use crate::player::source::{CodecProfile, Decoder, DecoderConfig, Demuxer, MediaBackend, OpenedStream};
use log::info;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 合成测试媒体描述：彩条视频 + 正弦波音频
///
/// 不依赖任何编解码库，供无 FFmpeg 环境下的测试和演示使用。
#[derive(Debug, Clone)]
pub struct SyntheticMedia {
    pub duration_us: i64,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    /// 关键帧间隔（帧）
    pub gop: u64,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
    pub planar: bool,
    pub samples_per_frame: usize,
    pub tone_hz: f64,
    pub has_video: bool,
    pub has_audio: bool,
    /// false 时数据包不带时间戳
    pub timestamps: bool,
    /// 每 N 个包损坏一个
    pub corrupt_every: Option<u64>,
    /// 置位期间所有解封装 seek 都失败；克隆出的流共享同一个开关
    pub seek_fault: Arc<AtomicBool>,
}

impl SyntheticMedia {
    pub fn new(duration_us: i64) -> Self {
        Self {
            duration_us,
            width: 64,
            height: 36,
            frame_rate: 25.0,
            gop: 12,
            sample_rate: 48_000,
            channels: 2,
            sample_format: SampleFormat::F32,
            planar: true,
            samples_per_frame: 1024,
            tone_hz: 440.0,
            has_video: true,
            has_audio: true,
            timestamps: true,
            corrupt_every: None,
            seek_fault: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 视频分辨率
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// seek 故障开关，`store(true)` 后解封装 seek 返回错误
    pub fn seek_fault(&self) -> Arc<AtomicBool> {
        self.seek_fault.clone()
    }

    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    pub fn with_corruption_every(mut self, packets: u64) -> Self {
        self.corrupt_every = Some(packets.max(1));
        self
    }

    pub fn with_audio_format(mut self, sample_rate: u32, channels: u16, format: SampleFormat, planar: bool) -> Self {
        self.sample_rate = sample_rate;
        self.channels = channels;
        self.sample_format = format;
        self.planar = planar;
        self
    }

    pub fn video_only(mut self) -> Self {
        self.has_audio = false;
        self
    }

    pub fn audio_only(mut self) -> Self {
        self.has_video = false;
        self
    }

    fn params(&self, kind: StreamKind) -> StreamParams {
        match kind {
            StreamKind::Video => {
                StreamParams::video("synthetic-bars", self.width, self.height, self.frame_rate, self.duration_us)
            }
            StreamKind::Audio => StreamParams::audio(
                "synthetic-tone",
                self.sample_rate,
                self.channels,
                self.sample_format,
                self.planar,
                self.duration_us,
            ),
        }
    }

    fn packet_count(&self, kind: StreamKind) -> u64 {
        match kind {
            StreamKind::Video => (self.duration_us as f64 * self.frame_rate / TIME_BASE as f64) as u64,
            StreamKind::Audio => {
                let total = self.duration_us as i128 * self.sample_rate as i128 / TIME_BASE as i128;
                (total / self.samples_per_frame as i128) as u64
            }
        }
    }

    fn packet_pts(&self, kind: StreamKind, index: u64) -> i64 {
        match kind {
            StreamKind::Video => (index as f64 * TIME_BASE as f64 / self.frame_rate).round() as i64,
            StreamKind::Audio => {
                (index as i128 * self.samples_per_frame as i128 * TIME_BASE as i128 / self.sample_rate as i128) as i64
            }
        }
    }

    fn packet_duration(&self, kind: StreamKind) -> i64 {
        match kind {
            StreamKind::Video => (TIME_BASE as f64 / self.frame_rate).round() as i64,
            StreamKind::Audio => self.samples_per_frame as i64 * TIME_BASE / self.sample_rate as i64,
        }
    }

    /// 不晚于 `target_us` 的最近关键帧序号
    fn keyframe_index_before(&self, kind: StreamKind, target_us: i64) -> u64 {
        let index = match kind {
            StreamKind::Video => (target_us as f64 * self.frame_rate / TIME_BASE as f64).floor() as u64,
            StreamKind::Audio => {
                let sample = target_us as i128 * self.sample_rate as i128 / TIME_BASE as i128;
                (sample / self.samples_per_frame as i128) as u64
            }
        };
        let index = index.min(self.packet_count(kind));
        match kind {
            StreamKind::Video => index - index % self.gop.max(1),
            StreamKind::Audio => index,
        }
    }
}

/// 合成媒体后端
#[derive(Debug, Clone)]
pub struct SyntheticBackend {
    media: SyntheticMedia,
}

impl SyntheticBackend {
    pub fn new(media: SyntheticMedia) -> Self {
        Self { media }
    }

    pub fn media(&self) -> &SyntheticMedia {
        &self.media
    }
}

impl MediaBackend for SyntheticBackend {
    fn open_stream(&self, path: &str, kind: StreamKind, profile: &dyn CodecProfile) -> Result<OpenedStream> {
        let present = match kind {
            StreamKind::Video => self.media.has_video,
            StreamKind::Audio => self.media.has_audio,
        };
        if !present {
            return Err(match kind {
                StreamKind::Video => PlayerError::NoVideoStream,
                StreamKind::Audio => PlayerError::NoAudioStream,
            });
        }

        let params = self.media.params(kind);
        let config = profile.configure(&params)?;
        if let Some(format) = config.output_pixel_format {
            if format != PixelFormat::YUV420P {
                return Err(PlayerError::OpenError(format!("合成视频只能输出 YUV420P，请求的是 {:?}", format)));
            }
        }
        info!(
            "🧪 合成{}流: {} ({} 个包)",
            kind.as_str(),
            path,
            self.media.packet_count(kind)
        );

        Ok(OpenedStream {
            demuxer: Box::new(SyntheticDemuxer {
                media: self.media.clone(),
                kind,
                params,
                path: path.to_string(),
                next_index: 0,
            }),
            decoder: Box::new(SyntheticDecoder {
                media: self.media.clone(),
                kind,
                config,
                pending: VecDeque::new(),
                ready: VecDeque::new(),
            }),
        })
    }
}

struct SyntheticDemuxer {
    media: SyntheticMedia,
    kind: StreamKind,
    params: StreamParams,
    path: String,
    next_index: u64,
}

impl Demuxer for SyntheticDemuxer {
    fn stream_params(&self) -> &StreamParams {
        &self.params
    }

    fn read_next_unit(&mut self) -> Result<Option<Packet>> {
        if self.is_eof() {
            return Ok(None);
        }
        let index = self.next_index;
        self.next_index += 1;

        let corrupt = self
            .media
            .corrupt_every
            .map_or(false, |every| index % every == every - 1);
        let pts = self.media.packet_pts(self.kind, index);

        Ok(Some(Packet {
            stream_index: 0,
            pts: self.media.timestamps.then_some(pts),
            dts: self.media.timestamps.then_some(pts),
            duration: if self.media.timestamps {
                self.media.packet_duration(self.kind)
            } else {
                0
            },
            keyframe: match self.kind {
                StreamKind::Video => index % self.media.gop.max(1) == 0,
                StreamKind::Audio => true,
            },
            data: if corrupt { Vec::new() } else { index.to_le_bytes().to_vec() },
        }))
    }

    fn seek(&mut self, target_us: i64) -> Result<()> {
        if target_us < 0 {
            return Err(PlayerError::SeekError(format!("无效的 seek 目标: {}us", target_us)));
        }
        if self.media.seek_fault.load(Ordering::Acquire) {
            return Err(PlayerError::SeekError(format!("合成解封装 seek 失败: {}us", target_us)));
        }
        self.next_index = self.media.keyframe_index_before(self.kind, target_us);
        Ok(())
    }

    fn is_eof(&self) -> bool {
        self.next_index >= self.media.packet_count(self.kind)
    }

    fn description(&self) -> String {
        format!("Synthetic Demuxer: {} ({})", self.path, self.kind.as_str())
    }
}

/// 合成解码器，带一个包的延迟以模拟真实解码器的缓存帧
struct SyntheticDecoder {
    media: SyntheticMedia,
    kind: StreamKind,
    config: DecoderConfig,
    pending: VecDeque<Packet>,
    ready: VecDeque<RawFrame>,
}

impl SyntheticDecoder {
    fn decode_packet(&self, packet: &Packet) -> Result<RawFrame> {
        let bytes: [u8; 8] = packet
            .data
            .as_slice()
            .try_into()
            .map_err(|_| PlayerError::DecodeError(format!("损坏的数据包（{} 字节）", packet.data.len())))?;
        let index = u64::from_le_bytes(bytes);

        let payload = match self.kind {
            StreamKind::Video => FramePayload::Video(self.render_picture(index)),
            StreamKind::Audio => FramePayload::Audio(self.render_tone(index)),
        };

        Ok(RawFrame {
            pts: packet.pts,
            duration: (packet.duration > 0).then_some(packet.duration),
            payload,
        })
    }

    fn render_picture(&self, index: u64) -> VideoPicture {
        let (w, h) = (self.media.width as usize, self.media.height as usize);
        let (cw, ch) = ((w + 1) / 2, (h + 1) / 2);
        let luma = ((index * 8) % 220 + 16) as u8;
        VideoPicture {
            width: self.media.width,
            height: self.media.height,
            format: PixelFormat::YUV420P,
            planes: vec![vec![luma; w * h], vec![128; cw * ch], vec![128; cw * ch]],
            strides: vec![w, cw, cw],
        }
    }

    fn render_tone(&self, index: u64) -> AudioSamples {
        let media = &self.media;
        let channels = media.channels.max(1) as usize;
        let nb_samples = media.samples_per_frame;
        let first = index as usize * nb_samples;
        let format = media.sample_format;
        let bps = format.bytes_per_sample();

        let mut planes = if media.planar {
            vec![Vec::with_capacity(nb_samples * bps); channels]
        } else {
            vec![Vec::with_capacity(nb_samples * bps * channels)]
        };

        for n in 0..nb_samples {
            let t = (first + n) as f64 / media.sample_rate as f64;
            let value = 0.25 * (2.0 * std::f64::consts::PI * media.tone_hz * t).sin();
            for c in 0..channels {
                let plane = if media.planar { &mut planes[c] } else { &mut planes[0] };
                encode_sample(value, format, plane);
            }
        }

        AudioSamples {
            sample_rate: media.sample_rate,
            channels: media.channels,
            format,
            planar: media.planar,
            nb_samples,
            planes,
        }
    }
}

fn encode_sample(value: f64, format: SampleFormat, out: &mut Vec<u8>) {
    match format {
        SampleFormat::U8 => out.push(((value * 127.0) + 128.0) as u8),
        SampleFormat::I16 => out.extend_from_slice(&((value * i16::MAX as f64) as i16).to_ne_bytes()),
        SampleFormat::I32 => out.extend_from_slice(&((value * i32::MAX as f64) as i32).to_ne_bytes()),
        SampleFormat::F32 => out.extend_from_slice(&(value as f32).to_ne_bytes()),
        SampleFormat::F64 => out.extend_from_slice(&value.to_ne_bytes()),
    }
}

impl Decoder for SyntheticDecoder {
    fn send(&mut self, packet: Option<&Packet>) -> Result<()> {
        match packet {
            Some(packet) => {
                if packet.data.len() != 8 {
                    return Err(PlayerError::DecodeError(format!(
                        "损坏的数据包（{} 字节）",
                        packet.data.len()
                    )));
                }
                self.pending.push_back(packet.clone());
                // 攒够两个包才输出一帧
                if self.pending.len() > 1 {
                    if let Some(oldest) = self.pending.pop_front() {
                        let frame = self.decode_packet(&oldest)?;
                        self.ready.push_back(frame);
                    }
                }
            }
            None => {
                while let Some(packet) = self.pending.pop_front() {
                    let frame = self.decode_packet(&packet)?;
                    self.ready.push_back(frame);
                }
            }
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<RawFrame>> {
        Ok(self.ready.pop_front())
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.ready.clear();
    }

    fn config(&self) -> &DecoderConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::source::codec_profile_for;

    fn open(media: SyntheticMedia, kind: StreamKind) -> OpenedStream {
        let profile = codec_profile_for(kind);
        SyntheticBackend::new(media)
            .open_stream("synthetic://test", kind, profile.as_ref())
            .unwrap()
    }

    #[test]
    fn test_packet_counts() {
        let media = SyntheticMedia::new(1_000_000);
        assert_eq!(media.packet_count(StreamKind::Video), 25);
        assert_eq!(media.packet_count(StreamKind::Audio), 46);
    }

    #[test]
    fn test_decoder_holds_one_packet_until_drain() {
        let mut stream = open(SyntheticMedia::new(1_000_000), StreamKind::Video);
        let first = stream.demuxer.read_next_unit().unwrap().unwrap();
        stream.decoder.send(Some(&first)).unwrap();
        assert!(stream.decoder.receive().unwrap().is_none());

        stream.decoder.send(None).unwrap();
        let frame = stream.decoder.receive().unwrap().unwrap();
        assert_eq!(frame.pts, Some(0));
    }

    #[test]
    fn test_video_seek_lands_on_keyframe() {
        let mut stream = open(SyntheticMedia::new(10_000_000), StreamKind::Video);
        // 2.1 秒 = 第 52 帧，前一个关键帧是第 48 帧
        stream.demuxer.seek(2_100_000).unwrap();
        let packet = stream.demuxer.read_next_unit().unwrap().unwrap();
        assert!(packet.keyframe);
        assert_eq!(packet.pts, Some(1_920_000));
    }

    #[test]
    fn test_seek_fault_is_shared_and_clearable() {
        let media = SyntheticMedia::new(10_000_000);
        let fault = media.seek_fault();
        let mut stream = open(media, StreamKind::Audio);

        fault.store(true, Ordering::Release);
        assert!(matches!(stream.demuxer.seek(1_000_000), Err(PlayerError::SeekError(_))));
        fault.store(false, Ordering::Release);
        assert!(stream.demuxer.seek(1_000_000).is_ok());
    }

    #[test]
    fn test_decoder_config_comes_from_profile() {
        let stream = open(SyntheticMedia::new(1_000_000), StreamKind::Video);
        assert_eq!(stream.decoder.config().output_pixel_format, Some(PixelFormat::YUV420P));
        assert_eq!(stream.decoder.config().frame_interval_us, 40_000);
    }

    #[test]
    fn test_missing_stream() {
        let profile = codec_profile_for(StreamKind::Audio);
        let result = SyntheticBackend::new(SyntheticMedia::new(1_000_000).video_only()).open_stream(
            "synthetic://test",
            StreamKind::Audio,
            profile.as_ref(),
        );
        assert!(matches!(result, Err(PlayerError::NoAudioStream)));
    }

    #[test]
    fn test_tone_layout() {
        let mut stream = open(
            SyntheticMedia::new(1_000_000).with_audio_format(44_100, 2, SampleFormat::I16, false),
            StreamKind::Audio,
        );
        let packet = stream.demuxer.read_next_unit().unwrap().unwrap();
        stream.decoder.send(Some(&packet)).unwrap();
        stream.decoder.send(None).unwrap();
        let frame = stream.decoder.receive().unwrap().unwrap();
        match frame.payload {
            FramePayload::Audio(samples) => {
                assert_eq!(samples.planes.len(), 1);
                assert_eq!(samples.planes[0].len(), 1024 * 2 * 2);
            }
            FramePayload::Video(_) => panic!("expected audio"),
        }
    }
}
