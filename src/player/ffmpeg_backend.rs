use crate::core::{
    log_ctx, AudioSamples, FramePayload, Packet, PixelFormat, PlayerError, RawFrame, Result, SampleFormat, StreamKind,
    StreamParams, TIME_BASE, VideoPicture,
};
use crate::player::source::{CodecProfile, Decoder, DecoderConfig, Demuxer, MediaBackend, OpenedStream};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, media, software, util, Rational};
use log::{debug, info, warn};

/// FFmpeg 后端：每次 open_stream 都独立打开一次容器
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Self {
        Self
    }
}

impl MediaBackend for FfmpegBackend {
    fn open_stream(&self, path: &str, kind: StreamKind, profile: &dyn CodecProfile) -> Result<OpenedStream> {
        let demuxer = FfmpegDemuxer::open(path, kind)?;
        let config = profile.configure(demuxer.stream_params())?;

        let decoder: Box<dyn Decoder> = match kind {
            StreamKind::Video => Box::new(FfmpegVideoDecoder::new(&demuxer, config)?),
            StreamKind::Audio => Box::new(FfmpegAudioDecoder::new(&demuxer, config)?),
        };

        Ok(OpenedStream {
            demuxer: Box::new(demuxer),
            decoder,
        })
    }
}

/// 时间戳换算到微秒
fn to_micros(ts: i64, time_base: Rational) -> i64 {
    let num = time_base.numerator() as i128;
    let den = time_base.denominator().max(1) as i128;
    (ts as i128 * num * TIME_BASE as i128 / den) as i64
}

fn is_eagain(err: &ffmpeg::Error) -> bool {
    matches!(err, ffmpeg::Error::Other { errno } if *errno == util::error::EAGAIN)
}

/// 单流解封装器
pub struct FfmpegDemuxer {
    input_ctx: format::context::Input,
    stream_index: usize,
    time_base: Rational,
    params: StreamParams,
    source_path: String,
    eof: bool,
}

impl FfmpegDemuxer {
    /// 打开文件并绑定最合适的一条 `kind` 流
    pub fn open(path: &str, kind: StreamKind) -> Result<Self> {
        info!("{} 正在打开文件: {} ({}流)", log_ctx(), path, kind.as_str());

        let input_ctx =
            format::input(&path).map_err(|e| PlayerError::OpenError(format!("无法打开文件: {}", e)))?;

        let medium = match kind {
            StreamKind::Video => media::Type::Video,
            StreamKind::Audio => media::Type::Audio,
        };
        let stream = input_ctx.streams().best(medium).ok_or(match kind {
            StreamKind::Video => PlayerError::NoVideoStream,
            StreamKind::Audio => PlayerError::NoAudioStream,
        })?;

        let stream_index = stream.index();
        let time_base = stream.time_base();
        let duration_us = if stream.duration() > 0 {
            to_micros(stream.duration(), time_base)
        } else {
            input_ctx.duration().max(0)
        };

        let parameters = stream.parameters();
        let codec_name = parameters.id().name().to_string();
        let context = codec::context::Context::from_parameters(parameters)?;

        let params = match kind {
            StreamKind::Video => {
                let decoder = context.decoder().video()?;
                let fps = stream.avg_frame_rate();
                let fps = if fps.denominator() != 0 {
                    fps.numerator() as f64 / fps.denominator() as f64
                } else {
                    0.0
                };
                StreamParams::video(&codec_name, decoder.width(), decoder.height(), fps, duration_us)
            }
            StreamKind::Audio => {
                let decoder = context.decoder().audio()?;
                let (format, planar) = map_sample_format(decoder.format())?;
                StreamParams::audio(&codec_name, decoder.rate(), decoder.channels(), format, planar, duration_us)
            }
        };

        debug!("{}流索引: {}, 参数: {:?}", kind.as_str(), stream_index, params);

        Ok(Self {
            input_ctx,
            stream_index,
            time_base,
            params,
            source_path: path.to_string(),
            eof: false,
        })
    }

    fn stream(&self) -> Result<format::stream::Stream<'_>> {
        self.input_ctx
            .stream(self.stream_index)
            .ok_or_else(|| PlayerError::SourceUnavailable(format!("流 {} 已不存在", self.stream_index)))
    }
}

impl Demuxer for FfmpegDemuxer {
    fn stream_params(&self) -> &StreamParams {
        &self.params
    }

    fn read_next_unit(&mut self) -> Result<Option<Packet>> {
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input_ctx) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => {
                    self.eof = true;
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }

            // 跳过其他流
            if packet.stream() != self.stream_index {
                continue;
            }

            let time_base = self.time_base;
            return Ok(Some(Packet {
                stream_index: self.stream_index,
                pts: packet.pts().map(|ts| to_micros(ts, time_base)),
                dts: packet.dts().map(|ts| to_micros(ts, time_base)),
                duration: to_micros(packet.duration(), time_base),
                keyframe: packet.is_key(),
                data: packet.data().map(|data| data.to_vec()).unwrap_or_default(),
            }));
        }
    }

    fn seek(&mut self, target_us: i64) -> Result<()> {
        // 不指定流索引时时间单位就是 AV_TIME_BASE（微秒）
        self.input_ctx
            .seek(target_us, ..target_us)
            .map_err(|e| PlayerError::SeekError(format!("{}", e)))?;
        self.eof = false;
        Ok(())
    }

    fn is_eof(&self) -> bool {
        self.eof
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {} (stream #{})", self.source_path, self.stream_index)
    }
}

fn map_sample_format(format: format::Sample) -> Result<(SampleFormat, bool)> {
    use format::sample::Type;

    let (format, kind) = match format {
        format::Sample::U8(kind) => (SampleFormat::U8, kind),
        format::Sample::I16(kind) => (SampleFormat::I16, kind),
        format::Sample::I32(kind) => (SampleFormat::I32, kind),
        format::Sample::F32(kind) => (SampleFormat::F32, kind),
        format::Sample::F64(kind) => (SampleFormat::F64, kind),
        other => {
            return Err(PlayerError::OpenError(format!("不支持的采样格式: {:?}", other)));
        }
    };
    Ok((format, kind == Type::Planar))
}

/// 包转换为 FFmpeg 包，时间戳保持微秒，解码器原样带到帧上
fn to_ffmpeg_packet(packet: &Packet) -> Result<ffmpeg::Packet> {
    // 空包在 FFmpeg 里表示冲刷，坏包不能这样送进去
    if packet.data.is_empty() {
        return Err(PlayerError::DecodeError("空数据包".to_string()));
    }
    let mut out = ffmpeg::Packet::copy(&packet.data);
    out.set_pts(packet.pts);
    out.set_dts(packet.dts);
    out.set_duration(packet.duration);
    Ok(out)
}

/// 按解码配置创建解码上下文，设置帧级多线程（0 = 由 FFmpeg 决定线程数）
fn decoder_context(demuxer: &FfmpegDemuxer, config: &DecoderConfig) -> Result<codec::context::Context> {
    let mut context = codec::context::Context::from_parameters(demuxer.stream()?.parameters())?;
    let mut threading = codec::threading::Config::count(config.thread_count);
    threading.kind = codec::threading::Type::Frame;
    context.set_threading(threading);
    Ok(context)
}

/// 输出像素格式到 FFmpeg 像素格式
fn to_ffmpeg_pixel(format: PixelFormat) -> Result<format::Pixel> {
    match format {
        PixelFormat::YUV420P => Ok(format::Pixel::YUV420P),
        PixelFormat::NV12 => Ok(format::Pixel::NV12),
        PixelFormat::RGBA => Ok(format::Pixel::RGBA),
        PixelFormat::RGB => Ok(format::Pixel::RGB24),
        PixelFormat::Unknown => Err(PlayerError::OpenError("未指定视频输出像素格式".to_string())),
    }
}

/// 每个平面的行数
fn plane_rows(format: PixelFormat, height: u32) -> Vec<usize> {
    let full = height as usize;
    let half = ((height + 1) / 2) as usize;
    match format {
        PixelFormat::YUV420P => vec![full, half, half],
        PixelFormat::NV12 => vec![full, half],
        PixelFormat::RGBA | PixelFormat::RGB | PixelFormat::Unknown => vec![full],
    }
}

fn send_to(decoder: &mut codec::decoder::Opened, packet: Option<&Packet>) -> Result<()> {
    let result = match packet {
        Some(packet) => decoder.send_packet(&to_ffmpeg_packet(packet)?),
        None => decoder.send_eof(),
    };
    match result {
        Ok(()) | Err(ffmpeg::Error::Eof) => Ok(()),
        Err(e) if is_eagain(&e) => {
            warn!("{} 解码器输入已满，丢弃本次包", log_ctx());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// 视频解码器：按配置的像素格式输出（必要时经 swscale 转换）
pub struct FfmpegVideoDecoder {
    decoder: codec::decoder::Video,
    scaler: Option<software::scaling::Context>,
    output_format: PixelFormat,
    target: format::Pixel,
    config: DecoderConfig,
}

// SwsContext 本身不是 Send，但每个解码器实例只在所属 FrameSource 的 io 锁内使用
unsafe impl Send for FfmpegVideoDecoder {}

impl FfmpegVideoDecoder {
    fn new(demuxer: &FfmpegDemuxer, config: DecoderConfig) -> Result<Self> {
        let output_format = config.output_pixel_format.unwrap_or(PixelFormat::YUV420P);
        let target = to_ffmpeg_pixel(output_format)?;
        let decoder = decoder_context(demuxer, &config)?.decoder().video()?;
        debug!(
            "软件视频解码器: {}x{}, 格式: {:?} → {:?}, 线程 {}",
            decoder.width(),
            decoder.height(),
            decoder.format(),
            target,
            config.thread_count
        );
        Ok(Self {
            decoder,
            scaler: None,
            output_format,
            target,
            config,
        })
    }

    fn convert_frame(&mut self, frame: util::frame::Video) -> Result<RawFrame> {
        let width = frame.width();
        let height = frame.height();

        let picture_frame = if frame.format() == self.target {
            frame
        } else {
            if self.scaler.is_none() {
                debug!("视频帧格式 {:?}，转换为 {:?}", frame.format(), self.target);
                self.scaler = Some(software::scaling::Context::get(
                    frame.format(),
                    width,
                    height,
                    self.target,
                    width,
                    height,
                    software::scaling::Flags::BILINEAR,
                )?);
            }
            let mut converted = util::frame::Video::empty();
            if let Some(scaler) = self.scaler.as_mut() {
                scaler.run(&frame, &mut converted)?;
            }
            converted.set_pts(frame.timestamp());
            converted
        };

        let rows_per_plane = plane_rows(self.output_format, height);
        let mut planes = Vec::with_capacity(rows_per_plane.len());
        let mut strides = Vec::with_capacity(rows_per_plane.len());
        for (plane, rows) in rows_per_plane.into_iter().enumerate() {
            let stride = picture_frame.stride(plane);
            let data = picture_frame.data(plane);
            let len = (stride * rows).min(data.len());
            planes.push(data[..len].to_vec());
            strides.push(stride);
        }

        Ok(RawFrame {
            pts: picture_frame.timestamp().or_else(|| picture_frame.pts()),
            duration: None,
            payload: FramePayload::Video(VideoPicture {
                width,
                height,
                format: self.output_format,
                planes,
                strides,
            }),
        })
    }
}

impl Decoder for FfmpegVideoDecoder {
    fn send(&mut self, packet: Option<&Packet>) -> Result<()> {
        send_to(&mut self.decoder, packet)
    }

    fn receive(&mut self) -> Result<Option<RawFrame>> {
        let mut decoded = util::frame::Video::empty();
        match self.decoder.receive_frame(&mut decoded) {
            Ok(()) => self.convert_frame(decoded).map(Some),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) if is_eagain(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }

    fn config(&self) -> &DecoderConfig {
        &self.config
    }
}

/// 音频解码器：按解码器原始格式输出，重采样交给音频引擎
pub struct FfmpegAudioDecoder {
    decoder: codec::decoder::Audio,
    config: DecoderConfig,
}

impl FfmpegAudioDecoder {
    fn new(demuxer: &FfmpegDemuxer, config: DecoderConfig) -> Result<Self> {
        let decoder = decoder_context(demuxer, &config)?.decoder().audio()?;
        debug!(
            "音频解码器: {} Hz, {} 声道, 格式: {:?}, 线程 {}",
            decoder.rate(),
            decoder.channels(),
            decoder.format(),
            config.thread_count
        );
        Ok(Self { decoder, config })
    }

    fn convert_frame(&self, frame: util::frame::Audio) -> Result<RawFrame> {
        let (format, planar) = map_sample_format(frame.format())?;
        let channels = frame.channels();
        let nb_samples = frame.samples();
        let bytes = format.bytes_per_sample();

        let planes = if planar {
            (0..channels as usize)
                .map(|ch| {
                    let data = frame.data(ch);
                    data[..(nb_samples * bytes).min(data.len())].to_vec()
                })
                .collect()
        } else {
            let data = frame.data(0);
            vec![data[..(nb_samples * bytes * channels as usize).min(data.len())].to_vec()]
        };

        let sample_rate = frame.rate();
        let duration = (sample_rate > 0).then(|| nb_samples as i64 * TIME_BASE / sample_rate as i64);

        Ok(RawFrame {
            pts: frame.timestamp().or_else(|| frame.pts()),
            duration,
            payload: FramePayload::Audio(AudioSamples {
                sample_rate,
                channels,
                format,
                planar,
                nb_samples,
                planes,
            }),
        })
    }
}

impl Decoder for FfmpegAudioDecoder {
    fn send(&mut self, packet: Option<&Packet>) -> Result<()> {
        send_to(&mut self.decoder, packet)
    }

    fn receive(&mut self) -> Result<Option<RawFrame>> {
        let mut decoded = util::frame::Audio::empty();
        match self.decoder.receive_frame(&mut decoded) {
            Ok(()) => self.convert_frame(decoded).map(Some),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) if is_eagain(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }

    fn config(&self) -> &DecoderConfig {
        &self.config
    }
}
