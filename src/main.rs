use anyhow::{Context, Result};
use log::info;
use myy_player_core::app::AppContext;
use myy_player_core::audio::CpalAudioOutput;
use myy_player_core::player::{FfmpegBackend, MediaBackend, SyntheticBackend, SyntheticMedia};
use myy_player_core::renderer::FrameSink;
use myy_player_core::{PlaybackManager, PlayerConfig};
use std::path::PathBuf;
use std::sync::Arc;

const SYNTHETIC_PREFIX: &str = "synthetic://";

fn print_usage(prog_name: &str) {
    println!("Usage: {} <video_file> [config.json]", prog_name);
    println!("Example: {} sample.mp4", prog_name);
    println!("Commands (one per line): space/p, q, r, left, right, up, down, s, m");
}

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        print_usage(args.first().map(String::as_str).unwrap_or("myy_player"));
        std::process::exit(1);
    }
    let path = &args[1];
    let config_path = args.get(2).map(PathBuf::from);

    info!("🎬 MYY Player - 控制台版本启动");

    let config = PlayerConfig::load_or_default(config_path.as_deref()).context("加载配置失败")?;

    // 初始化 FFmpeg
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("FFmpeg 初始化失败: {}", e))?;
    info!("✅ FFmpeg 初始化成功");

    let backend: Arc<dyn MediaBackend> = match path.strip_prefix(SYNTHETIC_PREFIX) {
        Some(seconds) => {
            let seconds: f64 = seconds.parse().unwrap_or(10.0);
            Arc::new(SyntheticBackend::new(SyntheticMedia::new((seconds * 1_000_000.0) as i64)))
        }
        None => Arc::new(FfmpegBackend::new()),
    };

    let output = CpalAudioOutput::new().context("音频设备初始化失败")?;
    let renderer = Arc::new(FrameSink::new(config.renderer_queue_capacity));
    let player = Arc::new(PlaybackManager::new(config, backend, Box::new(output), renderer)?);

    let info = player
        .open(path)
        .with_context(|| format!("无法打开媒体文件: {}", path))?;
    info!(
        "📎 {}x{} @ {:.2} fps, {} Hz {} 声道, 时长 {:.1}s",
        info.width,
        info.height,
        info.fps,
        info.sample_rate,
        info.channels,
        info.duration_us as f64 / 1_000_000.0
    );

    let mut app = AppContext::new(player.clone());
    app.spawn_stdin_reader()?;
    player.play().context("启动播放失败")?;
    app.run()?;

    Ok(())
}
