// 控制台播放器：按键映射、进度显示、事件循环

use crate::core::{log_ctx, PlaybackState, Result, TIME_BASE};
use crate::player::PlaybackManager;
use crate::renderer::{InputEvent, Key};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 音量步进
pub const VOLUME_STEP: f64 = 0.0625;
/// 左右方向键跳转秒数
pub const SEEK_STEP_SECONDS: f64 = 5.0;
/// 暂停时单步前进秒数
pub const FRAME_STEP_SECONDS: f64 = 0.04;

/// 事件循环处理的消息
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    Input(InputEvent),
    Progress { pts_us: i64, duration_us: i64 },
    StateChanged(PlaybackState),
    Quit,
}

/// 事件循环的上下文：播放器句柄 + 事件通道
///
/// 播放器回调只往通道里投递事件，所有控制操作都在事件循环线程里执行。
pub struct AppContext {
    player: Arc<PlaybackManager>,
    events_tx: Sender<AppEvent>,
    events_rx: Receiver<AppEvent>,
    last_progress_second: Option<i64>,
}

impl AppContext {
    pub fn new(player: Arc<PlaybackManager>) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();

        let tx = events_tx.clone();
        player.on_timestamp(Arc::new(move |pts_us: i64, duration_us: i64| {
            let _ = tx.send(AppEvent::Progress { pts_us, duration_us });
        }));
        let tx = events_tx.clone();
        player.on_state_change(Arc::new(move |state: PlaybackState| {
            let _ = tx.send(AppEvent::StateChanged(state));
        }));
        let tx = events_tx.clone();
        player.on_input(Arc::new(move |event: InputEvent| {
            let _ = tx.send(AppEvent::Input(event));
        }));

        Self {
            player,
            events_tx,
            events_rx,
            last_progress_second: None,
        }
    }

    pub fn player(&self) -> &Arc<PlaybackManager> {
        &self.player
    }

    pub fn sender(&self) -> Sender<AppEvent> {
        self.events_tx.clone()
    }

    /// 后台线程读取标准输入，一行一个命令
    pub fn spawn_stdin_reader(&self) -> Result<()> {
        let tx = self.events_tx.clone();
        thread::Builder::new().name("stdin-keys".to_string()).spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                match parse_command(&line) {
                    Some(key) => {
                        if tx.send(AppEvent::Input(InputEvent::KeyPressed(key))).is_err() {
                            break;
                        }
                    }
                    None => warn!("未知命令: {:?}", line.trim()),
                }
            }
            debug!("标准输入已关闭");
        })?;
        Ok(())
    }

    /// 事件循环，直到播放完成、用户退出或播放器出错
    pub fn run(&mut self) -> Result<()> {
        info!("{} 🎮 控制台事件循环启动", log_ctx());
        loop {
            if self.player.is_finished() {
                println!();
                info!("{} 🏁 播放完成", log_ctx());
                break;
            }

            match self.events_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(event) => {
                    if !self.handle_event(event) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.player.stop();
        self.player.close();
        info!("{} 👋 控制台事件循环退出", log_ctx());
        Ok(())
    }

    /// 处理单个事件，返回 false 表示退出循环
    pub fn handle_event(&mut self, event: AppEvent) -> bool {
        match event {
            AppEvent::Input(InputEvent::KeyPressed(key)) => handle_key(&self.player, key),
            AppEvent::Input(InputEvent::CloseRequested) | AppEvent::Quit => false,
            AppEvent::Input(InputEvent::Resized { width, height }) => {
                debug!("窗口尺寸: {}x{}", width, height);
                true
            }
            AppEvent::Progress { pts_us, duration_us } => {
                let second = pts_us / TIME_BASE;
                if self.last_progress_second != Some(second) {
                    self.last_progress_second = Some(second);
                    print!("\r{}", format_progress(pts_us, duration_us));
                    let _ = std::io::stdout().flush();
                }
                true
            }
            AppEvent::StateChanged(PlaybackState::Error) => {
                error!("{} ❌ 播放器进入错误状态，退出", log_ctx());
                false
            }
            AppEvent::StateChanged(state) => {
                debug!("播放状态: {:?}", state);
                true
            }
        }
    }
}

/// 控制台命令到按键
pub fn parse_command(line: &str) -> Option<Key> {
    let key = match line.trim().to_ascii_lowercase().as_str() {
        "" | "space" => Key::Space,
        "p" => Key::P,
        "q" | "quit" => Key::Q,
        "esc" | "escape" => Key::Escape,
        "r" => Key::R,
        "left" | "<" => Key::Left,
        "right" | ">" => Key::Right,
        "up" | "+" => Key::Up,
        "down" | "-" => Key::Down,
        "s" => Key::S,
        "m" => Key::M,
        _ => return None,
    };
    Some(key)
}

/// 执行按键对应的操作，返回 false 表示退出
pub fn handle_key(player: &PlaybackManager, key: Key) -> bool {
    let state = player.state();
    if state == PlaybackState::Error {
        return true;
    }

    let result = match key {
        Key::Space | Key::P => match state {
            PlaybackState::Playing => player.pause(),
            PlaybackState::Paused => player.resume(),
            _ => Ok(()),
        },
        Key::Q | Key::Escape => return false,
        Key::R => player.seek(0.0).and_then(|_| player.play()),
        Key::Left => player
            .seek(player.position() - SEEK_STEP_SECONDS)
            .and_then(|_| player.play()),
        Key::Right => player
            .seek(player.position() + SEEK_STEP_SECONDS)
            .and_then(|_| player.play()),
        Key::Up => {
            player.set_volume((player.volume() + VOLUME_STEP).min(1.0));
            Ok(())
        }
        Key::Down => {
            player.set_volume((player.volume() - VOLUME_STEP).max(0.0));
            Ok(())
        }
        Key::S => {
            if state == PlaybackState::Paused {
                player.seek(player.position() + FRAME_STEP_SECONDS)
            } else {
                Ok(())
            }
        }
        Key::M => {
            player.set_volume(if player.volume() > 0.0 { 0.0 } else { 1.0 });
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!("{} ⚠️  按键 {:?} 执行失败: {}", log_ctx(), key, e);
    }
    true
}

/// 进度行：`Video Player - HH:MM:SS / HH:MM:SS`
pub fn format_progress(pts_us: i64, duration_us: i64) -> String {
    let (h, m, s) = split_time(pts_us);
    let (th, tm, ts) = split_time(duration_us);
    format!(
        "Video Player - {:02}:{:02}:{:02} / {:02}:{:02}:{:02}",
        h, m, s, th, tm, ts
    )
}

fn split_time(us: i64) -> (i64, i64, i64) {
    let total = us.max(0) / TIME_BASE;
    (total / 3600, (total / 60) % 60, total % 60)
}
