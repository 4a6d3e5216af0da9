use crate::core::PlayerConfig;

/// 音视频同步策略（音频为主时钟）
///
/// 每一帧视频根据 `diff = video_pts - audio_clock` 算出下一次渲染前的等待时间。
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    threshold_min_us: i64,
    threshold_max_us: i64,
    framedup_threshold_us: i64,
    smoothing: f64,
    last_delay_us: i64,
}

/// 单帧的同步判定（调试日志用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// 差值在容忍范围内
    InSync,
    /// 有漂移但未到硬校正阈值，保持原节奏
    Drift,
    /// 超过硬校正阈值：delay += diff
    Corrected,
    /// 视频落后太多：不等待，立即追赶
    CatchUp,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncDecision {
    pub diff_us: i64,
    /// 平滑前的延迟
    pub raw_delay_us: i64,
    /// 平滑后的延迟（实际等待时间）
    pub delay_us: i64,
    pub action: SyncAction,
}

impl SyncPolicy {
    pub fn new(config: &PlayerConfig) -> Self {
        Self {
            threshold_min_us: config.sync_threshold_min_ms * 1000,
            threshold_max_us: config.sync_threshold_max_ms * 1000,
            framedup_threshold_us: config.sync_framedup_threshold_ms * 1000,
            smoothing: config.delay_smoothing,
            last_delay_us: 0,
        }
    }

    /// 清除平滑历史（seek、重新播放时）
    pub fn reset(&mut self) {
        self.last_delay_us = 0;
    }

    /// 平滑前的原始延迟
    pub fn raw_delay(&self, base_delay_us: i64, diff_us: i64) -> (i64, SyncAction) {
        if diff_us < -self.framedup_threshold_us {
            (0, SyncAction::CatchUp)
        } else if diff_us.abs() > self.threshold_max_us {
            ((base_delay_us + diff_us).max(0), SyncAction::Corrected)
        } else if diff_us.abs() < self.threshold_min_us {
            (base_delay_us, SyncAction::InSync)
        } else {
            (base_delay_us, SyncAction::Drift)
        }
    }

    /// 计算下一帧前的等待时间
    pub fn compute(&mut self, video_pts_us: i64, audio_clock_us: i64, base_delay_us: i64) -> SyncDecision {
        let diff_us = video_pts_us - audio_clock_us;
        let (raw_delay_us, action) = self.raw_delay(base_delay_us, diff_us);

        let delay_us = if self.last_delay_us > 0 {
            (self.smoothing * self.last_delay_us as f64 + (1.0 - self.smoothing) * raw_delay_us as f64).round() as i64
        } else {
            raw_delay_us
        };
        self.last_delay_us = delay_us;

        SyncDecision {
            diff_us,
            raw_delay_us,
            delay_us,
            action,
        }
    }
}

/// 帧的基础延迟：帧自身时长，没有则用 1/帧率
pub fn base_delay_us(frame_duration_us: i64, frame_rate: f64) -> i64 {
    if frame_duration_us > 0 {
        frame_duration_us
    } else if frame_rate.is_finite() && frame_rate > 0.0 {
        (1_000_000.0 / frame_rate) as i64
    } else {
        40_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> SyncPolicy {
        SyncPolicy::new(&PlayerConfig::default())
    }

    #[test]
    fn test_video_behind_hard_correction() {
        // diff = -150ms，超过 100ms 硬校正阈值
        let mut sync = policy();
        let decision = sync.compute(1_000_000, 1_150_000, 40_000);
        assert_eq!(decision.diff_us, -150_000);
        assert_eq!(decision.action, SyncAction::Corrected);
        assert_eq!(decision.raw_delay_us, (40_000i64 - 150_000).max(0));
        assert_eq!(decision.raw_delay_us, 0);

        let decision = sync.compute(1_000_000, 1_150_000, 200_000);
        assert_eq!(decision.raw_delay_us, 50_000);
    }

    #[test]
    fn test_video_ahead_slows_down() {
        let mut sync = policy();
        let decision = sync.compute(1_300_000, 1_000_000, 40_000);
        assert_eq!(decision.action, SyncAction::Corrected);
        assert_eq!(decision.raw_delay_us, 340_000);
    }

    #[test]
    fn test_small_drift_not_corrected() {
        let mut sync = policy();
        assert_eq!(sync.compute(1_020_000, 1_000_000, 40_000).action, SyncAction::InSync);
        assert_eq!(sync.raw_delay(40_000, -70_000), (40_000, SyncAction::Drift));
    }

    #[test]
    fn test_far_behind_catches_up() {
        let sync = policy();
        assert_eq!(sync.raw_delay(40_000, -250_000), (0, SyncAction::CatchUp));
        // 落后超过 200ms 时即使帧时长很大也立即追赶
        assert_eq!(sync.raw_delay(400_000, -250_000), (0, SyncAction::CatchUp));
    }

    #[test]
    fn test_smoothing_after_first_delay() {
        let mut sync = policy();
        assert_eq!(sync.compute(0, 0, 40_000).delay_us, 40_000);
        // 0.9 * 40000 + 0.1 * 340000
        assert_eq!(sync.compute(1_300_000, 1_000_000, 40_000).delay_us, 70_000);
        sync.reset();
        assert_eq!(sync.compute(0, 0, 33_333).delay_us, 33_333);
    }

    #[test]
    fn test_base_delay_fallbacks() {
        assert_eq!(base_delay_us(20_000, 25.0), 20_000);
        assert_eq!(base_delay_us(0, 25.0), 40_000);
        assert_eq!(base_delay_us(0, 0.0), 40_000);
    }
}
