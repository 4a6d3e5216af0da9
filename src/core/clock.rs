use crate::core::types::{NO_PTS, TIME_BASE};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

/// 音频时钟 - 音画同步的主时钟
///
/// clock = base_pts + consumed_samples / sample_rate（微秒）
///
/// base_pts 由第一个音频帧确定一次，之后只有设备消费样本才会推进时钟。
/// `advance` 与 `reset` 都由音频引擎在环形缓冲区锁内调用，
/// 三个字段在读者眼中总是一起变化。
#[derive(Debug)]
pub struct AudioClock {
    base_pts: AtomicI64,
    consumed_samples: AtomicU64,
    clock: AtomicI64,
    sample_rate: AtomicU32,
}

impl AudioClock {
    pub fn new() -> Self {
        Self {
            base_pts: AtomicI64::new(NO_PTS),
            consumed_samples: AtomicU64::new(0),
            clock: AtomicI64::new(0),
            sample_rate: AtomicU32::new(0),
        }
    }

    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.sample_rate.store(sample_rate, Ordering::Release);
    }

    /// 当前音频时钟（微秒）
    pub fn now(&self) -> i64 {
        self.clock.load(Ordering::Acquire)
    }

    pub fn base_pts(&self) -> Option<i64> {
        match self.base_pts.load(Ordering::Acquire) {
            NO_PTS => None,
            pts => Some(pts),
        }
    }

    pub fn consumed_samples(&self) -> u64 {
        self.consumed_samples.load(Ordering::Acquire)
    }

    /// 仅在基准尚未确定时设置基准，返回是否生效
    pub fn establish_base(&self, pts: i64) -> bool {
        if pts == NO_PTS {
            return false;
        }
        self.base_pts
            .compare_exchange(NO_PTS, pts, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 设备消费了 `samples` 个样本（每声道），重新发布时钟
    pub fn advance(&self, samples: u64) -> i64 {
        let consumed = self.consumed_samples.fetch_add(samples, Ordering::AcqRel) + samples;
        let rate = self.sample_rate.load(Ordering::Acquire);
        if rate == 0 {
            return self.now();
        }
        let base = self.base_pts().unwrap_or(0);
        let clock = base + (consumed as i128 * TIME_BASE as i128 / rate as i128) as i64;
        self.clock.store(clock, Ordering::Release);
        clock
    }

    /// Seek 用：基准、消费计数和时钟一起置为 `pts`
    pub fn reset(&self, pts: i64) {
        self.consumed_samples.store(0, Ordering::Release);
        self.base_pts.store(pts, Ordering::Release);
        self.clock.store(pts, Ordering::Release);
    }

    /// 清空：基准回到未确定，时钟归零
    pub fn clear(&self) {
        self.consumed_samples.store(0, Ordering::Release);
        self.base_pts.store(NO_PTS, Ordering::Release);
        self.clock.store(0, Ordering::Release);
    }
}

impl Default for AudioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_established_once() {
        let clock = AudioClock::new();
        clock.set_sample_rate(48_000);
        assert!(clock.establish_base(1_000_000));
        assert!(!clock.establish_base(2_000_000));
        assert_eq!(clock.base_pts(), Some(1_000_000));

        // 48000 个样本 = 1 秒
        assert_eq!(clock.advance(48_000), 2_000_000);
        assert_eq!(clock.now(), 2_000_000);
    }

    #[test]
    fn test_reset_sets_clock_to_target() {
        let clock = AudioClock::new();
        clock.set_sample_rate(44_100);
        clock.establish_base(0);
        clock.advance(44_100 * 3);
        clock.reset(2_000_000);
        assert_eq!(clock.now(), 2_000_000);
        assert_eq!(clock.consumed_samples(), 0);
        assert_eq!(clock.advance(4_410), 2_100_000);
    }

    #[test]
    fn test_clear_unsets_base() {
        let clock = AudioClock::new();
        clock.set_sample_rate(48_000);
        clock.reset(5_000_000);
        clock.clear();
        assert_eq!(clock.base_pts(), None);
        assert_eq!(clock.now(), 0);
        assert!(clock.establish_base(300));
    }

    #[test]
    fn test_advance_is_monotonic() {
        let clock = AudioClock::new();
        clock.set_sample_rate(48_000);
        clock.establish_base(0);
        let mut last = clock.now();
        for chunk in [1024u64, 0, 512, 2048, 1] {
            let now = clock.advance(chunk);
            assert!(now >= last);
            last = now;
        }
    }
}
