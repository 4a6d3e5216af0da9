use crate::core::DecodedFrame;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// 条件变量单次等待上限，到时重新检查退出条件
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// 有界帧队列（单生产者，消费者调用由同一把锁串行化）
///
/// 满时生产者在条件变量上等待，消费一帧后唤醒；渲染侧可以改用
/// `push_drop_oldest` 丢弃最旧的帧。
pub struct FrameQueue {
    frames: Mutex<VecDeque<DecodedFrame>>,
    changed: Condvar,
    capacity: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            changed: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    /// 队首帧的 PTS
    pub fn front_pts(&self) -> Option<i64> {
        self.frames.lock().front().map(|frame| frame.pts)
    }

    /// 阻塞推入：队列满时等待空位
    ///
    /// `abort` 在持锁状态下检查，返回 true 时放弃推入并返回 false。
    /// 与持同一把锁的 `clear` 配合，保证 seek 之后不会再混进旧帧。
    pub fn push_blocking<F>(&self, frame: DecodedFrame, abort: F) -> bool
    where
        F: Fn() -> bool,
    {
        let mut frames = self.frames.lock();
        loop {
            if abort() {
                return false;
            }
            if frames.len() < self.capacity {
                frames.push_back(frame);
                self.changed.notify_all();
                return true;
            }
            self.changed.wait_for(&mut frames, WAIT_SLICE);
        }
    }

    /// 非阻塞推入，队列满时把帧退回
    pub fn try_push(&self, frame: DecodedFrame) -> std::result::Result<(), DecodedFrame> {
        let mut frames = self.frames.lock();
        if frames.len() >= self.capacity {
            return Err(frame);
        }
        frames.push_back(frame);
        self.changed.notify_all();
        Ok(())
    }

    /// 推入，队列满时先淘汰最旧的一帧并返回它
    pub fn push_drop_oldest(&self, frame: DecodedFrame) -> Option<DecodedFrame> {
        let mut frames = self.frames.lock();
        let evicted = if frames.len() >= self.capacity {
            frames.pop_front()
        } else {
            None
        };
        frames.push_back(frame);
        self.changed.notify_all();
        evicted
    }

    /// 非阻塞取出最旧的一帧
    pub fn pop(&self) -> Option<DecodedFrame> {
        let mut frames = self.frames.lock();
        let frame = frames.pop_front();
        if frame.is_some() {
            self.changed.notify_all();
        }
        frame
    }

    /// 清空队列，返回被丢弃的帧数
    pub fn clear(&self) -> usize {
        let mut frames = self.frames.lock();
        let dropped = frames.len();
        frames.clear();
        self.changed.notify_all();
        dropped
    }

    /// 等待消费者取空队列；`abort` 返回 true 时提前结束并返回 false
    pub fn wait_until_empty<F>(&self, abort: F) -> bool
    where
        F: Fn() -> bool,
    {
        let mut frames = self.frames.lock();
        loop {
            if frames.is_empty() {
                return true;
            }
            if abort() {
                return false;
            }
            self.changed.wait_for(&mut frames, WAIT_SLICE);
        }
    }

    /// 唤醒所有等待者（状态变化时调用）
    pub fn notify_all(&self) {
        let _frames = self.frames.lock();
        self.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AudioSamples, FramePayload, SampleFormat};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn frame(pts: i64) -> DecodedFrame {
        DecodedFrame::new(
            FramePayload::Audio(AudioSamples {
                sample_rate: 48_000,
                channels: 1,
                format: SampleFormat::I16,
                planar: false,
                nb_samples: 0,
                planes: vec![Vec::new()],
            }),
            pts,
            20_000,
        )
    }

    #[test]
    fn test_fifo_order() {
        let queue = FrameQueue::new(4);
        for pts in 0..3 {
            assert!(queue.try_push(frame(pts)).is_ok());
        }
        assert_eq!(queue.front_pts(), Some(0));
        assert_eq!(queue.pop().map(|f| f.pts), Some(0));
        assert_eq!(queue.pop().map(|f| f.pts), Some(1));
        assert_eq!(queue.pop().map(|f| f.pts), Some(2));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_try_push_full_returns_frame() {
        let queue = FrameQueue::new(1);
        assert!(queue.try_push(frame(1)).is_ok());
        let rejected = queue.try_push(frame(2)).unwrap_err();
        assert_eq!(rejected.pts, 2);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_drop_oldest_evicts_exactly_one() {
        let queue = FrameQueue::new(2);
        assert!(queue.push_drop_oldest(frame(1)).is_none());
        assert!(queue.push_drop_oldest(frame(2)).is_none());
        let evicted = queue.push_drop_oldest(frame(3));
        assert_eq!(evicted.map(|f| f.pts), Some(1));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.front_pts(), Some(2));
    }

    #[test]
    fn test_blocking_push_wakes_on_pop() {
        let queue = Arc::new(FrameQueue::new(1));
        queue.try_push(frame(0)).unwrap();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push_blocking(frame(1), || false))
        };

        thread::sleep(Duration::from_millis(30));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().map(|f| f.pts), Some(0));

        assert!(producer.join().unwrap());
        assert_eq!(queue.pop().map(|f| f.pts), Some(1));
    }

    #[test]
    fn test_blocking_push_aborts() {
        let queue = Arc::new(FrameQueue::new(1));
        queue.try_push(frame(0)).unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let producer = {
            let queue = queue.clone();
            let stop = stop.clone();
            thread::spawn(move || queue.push_blocking(frame(1), || stop.load(Ordering::Acquire)))
        };

        thread::sleep(Duration::from_millis(20));
        stop.store(true, Ordering::Release);
        queue.notify_all();

        assert!(!producer.join().unwrap());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_wait_until_empty() {
        let queue = Arc::new(FrameQueue::new(3));
        queue.try_push(frame(0)).unwrap();
        queue.try_push(frame(1)).unwrap();

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                while queue.pop().is_some() {
                    thread::sleep(Duration::from_millis(5));
                }
            })
        };

        assert!(queue.wait_until_empty(|| false));
        consumer.join().unwrap();
        assert!(queue.is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        TryPush,
        DropOldest,
        Pop,
        Clear,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => Just(Op::TryPush),
            3 => Just(Op::DropOldest),
            4 => Just(Op::Pop),
            1 => Just(Op::Clear),
        ]
    }

    proptest! {
        #[test]
        fn prop_size_never_exceeds_capacity(capacity in 1usize..8, ops in prop::collection::vec(op(), 0..200)) {
            let queue = FrameQueue::new(capacity);
            let mut model: VecDeque<i64> = VecDeque::new();
            let mut next_pts = 0i64;

            for op in ops {
                match op {
                    Op::TryPush => {
                        let accepted = queue.try_push(frame(next_pts)).is_ok();
                        prop_assert_eq!(accepted, model.len() < capacity);
                        if accepted {
                            model.push_back(next_pts);
                        }
                        next_pts += 1;
                    }
                    Op::DropOldest => {
                        let evicted = queue.push_drop_oldest(frame(next_pts)).map(|f| f.pts);
                        let expected = if model.len() >= capacity { model.pop_front() } else { None };
                        prop_assert_eq!(evicted, expected);
                        model.push_back(next_pts);
                        next_pts += 1;
                    }
                    Op::Pop => {
                        prop_assert_eq!(queue.pop().map(|f| f.pts), model.pop_front());
                    }
                    Op::Clear => {
                        prop_assert_eq!(queue.clear(), model.len());
                        model.clear();
                    }
                }
                prop_assert!(queue.len() <= capacity);
                prop_assert_eq!(queue.len(), model.len());
            }
        }
    }
}
