use parking_lot::Mutex;

struct RingInner {
    data: Vec<u8>,
    /// 逻辑读游标（单调递增，取模定位）
    read: u64,
    /// 逻辑写游标
    write: u64,
    /// 每次 clear 加一，写入方据此丢弃清空前转换好的数据
    generation: u64,
}

impl RingInner {
    fn len(&self) -> usize {
        (self.write - self.read) as usize
    }

    fn copy_in(&mut self, src: &[u8]) {
        let cap = self.data.len();
        let start = (self.write % cap as u64) as usize;
        let first = src.len().min(cap - start);
        self.data[start..start + first].copy_from_slice(&src[..first]);
        self.data[..src.len() - first].copy_from_slice(&src[first..]);
        self.write += src.len() as u64;
    }

    fn copy_out(&mut self, dst: &mut [u8]) {
        let cap = self.data.len();
        let start = (self.read % cap as u64) as usize;
        let first = dst.len().min(cap - start);
        let rest = dst.len() - first;
        dst[..first].copy_from_slice(&self.data[start..start + first]);
        dst[first..].copy_from_slice(&self.data[..rest]);
        self.read += dst.len() as u64;
    }
}

/// PCM 环形缓冲区（字节）
///
/// 读写游标只增不减，`write - read` 始终在 `[0, capacity]` 内；
/// 生产者、设备回调和 clear 共用一把锁。
pub struct PcmRingBuffer {
    inner: Mutex<RingInner>,
    capacity: usize,
}

impl PcmRingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(RingInner {
                data: vec![0; capacity],
                read: 0,
                write: 0,
                generation: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 可读字节数
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 剩余可写字节数
    pub fn free(&self) -> usize {
        self.capacity - self.len()
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// (读游标, 写游标)
    pub fn cursors(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (inner.read, inner.write)
    }

    /// 尽量写入，返回实际写入的字节数
    pub fn push(&self, src: &[u8]) -> usize {
        let mut inner = self.inner.lock();
        let n = src.len().min(self.capacity - inner.len());
        inner.copy_in(&src[..n]);
        n
    }

    /// 仅当代号未变时写入，写入量按 `align` 字节向下取整
    ///
    /// 返回 `None` 表示缓冲区在这段数据准备期间被清空过，数据应丢弃。
    pub fn push_if(&self, generation: u64, src: &[u8], align: usize) -> Option<usize> {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return None;
        }
        let align = align.max(1);
        let free = self.capacity - inner.len();
        let n = src.len().min(free) / align * align;
        inner.copy_in(&src[..n]);
        Some(n)
    }

    /// 读出最多 `dst.len()` 字节，返回实际读出的字节数
    pub fn pop(&self, dst: &mut [u8]) -> usize {
        self.pop_and_then(dst, |_| ())
    }

    /// 读出数据，并在同一临界区内用读出的字节数调用 `after`
    pub fn pop_and_then<F>(&self, dst: &mut [u8], after: F) -> usize
    where
        F: FnOnce(usize),
    {
        let mut inner = self.inner.lock();
        let n = dst.len().min(inner.len());
        if n > 0 {
            inner.copy_out(&mut dst[..n]);
            after(n);
        }
        n
    }

    /// 清空内容、游标归零、代号加一
    pub fn clear(&self) {
        self.clear_and_then(|| ());
    }

    /// 清空后在同一临界区内执行 `after`（用于同步重置时钟）
    pub fn clear_and_then<F>(&self, after: F)
    where
        F: FnOnce(),
    {
        let mut inner = self.inner.lock();
        inner.read = 0;
        inner.write = 0;
        inner.generation += 1;
        after();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    #[test]
    fn test_push_pop_across_wrap() {
        let ring = PcmRingBuffer::new(8);
        assert_eq!(ring.push(&[1, 2, 3, 4, 5, 6]), 6);

        let mut out = [0u8; 4];
        assert_eq!(ring.pop(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);

        // 写入跨越末尾
        assert_eq!(ring.push(&[7, 8, 9, 10, 11, 12]), 6);
        assert_eq!(ring.len(), 8);
        assert_eq!(ring.push(&[13]), 0);

        let mut out = [0u8; 8];
        assert_eq!(ring.pop(&mut out), 8);
        assert_eq!(out, [5, 6, 7, 8, 9, 10, 11, 12]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_push_if_respects_generation_and_alignment() {
        let ring = PcmRingBuffer::new(10);
        let generation = ring.generation();
        assert_eq!(ring.push_if(generation, &[0; 6], 4), Some(4));
        // 剩余 6 字节，按 4 对齐只能写 4
        assert_eq!(ring.push_if(generation, &[0; 8], 4), Some(4));

        ring.clear();
        assert_eq!(ring.push_if(generation, &[0; 4], 4), None);
        assert_eq!(ring.push_if(ring.generation(), &[0; 4], 4), Some(4));
    }

    #[test]
    fn test_clear_resets_cursors() {
        let ring = PcmRingBuffer::new(16);
        ring.push(&[1; 10]);
        let mut out = [0u8; 3];
        ring.pop(&mut out);
        assert_eq!(ring.cursors(), (3, 10));

        let mut ran = false;
        ring.clear_and_then(|| ran = true);
        assert!(ran);
        assert_eq!(ring.cursors(), (0, 0));
        assert_eq!(ring.free(), 16);
    }

    #[test]
    fn test_pop_and_then_only_called_with_data() {
        let ring = PcmRingBuffer::new(4);
        let mut calls = 0;
        let mut out = [0u8; 4];
        ring.pop_and_then(&mut out, |_| calls += 1);
        assert_eq!(calls, 0);

        ring.push(&[9, 9]);
        let mut consumed = 0;
        ring.pop_and_then(&mut out, |n| consumed = n);
        assert_eq!(consumed, 2);
    }

    proptest! {
        #[test]
        fn prop_round_trip_in_order(
            capacity in 1usize..64,
            ops in prop::collection::vec((any::<bool>(), 0usize..40), 0..200),
        ) {
            let ring = PcmRingBuffer::new(capacity);
            let mut model: VecDeque<u8> = VecDeque::new();
            let mut next: u8 = 0;

            for (is_push, size) in ops {
                if is_push {
                    let chunk: Vec<u8> = (0..size).map(|_| { next = next.wrapping_add(1); next }).collect();
                    let written = ring.push(&chunk);
                    prop_assert_eq!(written, size.min(capacity - model.len()));
                    model.extend(&chunk[..written]);
                } else {
                    let mut out = vec![0u8; size];
                    let expected_len = size.min(model.len());
                    let read = ring.pop(&mut out);
                    prop_assert_eq!(read, expected_len);
                    let expected: Vec<u8> = model.drain(..read).collect();
                    prop_assert_eq!(&out[..read], &expected[..]);
                }

                let (read, write) = ring.cursors();
                prop_assert!(write >= read);
                prop_assert!(write - read <= capacity as u64);
                prop_assert_eq!(ring.len(), model.len());
            }
        }
    }
}
