//! 入站消息计数器的滑动窗口（防重放）
//!
//! 记录已接受的最大计数器以及其后 `size` 个位置的位图：
//! - 早于 `highest - size` 的计数器直接拒绝
//! - 窗口内已出现过的计数器拒绝
//! - 只有通过认证的消息才能更新窗口
//!
//! 非线程安全，由 `SecurityManager` 在锁内使用。

/// 位图最多覆盖 128 个计数器
pub const MAX_WINDOW_SIZE: u64 = 128;

#[derive(Debug, Clone)]
pub struct SequenceWindow {
    highest: u64,
    /// bit 0 = highest，bit 1 = highest - 1，依此类推
    bitmap: u128,
    size: u64,
}

impl Default for SequenceWindow {
    fn default() -> Self {
        Self::with_size(64)
    }
}

impl SequenceWindow {
    /// 窗口大小被限制在 1..=128
    pub fn with_size(size: u64) -> Self {
        Self {
            highest: 0,
            bitmap: 0,
            size: size.clamp(1, MAX_WINDOW_SIZE),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn is_empty(&self) -> bool {
        self.bitmap == 0
    }

    /// 只检查不更新
    pub fn check(&self, seq: u64) -> bool {
        if self.is_empty() || seq > self.highest {
            return true;
        }
        if seq.saturating_add(self.size) <= self.highest {
            return false;
        }
        self.bitmap & (1u128 << (self.highest - seq)) == 0
    }

    /// 有效时记录该计数器并返回 true，重放或过旧返回 false
    pub fn check_and_update(&mut self, seq: u64) -> bool {
        if self.is_empty() {
            self.highest = seq;
            self.bitmap = 1;
            return true;
        }

        if seq > self.highest {
            let shift = seq - self.highest;
            self.bitmap = if shift >= 128 {
                1
            } else {
                (self.bitmap << shift) | 1
            };
            self.highest = seq;
            return true;
        }

        if seq.saturating_add(self.size) <= self.highest {
            return false;
        }

        let mask = 1u128 << (self.highest - seq);
        if self.bitmap & mask != 0 {
            return false;
        }
        self.bitmap |= mask;
        true
    }

    pub fn highest(&self) -> Option<u64> {
        (!self.is_empty()).then_some(self.highest)
    }

    pub fn reset(&mut self) {
        self.highest = 0;
        self.bitmap = 0;
    }
}
