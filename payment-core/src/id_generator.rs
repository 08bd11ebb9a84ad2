use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

pub trait IdGenerator: Send + Sync {
    /// 单调递增且唯一
    fn generate(&self) -> u64;
}

/// 进程内递增序列，以毫秒时间戳 × 1000 作为起点，重启后仍大于上次发出的 id
/// (前提是每毫秒发号不超过 1000 个)
#[derive(Debug)]
pub struct SequenceIdGenerator {
    last: AtomicU64,
}

impl SequenceIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(Utc::now().timestamp_millis().max(0) as u64 * 1000)
    }

    /// 下一个 id 为 `start + 1`
    pub fn starting_at(start: u64) -> Self {
        Self {
            last: AtomicU64::new(start),
        }
    }
}

impl Default for SequenceIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn generate(&self) -> u64 {
        // 同时跟随时钟前进，长时间运行后 id 仍带时间信息
        let floor = Utc::now().timestamp_millis().max(0) as u64 * 1000;
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(floor.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        floor.max(previous + 1)
    }
}
