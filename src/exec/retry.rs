//! 重试策略
//!
//! 指数退避：第 n 次重试前等待 base * 2^n，封顶 cap。
//! 仅 Transient 错误走重试；界与形状来自配置。

use std::time::Duration;

/// 重试策略：最大尝试次数与退避形状
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 总尝试次数（含首次），至少 1
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_ms: u64, cap_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base: Duration::from_millis(base_ms),
            cap: Duration::from_millis(cap_ms),
        }
    }

    /// 第 attempt 次失败后的等待时长（attempt 从 0 计）
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 500, 10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_shape() {
        let policy = RetryPolicy::new(3, 500, 10_000);
        assert_eq!(policy.delay(0), Duration::from_millis(500));
        assert_eq!(policy.delay(1), Duration::from_millis(1000));
        assert_eq!(policy.delay(2), Duration::from_millis(2000));
    }

    #[test]
    fn test_cap() {
        let policy = RetryPolicy::new(10, 500, 4000);
        assert_eq!(policy.delay(5), Duration::from_millis(4000));
        // 溢出安全
        assert_eq!(policy.delay(40), Duration::from_millis(4000));
    }

    #[test]
    fn test_min_one_attempt() {
        let policy = RetryPolicy::new(0, 1, 1);
        assert_eq!(policy.max_attempts, 1);
    }
}
