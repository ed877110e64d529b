//! 实体 ID 时钟：毫秒时间戳，保证严格单调递增（同一毫秒内或时钟回拨时 +1）

use crate::graph::EntityId;

#[derive(Debug, Clone, Default)]
pub struct IdClock {
    last: i64,
}

impl IdClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从已有实体的最大时间戳继续，加载旧宇宙后新 ID 仍排在其后
    pub fn starting_after(floor: i64) -> Self {
        Self { last: floor }
    }

    pub fn tick(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        self.last = now.max(self.last + 1);
        self.last
    }

    pub fn next_id(&mut self, prefix: &str) -> (EntityId, i64) {
        let stamp = self.tick();
        (EntityId::new(format!("{prefix}_{stamp}")), stamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strictly_monotonic() {
        let mut clock = IdClock::new();
        let mut prev = clock.tick();
        for _ in 0..1000 {
            let next = clock.tick();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_starting_after_future_floor() {
        let floor = chrono::Utc::now().timestamp_millis() + 10_000;
        let mut clock = IdClock::starting_after(floor);
        let (id, stamp) = clock.next_id("node");
        assert_eq!(stamp, floor + 1);
        assert_eq!(id.stamp(), Some(floor + 1));
    }
}
