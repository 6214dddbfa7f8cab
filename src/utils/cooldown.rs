use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::types::CooldownConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDecision {
    Allowed,
    /// `notify` is true only for the first refusal inside a window.
    Refused { notify: bool, wait: Duration },
}

#[derive(Debug, Default)]
struct CooldownState {
    /// aid -> (executions in the current window, last execution)
    last_exec: HashMap<i64, (u32, Instant)>,
    alerted: HashSet<i64>,
}

/// Per-user rate limit: at most `max_exec` commands, then a pause of
/// `suspend` since the last accepted one.
#[derive(Debug)]
pub struct Cooldown {
    suspend: Duration,
    max_exec: u32,
    capacity: usize,
    state: Mutex<CooldownState>,
}

impl Cooldown {
    pub fn new(config: &CooldownConfig) -> Self {
        Self {
            suspend: Duration::from_secs(config.suspend_secs),
            max_exec: config.max_exec.max(1),
            capacity: config.capacity.max(1),
            state: Mutex::new(CooldownState::default()),
        }
    }

    pub fn check(&self, aid: i64) -> CooldownDecision {
        self.check_at(aid, Instant::now())
    }

    pub fn check_at(&self, aid: i64, now: Instant) -> CooldownDecision {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let entry = state.last_exec.get(&aid).copied();
        let next = match entry {
            None => Some(1),
            Some((_, last)) if now.saturating_duration_since(last) >= self.suspend => Some(1),
            Some((count, _)) if count < self.max_exec => Some(count + 1),
            Some(_) => None,
        };

        match (next, entry) {
            (Some(count), _) => {
                state.last_exec.insert(aid, (count, now));
                state.alerted.remove(&aid);
                if state.last_exec.len() > self.capacity {
                    self.evict(&mut state, now);
                }
                CooldownDecision::Allowed
            }
            (None, Some((_, last))) => {
                let wait = self.suspend.saturating_sub(now.saturating_duration_since(last));
                let notify = state.alerted.insert(aid);
                CooldownDecision::Refused { notify, wait }
            }
            (None, None) => CooldownDecision::Allowed,
        }
    }

    fn evict(&self, state: &mut CooldownState, now: Instant) {
        let suspend = self.suspend;
        state
            .last_exec
            .retain(|_, (_, last)| now.saturating_duration_since(*last) < suspend);

        // 仍然超出容量時，丟棄最久未使用的記錄
        let overflow = state.last_exec.len().saturating_sub(self.capacity);
        if overflow > 0 {
            let mut oldest: Vec<(i64, Instant)> =
                state.last_exec.iter().map(|(aid, (_, last))| (*aid, *last)).collect();
            oldest.sort_by_key(|(_, last)| *last);
            for (aid, _) in oldest.into_iter().take(overflow) {
                state.last_exec.remove(&aid);
            }
        }

        let CooldownState { last_exec, alerted } = state;
        alerted.retain(|aid| last_exec.contains_key(aid));
        log::debug!("[Core.cooldown] 清理後剩餘 {} 筆冷卻記錄", last_exec.len());
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.state.lock().unwrap().last_exec.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cooldown(max_exec: u32, capacity: usize) -> Cooldown {
        Cooldown::new(&CooldownConfig {
            suspend_secs: 10,
            max_exec,
            capacity,
        })
    }

    #[test]
    fn test_window_and_single_alert() {
        let cd = cooldown(2, 100);
        let t0 = Instant::now();
        assert_eq!(cd.check_at(1, t0), CooldownDecision::Allowed);
        assert_eq!(cd.check_at(1, t0 + Duration::from_secs(1)), CooldownDecision::Allowed);
        assert_eq!(
            cd.check_at(1, t0 + Duration::from_secs(3)),
            CooldownDecision::Refused { notify: true, wait: Duration::from_secs(8) }
        );
        assert!(matches!(
            cd.check_at(1, t0 + Duration::from_secs(4)),
            CooldownDecision::Refused { notify: false, .. }
        ));
        // 其他用戶不受影響
        assert_eq!(cd.check_at(2, t0 + Duration::from_secs(4)), CooldownDecision::Allowed);
        // 冷卻結束後重新計算，並重新允許提醒
        assert_eq!(cd.check_at(1, t0 + Duration::from_secs(11)), CooldownDecision::Allowed);
        assert_eq!(cd.check_at(1, t0 + Duration::from_secs(12)), CooldownDecision::Allowed);
        assert!(matches!(
            cd.check_at(1, t0 + Duration::from_secs(13)),
            CooldownDecision::Refused { notify: true, .. }
        ));
    }

    #[test]
    fn test_capacity_evicts_expired_entries() {
        let cd = cooldown(1, 3);
        let t0 = Instant::now();
        for aid in 0..3 {
            cd.check_at(aid, t0);
        }
        assert_eq!(cd.tracked(), 3);
        cd.check_at(99, t0 + Duration::from_secs(30));
        assert_eq!(cd.tracked(), 1);
    }

    #[test]
    fn test_capacity_drops_oldest_active_entries() {
        let cd = cooldown(1, 3);
        let t0 = Instant::now();
        for aid in 0..5 {
            cd.check_at(aid, t0 + Duration::from_secs(aid as u64));
            assert!(cd.tracked() <= 3);
        }
        assert_eq!(cd.tracked(), 3);
        // 最舊的 0 號已被清掉，可以立即再執行；4 號仍在冷卻中
        assert_eq!(cd.check_at(0, t0 + Duration::from_secs(5)), CooldownDecision::Allowed);
        assert!(matches!(
            cd.check_at(4, t0 + Duration::from_secs(5)),
            CooldownDecision::Refused { .. }
        ));
    }
}
