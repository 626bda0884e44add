//! 登录失败限流
//!
//! 按限流键（命名空间前缀 + 客户端 IP）统计失败次数。每次失败都把过期时间
//! 重新设为 `now + window`；记录过期后自动视为清零。
//!
//! 计数存储通过 `ThrottleStore` 注入，默认实现是基于 `DashMap` 的内存表，
//! 单个键的读改写在分片锁内完成，并发请求不会丢失计数。

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};

/// 管理员登录限流键前缀
pub const ADMIN_LOGIN_NAMESPACE: &str = "admin-login";
/// 普通用户登录限流键前缀
pub const USER_LOGIN_NAMESPACE: &str = "user-login";

/// 构造限流键：同一 IP 共享计数，不同 IP 永不冲突
pub fn throttle_key(namespace: &str, ip: &str) -> String {
    format!("{}:{}", namespace, ip)
}

// ==================== 时钟 ====================

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 可手动拨动的时钟，用于测试过期逻辑
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ==================== 存储 ====================

/// 单个限流键的失败记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub key: String,
    pub count: u32,
    pub expires_at: DateTime<Utc>,
}

impl AttemptRecord {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// 限流计数存储
pub trait ThrottleStore: Send + Sync {
    /// 读取未过期的记录
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<AttemptRecord>;

    /// 计数加一并重置过期时间，返回更新后的记录
    fn increment(&self, key: &str, window: Duration, now: DateTime<Utc>) -> AttemptRecord;

    /// 仅当当前计数小于 `max` 时加一。检查与加一是一个原子操作；
    /// 已达上限时返回 `Err(当前记录)` 且不修改记录。
    fn increment_below(
        &self,
        key: &str,
        max: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<AttemptRecord, AttemptRecord>;

    fn remove(&self, key: &str);

    /// 清理过期记录，返回清理数量
    fn purge_expired(&self, now: DateTime<Utc>) -> usize;
}

/// 内存限流表
#[derive(Default)]
pub struct InMemoryThrottleStore {
    records: DashMap<String, AttemptRecord>,
}

impl InMemoryThrottleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ThrottleStore for InMemoryThrottleStore {
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<AttemptRecord> {
        let record = self.records.get(key).map(|r| r.clone())?;
        if record.is_expired(now) {
            self.records.remove_if(key, |_, r| r.is_expired(now));
            return None;
        }
        Some(record)
    }

    fn increment(&self, key: &str, window: Duration, now: DateTime<Utc>) -> AttemptRecord {
        let mut entry = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| AttemptRecord {
                key: key.to_string(),
                count: 0,
                expires_at: now,
            });

        if entry.is_expired(now) {
            entry.count = 0;
        }
        entry.count += 1;
        entry.expires_at = now + window;

        entry.clone()
    }

    fn increment_below(
        &self,
        key: &str,
        max: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<AttemptRecord, AttemptRecord> {
        let mut entry = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| AttemptRecord {
                key: key.to_string(),
                count: 0,
                expires_at: now,
            });

        if entry.is_expired(now) {
            entry.count = 0;
        }
        if entry.count >= max {
            return Err(entry.clone());
        }
        entry.count += 1;
        entry.expires_at = now + window;

        Ok(entry.clone())
    }

    fn remove(&self, key: &str) {
        self.records.remove(key);
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| !r.is_expired(now));
        before.saturating_sub(self.records.len())
    }
}

// ==================== 限流器 ====================

/// 限流检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleStatus {
    pub allowed: bool,
    /// 剩余等待秒数，放行时为 0
    pub retry_after: u64,
    pub attempts: u32,
}

/// 登录尝试限流器
#[derive(Clone)]
pub struct AttemptThrottle {
    store: Arc<dyn ThrottleStore>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
    window_secs: u64,
}

impl AttemptThrottle {
    pub fn new(
        store: Arc<dyn ThrottleStore>,
        clock: Arc<dyn Clock>,
        max_attempts: u32,
        window_secs: u64,
    ) -> Self {
        Self {
            store,
            clock,
            max_attempts,
            window_secs,
        }
    }

    /// 内存存储 + 系统时钟
    pub fn in_memory(max_attempts: u32, window_secs: u64) -> Self {
        Self::new(
            Arc::new(InMemoryThrottleStore::new()),
            Arc::new(SystemClock),
            max_attempts,
            window_secs,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 是否允许新的尝试；不允许时给出剩余等待秒数
    pub fn check(&self, key: &str) -> ThrottleStatus {
        let now = self.clock.now();
        match self.store.get(key, now) {
            Some(record) if record.count >= self.max_attempts => ThrottleStatus {
                allowed: false,
                retry_after: remaining_secs(record.expires_at, now),
                attempts: record.count,
            },
            Some(record) => ThrottleStatus {
                allowed: true,
                retry_after: 0,
                attempts: record.count,
            },
            None => ThrottleStatus {
                allowed: true,
                retry_after: 0,
                attempts: 0,
            },
        }
    }

    /// 记录一次失败并重置窗口，返回当前失败次数
    pub fn record_failure(&self, key: &str, window_secs: u64) -> u32 {
        let now = self.clock.now();
        self.store
            .increment(key, Duration::seconds(window_secs as i64), now)
            .count
    }

    /// 认证成功后清除计数
    pub fn clear(&self, key: &str) {
        self.store.remove(key);
    }

    /// 原子地占用一次尝试机会。
    ///
    /// 已达上限时返回 `Err(retry_after)`；否则计数加一（预先记为失败），
    /// 调用方在认证成功后必须调用 `clear`。
    pub fn reserve(&self, key: &str) -> Result<u32, u64> {
        let now = self.clock.now();
        self.store
            .increment_below(
                key,
                self.max_attempts,
                Duration::seconds(self.window_secs as i64),
                now,
            )
            .map(|record| record.count)
            .map_err(|record| remaining_secs(record.expires_at, now))
    }

    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired(self.clock.now())
    }
}

/// 剩余整秒数（向上取整，不为负）
fn remaining_secs(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (expires_at - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        (millis as u64).div_ceil(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle_with_clock() -> (AttemptThrottle, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        let throttle = AttemptThrottle::new(
            Arc::new(InMemoryThrottleStore::new()),
            Arc::new(clock.clone()),
            5,
            300,
        );
        (throttle, clock)
    }

    #[test]
    fn test_throttle_key_is_namespaced() {
        assert_eq!(throttle_key(ADMIN_LOGIN_NAMESPACE, "10.0.0.1"), "admin-login:10.0.0.1");
        assert_ne!(
            throttle_key(ADMIN_LOGIN_NAMESPACE, "10.0.0.1"),
            throttle_key(ADMIN_LOGIN_NAMESPACE, "10.0.0.11")
        );
    }

    #[test]
    fn test_blocks_after_max_failures() {
        let (throttle, _clock) = throttle_with_clock();
        let key = "admin-login:1.1.1.1";

        for i in 1..=4 {
            assert_eq!(throttle.record_failure(key, 300), i);
            assert!(throttle.check(key).allowed);
        }
        throttle.record_failure(key, 300);

        let status = throttle.check(key);
        assert!(!status.allowed);
        assert!(status.retry_after > 0 && status.retry_after <= 300);
        assert_eq!(status.attempts, 5);
    }

    #[test]
    fn test_retry_after_counts_down_and_expires() {
        let (throttle, clock) = throttle_with_clock();
        let key = "admin-login:2.2.2.2";
        for _ in 0..5 {
            throttle.record_failure(key, 300);
        }

        assert_eq!(throttle.check(key).retry_after, 300);

        clock.advance(Duration::milliseconds(120_500));
        // 179.5s 向上取整
        assert_eq!(throttle.check(key).retry_after, 180);

        clock.advance(Duration::seconds(180));
        let status = throttle.check(key);
        assert!(status.allowed);
        assert_eq!(status.retry_after, 0);
        assert_eq!(status.attempts, 0);
    }

    #[test]
    fn test_each_failure_rearms_window() {
        let (throttle, clock) = throttle_with_clock();
        let key = "admin-login:3.3.3.3";

        throttle.record_failure(key, 300);
        clock.advance(Duration::seconds(200));
        throttle.record_failure(key, 300);
        clock.advance(Duration::seconds(200));

        // 第一次失败后已过 400s，但第二次失败重新计时
        assert_eq!(throttle.check(key).attempts, 2);
    }

    #[test]
    fn test_clear_resets_counter() {
        let (throttle, _clock) = throttle_with_clock();
        let key = "admin-login:4.4.4.4";
        for _ in 0..5 {
            throttle.record_failure(key, 300);
        }
        throttle.clear(key);

        assert!(throttle.check(key).allowed);
        throttle.record_failure(key, 300);
        assert!(throttle.check(key).allowed);
    }

    #[test]
    fn test_reserve_stops_at_limit() {
        let (throttle, _clock) = throttle_with_clock();
        let key = "admin-login:5.5.5.5";

        for i in 1..=5 {
            assert_eq!(throttle.reserve(key), Ok(i));
        }
        let retry_after = throttle.reserve(key).unwrap_err();
        assert!(retry_after > 0 && retry_after <= 300);
        // 被拒绝的尝试不计数
        assert_eq!(throttle.check(key).attempts, 5);
    }

    #[test]
    fn test_purge_expired_records() {
        let store = Arc::new(InMemoryThrottleStore::new());
        let clock = ManualClock::new(Utc::now());
        let throttle = AttemptThrottle::new(store.clone(), Arc::new(clock.clone()), 5, 60);

        throttle.record_failure("a", 60);
        throttle.record_failure("b", 600);
        clock.advance(Duration::seconds(61));

        assert_eq!(throttle.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remaining_secs_never_negative() {
        let now = Utc::now();
        assert_eq!(remaining_secs(now - Duration::seconds(5), now), 0);
        assert_eq!(remaining_secs(now + Duration::milliseconds(1), now), 1);
    }
}
