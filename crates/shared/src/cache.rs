//! 键值缓存模块
//!
//! 定义带过期时间的键值存储抽象 [`KeyedStore`]，提供 Redis 与进程内两种实现。
//! 业务侧只依赖 trait，单实例部署可用内存实现，多实例部署切换到 Redis 共享状态。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tracing::{debug, info, instrument};

use crate::config::RedisConfig;
use crate::error::{InfraError, Result};

/// 带 TTL 的键值存储
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// 读取值，过期或不存在返回 None
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// 写入值并设置 TTL（覆盖已有值）
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// 仅在 key 不存在时写入
    ///
    /// 返回 true 表示写入成功，false 表示 key 已存在。
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn health_check(&self) -> Result<()>;
}

// ============================================================================
// Redis 实现
// ============================================================================

/// Redis 缓存客户端
#[derive(Clone)]
pub struct Cache {
    client: Client,
}

impl Cache {
    /// 创建 Redis 客户端
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        info!("Redis client created");
        Ok(Self { client })
    }

    async fn get_conn(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(InfraError::from)
    }
}

#[async_trait]
impl KeyedStore for Cache {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.get_conn().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    /// 基于 Redis SET NX EX 实现，适用于分布式幂等检查
    #[instrument(skip(self, value))]
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.get_conn().await?;
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(InfraError::from)
    }
}

// ============================================================================
// 进程内实现
// ============================================================================

/// 每写入多少次顺带清理一次过期条目
const DEFAULT_PURGE_INTERVAL: u64 = 256;

/// 进程内 TTL 缓存
///
/// 过期条目在读取时惰性剔除，另外每写入 `purge_interval` 次整体清理一次，
/// 避免只写不读的键（如幂等键）无限堆积。
pub struct MemoryCache {
    entries: DashMap<String, (String, Instant)>,
    writes: AtomicU64,
    purge_interval: u64,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_purge_interval(DEFAULT_PURGE_INTERVAL)
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_purge_interval(purge_interval: u64) -> Self {
        Self {
            entries: DashMap::new(),
            writes: AtomicU64::new(0),
            purge_interval: purge_interval.max(1),
        }
    }

    fn record_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % self.purge_interval == 0 {
            let purged = self.purge_expired();
            if purged > 0 {
                debug!(purged, remaining = self.entries.len(), "已清理过期缓存条目");
            }
        }
    }

    /// 清理所有已过期条目，返回清理数量
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyedStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .filter(|entry| entry.1 > now)
            .map(|entry| entry.0.clone());

        if value.is_none() {
            self.entries.remove_if(key, |_, (_, expires_at)| *expires_at <= now);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        self.record_write();
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        // entry API 持有分片写锁，判断与写入是原子的
        let mut inserted = false;
        self.entries
            .entry(key.to_string())
            .and_modify(|(existing, expires_at)| {
                if *expires_at <= now {
                    *existing = value.to_string();
                    *expires_at = now + ttl;
                    inserted = true;
                }
            })
            .or_insert_with(|| {
                inserted = true;
                (value.to_string(), now + ttl)
            });
        self.record_write();
        Ok(inserted)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// 缓存键生成器
pub struct CacheKey;

impl CacheKey {
    /// 广播提交幂等键（按管理员隔离）
    pub fn broadcast_idempotency(admin_id: &str, key: &str) -> String {
        format!("broadcast:idempotency:{}:{}", admin_id, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_generation() {
        assert_eq!(
            CacheKey::broadcast_idempotency("admin-1", "abc"),
            "broadcast:idempotency:admin-1:abc"
        );
    }

    #[tokio::test]
    async fn test_memory_set_nx_only_once() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);

        assert!(cache.set_nx("k", "v1", ttl).await.unwrap());
        assert!(!cache.set_nx("k", "v2", ttl).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_memory_expired_entry_is_absent() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_millis(0)).await.unwrap();

        assert!(cache.get("k").await.unwrap().is_none());
        // 过期后可以重新占用
        assert!(cache.set_nx("k", "v2", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_purge_and_delete() {
        let cache = MemoryCache::new();
        cache.set("a", "1", Duration::from_millis(0)).await.unwrap();
        cache.set("b", "2", Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);

        tokio_test::assert_ok!(cache.delete("b").await);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_memory_write_only_keys_are_evicted() {
        let cache = MemoryCache::with_purge_interval(100);

        for i in 0..1000 {
            let key = format!("short-{}", i);
            assert!(cache.set_nx(&key, "1", Duration::from_millis(1)).await.unwrap());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        // 第 1100 次写入触发清理，之前的短 TTL 键全部过期
        for i in 0..100 {
            let key = format!("long-{}", i);
            assert!(cache.set_nx(&key, "1", Duration::from_secs(60)).await.unwrap());
        }
        assert_eq!(cache.len(), 100);
    }
}
