//! KV 存储模块 - 本地持久化的键值存储
//!
//! 本模块提供：
//! - `LocalStorage` trait：`set(key, value)` / `get(key, default)` / `remove(key)`
//! - `KvStore`：基于 sled 的持久化实现（进程重启后数据仍在）
//! - `MemoryKvStore`：纯内存实现（测试、持久化不可用时降级）

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use sled::{Db, Tree};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{MeetchatSDKError, Result};

/// 缓存键常量
pub mod keys {
    /// 离线动作队列
    pub const OFFLINE_QUEUE: &str = "offlineQueue";
}

/// 本地键值存储接口
///
/// 值统一为 JSON，便于与浏览器 localStorage 的语义保持一致。
#[async_trait]
pub trait LocalStorage: Send + Sync + std::fmt::Debug {
    /// 写入键值对
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// 读取键值对，不存在时返回 `default`
    async fn get(&self, key: &str, default: Value) -> Result<Value>;

    /// 删除键
    async fn remove(&self, key: &str) -> Result<()>;

    /// 是否为持久化存储
    fn is_persistent(&self) -> bool;
}

/// 基于 sled 的 KV 存储
#[derive(Debug)]
pub struct KvStore {
    base_path: PathBuf,
    db: Arc<Db>,
    tree: Tree,
}

impl KvStore {
    /// 默认命名空间
    pub const DEFAULT_NAMESPACE: &'static str = "meetchat";

    /// 打开（或创建）`base_path/kv` 下的 KV 存储
    pub async fn new(base_path: &Path) -> Result<Self> {
        Self::with_namespace(base_path, Self::DEFAULT_NAMESPACE).await
    }

    pub async fn with_namespace(base_path: &Path, namespace: &str) -> Result<Self> {
        let base_path = base_path.to_path_buf();
        let kv_path = base_path.join("kv");

        tokio::fs::create_dir_all(&kv_path)
            .await
            .map_err(|e| MeetchatSDKError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        // 页面刷新/进程重启时旧实例可能刚释放文件锁，重试多次带退避
        const MAX_OPEN_RETRIES: u32 = 5;
        const RETRY_DELAY_MS: u64 = 100;
        let mut last_err: Option<sled::Error> = None;
        let mut db_opt: Option<Db> = None;
        for attempt in 0..MAX_OPEN_RETRIES {
            match sled::open(&kv_path) {
                Ok(d) => {
                    db_opt = Some(d);
                    break;
                }
                Err(e) => {
                    let msg = e.to_string();
                    last_err = Some(e);
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    if is_lock && attempt + 1 < MAX_OPEN_RETRIES {
                        let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    } else {
                        break;
                    }
                }
            }
        }
        let db = db_opt.ok_or_else(|| {
            MeetchatSDKError::KvStore(
                last_err
                    .map(|e| format!("打开 sled 数据库失败: {}", e))
                    .unwrap_or_else(|| "打开 sled 数据库失败".to_string()),
            )
        })?;

        let tree = db
            .open_tree(namespace)
            .map_err(|e| MeetchatSDKError::KvStore(format!("打开命名空间失败: {}", e)))?;

        tracing::info!("KV 存储已打开: {} (namespace={})", kv_path.display(), namespace);

        Ok(Self {
            base_path,
            db: Arc::new(db),
            tree,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// 检查键是否存在
    pub fn exists(&self, key: &str) -> Result<bool> {
        self.tree
            .contains_key(key)
            .map_err(|e| MeetchatSDKError::KvStore(format!("检查键存在失败: {}", e)))
    }

    /// 键数量
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// 强制刷盘
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| MeetchatSDKError::KvStore(format!("刷盘失败: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl LocalStorage for KvStore {
    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let value_bytes = serde_json::to_vec(&value)
            .map_err(|e| MeetchatSDKError::Serialization(format!("序列化值失败: {}", e)))?;

        self.tree
            .insert(key, value_bytes)
            .map_err(|e| MeetchatSDKError::KvStore(format!("设置键值对失败: {}", e)))?;

        // 每次变更都刷盘，保证刷新页面/重启进程不会丢失
        self.flush().await
    }

    async fn get(&self, key: &str, default: Value) -> Result<Value> {
        let result = self
            .tree
            .get(key)
            .map_err(|e| MeetchatSDKError::KvStore(format!("获取键值对失败: {}", e)))?;

        match result {
            Some(value_bytes) => serde_json::from_slice(&value_bytes)
                .map_err(|e| MeetchatSDKError::Serialization(format!("反序列化值失败: {}", e))),
            None => Ok(default),
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.tree
            .remove(key)
            .map_err(|e| MeetchatSDKError::KvStore(format!("删除键值对失败: {}", e)))?;
        self.flush().await
    }

    fn is_persistent(&self) -> bool {
        true
    }
}

/// 纯内存 KV 存储
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl LocalStorage for MemoryKvStore {
    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str, default: Value) -> Result<Value> {
        Ok(self.entries.read().get(key).cloned().unwrap_or(default))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

/// 打开持久化存储；失败时降级为内存存储（本次会话内有效）
pub async fn open_or_memory(base_path: &Path) -> Arc<dyn LocalStorage> {
    match KvStore::new(base_path).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!("⚠️ 本地持久化不可用，降级为内存存储: {}", e);
            Arc::new(MemoryKvStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_kv_set_get_remove() {
        let temp_dir = TempDir::new().unwrap();
        let store = KvStore::new(temp_dir.path()).await.unwrap();

        assert_eq!(store.get("missing", json!([])).await.unwrap(), json!([]));

        store.set("greeting", json!({"text": "hello"})).await.unwrap();
        assert!(store.exists("greeting").unwrap());
        assert_eq!(
            store.get("greeting", Value::Null).await.unwrap(),
            json!({"text": "hello"})
        );

        store.remove("greeting").await.unwrap();
        assert!(!store.exists("greeting").unwrap());
        assert_eq!(store.get("greeting", Value::Null).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_kv_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = KvStore::new(temp_dir.path()).await.unwrap();
            store.set(keys::OFFLINE_QUEUE, json!([1, 2, 3])).await.unwrap();
        }

        let reopened = KvStore::new(temp_dir.path()).await.unwrap();
        assert_eq!(
            reopened.get(keys::OFFLINE_QUEUE, json!([])).await.unwrap(),
            json!([1, 2, 3])
        );
        assert!(reopened.is_persistent());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryKvStore::new();
        assert!(store.is_empty());
        store.set("k", json!(1)).await.unwrap();
        assert_eq!(store.get("k", json!(0)).await.unwrap(), json!(1));
        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k", json!(0)).await.unwrap(), json!(0));
        assert!(!store.is_persistent());
    }
}
