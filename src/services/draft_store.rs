//! 草稿存储服务 - 业务能力层
//!
//! 只负责按 key 读写字符串，反馈页面的草稿以 JSON 形式保存。

use crate::error::StoreError;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// 学号反馈草稿 key
pub fn student_id_draft_key(exam_code: &str) -> String {
    format!("gradi_draft_{}", exam_code)
}

/// 题目反馈草稿 key
pub fn question_draft_key(exam_code: &str) -> String {
    format!("gradi_question_draft_{}", exam_code)
}

/// 同步的键值存储
pub trait DraftStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// 读取 `{ 文件名/题号: 值 }` 形式的草稿
///
/// 内容损坏时记录警告并视为没有草稿。
pub fn load_draft_map(
    store: &dyn DraftStore,
    key: &str,
) -> Result<BTreeMap<String, String>, StoreError> {
    let Some(raw) = store.get(key)? else {
        return Ok(BTreeMap::new());
    };
    match serde_json::from_str(&raw) {
        Ok(map) => Ok(map),
        Err(e) => {
            warn!("⚠️  草稿 {} 无法解析，已忽略: {}", key, e);
            Ok(BTreeMap::new())
        }
    }
}

/// 保存草稿，空值不写入
pub fn save_draft_map(
    store: &dyn DraftStore,
    key: &str,
    entries: impl IntoIterator<Item = (String, String)>,
) -> Result<(), StoreError> {
    let map: BTreeMap<String, String> = entries
        .into_iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .collect();
    let raw = serde_json::to_string(&map).map_err(|e| StoreError::Corrupted {
        key: key.to_string(),
        source: e,
    })?;
    store.set(key, &raw)
}

/// 内存存储
#[derive(Default)]
pub struct MemoryDraftStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StoreError> {
        self.entries
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl DraftStore for MemoryDraftStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries()?.remove(key);
        Ok(())
    }
}

/// 文件存储，每个 key 一个 `{key}.json`
pub struct FileDraftStore {
    dir: PathBuf,
}

impl FileDraftStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

impl DraftStore for FileDraftStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let io_err = |e| StoreError::Io {
            key: key.to_string(),
            source: e,
        };
        fs::create_dir_all(&self.dir).map_err(io_err)?;
        fs::write(self.path_for(key), value).map_err(io_err)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io {
                key: key.to_string(),
                source: e,
            }),
        }
    }
}
