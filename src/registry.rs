// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 摄像头注册表 - 按流名保存视频源与计数参数 (JSON)

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::CountingSettings;
use crate::detection::LineDirection;

/// 单个摄像头
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraEntry {
    /// 文件路径 / 摄像头索引 / 网络地址
    pub source: String,
    pub line_position: f32,
    pub direction: LineDirection,
    pub threshold: u64,
}

impl CameraEntry {
    pub fn with_counting(source: impl Into<String>, counting: &CountingSettings) -> Self {
        Self {
            source: source.into(),
            line_position: counting.line_position,
            direction: counting.direction,
            threshold: counting.threshold,
        }
    }

    pub fn counting(&self) -> CountingSettings {
        CountingSettings {
            line_position: self.line_position,
            direction: self.direction,
            threshold: self.threshold,
        }
    }
}

/// 流名 → 摄像头
#[derive(Clone, Debug, Default)]
pub struct CameraRegistry {
    path: Option<PathBuf>,
    cameras: BTreeMap<String, CameraEntry>,
}

impl CameraRegistry {
    /// 读取注册表, 文件不存在时为空表
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let cameras = match fs::read_to_string(path) {
            Ok(json) => serde_json::from_str(&json)
                .with_context(|| format!("parse camera registry {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        info!("📋 摄像头注册表: {} 个条目 ({})", cameras.len(), path.display());
        Ok(Self {
            path: Some(path.to_path_buf()),
            cameras,
        })
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.cameras)?;
        fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&CameraEntry> {
        self.cameras.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: CameraEntry) {
        self.cameras.insert(key.into(), entry);
    }

    pub fn remove(&mut self, key: &str) -> Option<CameraEntry> {
        self.cameras.remove(key)
    }

    /// 按流名排序遍历
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CameraEntry)> {
        self.cameras.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    /// 查找流名; 未注册时用模板生成地址, 计数参数取默认
    pub fn resolve(&self, key: &str, template: &str, defaults: &CountingSettings) -> CameraEntry {
        match self.cameras.get(key) {
            Some(entry) => entry.clone(),
            None => {
                let source = template.replace("{key}", key);
                debug!("📋 {} 未注册, 使用模板地址 {}", key, source);
                CameraEntry::with_counting(source, defaults)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "rtmp://localhost:1935/live/{key}";

    #[test]
    fn unknown_key_uses_template() {
        let registry = CameraRegistry::default();
        let entry = registry.resolve("cam7", TEMPLATE, &CountingSettings::default());
        assert_eq!(entry.source, "rtmp://localhost:1935/live/cam7");
        assert_eq!(entry.threshold, 30);
    }

    #[test]
    fn saved_entries_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cameras.json");

        let mut registry = CameraRegistry::load(&path).unwrap();
        assert!(registry.is_empty());
        registry.insert(
            "gate-a",
            CameraEntry {
                source: "clips/gate.mp4".into(),
                line_position: 220.0,
                direction: LineDirection::Up,
                threshold: 12,
            },
        );
        registry.save().unwrap();

        let mut reloaded = CameraRegistry::load(&path).unwrap();
        let entry = reloaded.resolve("gate-a", TEMPLATE, &CountingSettings::default());
        assert_eq!(entry.direction, LineDirection::Up);
        assert_eq!(entry.counting().line_position, 220.0);

        assert!(reloaded.remove("gate-a").is_some());
        reloaded.save().unwrap();
        assert!(CameraRegistry::load(&path).unwrap().get("gate-a").is_none());
    }

    #[test]
    fn iteration_is_sorted_by_key() {
        let mut registry = CameraRegistry::default();
        let counting = CountingSettings::default();
        registry.insert("north", CameraEntry::with_counting("0", &counting));
        registry.insert("east", CameraEntry::with_counting("clips/e.mp4", &counting));
        let keys: Vec<&str> = registry.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["east", "north"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn malformed_registry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cameras.json");
        fs::write(&path, "[1, 2").unwrap();
        assert!(CameraRegistry::load(&path).is_err());
    }
}
