use crate::error::{Result, TrackerError};
use crate::tracker::{DEFAULT_ANCHOR_POSITION, DEFAULT_STALE_AFTER_MS};
use log::info;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 预先摆放的锚点
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnchorPlacement {
    pub name: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// 关系时效窗口（毫秒）
    pub stale_after_ms: i64,
    /// 命令行输出位置的周期（毫秒）
    pub report_interval_ms: u64,
    /// 承载锚点上报数据的特征值 UUID
    pub characteristic_uuid: String,
    /// 按本地名称筛选锚点外设的正则
    pub anchor_name_pattern: String,
    /// 发现锚点时的扫描时长（秒）
    pub scan_secs: u64,
    pub anchors: Vec<AnchorPlacement>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
            report_interval_ms: 1000,
            characteristic_uuid: "6e400003-b5a3-f393-e0a9-e50e24dcca9e".to_string(),
            anchor_name_pattern: "^AP".to_string(),
            scan_secs: 5,
            anchors: Vec::new(),
        }
    }
}

impl TrackerConfig {
    /// 读取并校验配置文件
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: TrackerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stale_after_ms <= 0 {
            return Err(TrackerError::InvalidConfig(
                "stale_after_ms must be positive".to_string(),
            ));
        }
        Regex::new(&self.anchor_name_pattern).map_err(|e| {
            TrackerError::InvalidConfig(format!("invalid anchor_name_pattern: {e}"))
        })?;

        let mut seen = HashSet::new();
        for anchor in &self.anchors {
            if anchor.name.trim().is_empty() {
                return Err(TrackerError::InvalidConfig("empty anchor name".to_string()));
            }
            if !seen.insert(anchor.name.as_str()) {
                return Err(TrackerError::InvalidConfig(format!(
                    "anchor '{}' listed twice",
                    anchor.name
                )));
            }
            if !anchor.x.is_finite() || !anchor.y.is_finite() {
                return Err(TrackerError::InvalidConfig(format!(
                    "anchor '{}' has non-finite coordinates",
                    anchor.name
                )));
            }
        }
        Ok(())
    }

    /// 锚点坐标：配置中有则用配置，否则用默认位置
    pub fn placement_for(&self, name: &str) -> (f64, f64) {
        self.anchors
            .iter()
            .find(|a| a.name == name)
            .map(|a| (a.x, a.y))
            .unwrap_or(DEFAULT_ANCHOR_POSITION)
    }

    pub fn anchor_pattern(&self) -> Result<Regex> {
        Regex::new(&self.anchor_name_pattern)
            .map_err(|e| TrackerError::InvalidConfig(format!("invalid anchor_name_pattern: {e}")))
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_secs)
    }
}
