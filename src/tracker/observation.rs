/// 观测数据与接入校验
///
/// 锚点通过特征值通知上报 JSON：
/// `{ "devices": [ { "addr": "AA:BB:CC:DD:EE:FF", "rssi": -40 }, ... ] }`
/// 每个条目对应一条观测。地址格式错误或 RSSI 超出量程的观测被视为传感器
/// 噪声，静默丢弃。

use crate::error::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

/// RSSI 有效范围
pub const RSSI_MIN: i16 = -100;
pub const RSSI_MAX: i16 = 0;

/// 冒号分隔的 MAC 地址长度
pub const MAC_ADDR_LEN: usize = 17;

fn mac_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[0-9A-Fa-f]{2}(:[0-9A-Fa-f]{2}){5}$").expect("MAC pattern is valid")
    })
}

/// 校验并规范化 MAC 地址（六组冒号分隔的十六进制，统一大写）
pub fn normalize_addr(addr: &str) -> Option<String> {
    if addr.len() != MAC_ADDR_LEN || !mac_pattern().is_match(addr) {
        return None;
    }
    Some(addr.to_ascii_uppercase())
}

/// 观测被丢弃的原因
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    MalformedAddress,
    RssiOutOfRange,
    UnknownAnchor,
    /// 条目缺少字段或字段类型不对
    MalformedEntry,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DropReason::MalformedAddress => "malformed address",
            DropReason::RssiOutOfRange => "rssi out of range",
            DropReason::UnknownAnchor => "unknown anchor",
            DropReason::MalformedEntry => "malformed entry",
        };
        f.write_str(text)
    }
}

/// 单条观测：某锚点在某时刻看到某终端
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub anchor_name: String,
    pub device_addr: String,
    /// RSSI 可能来自未经校验的负载，用 i32 承载后再判断范围
    pub rssi: i32,
    pub timestamp_ms: i64,
}

impl Observation {
    pub fn new(
        anchor_name: impl Into<String>,
        device_addr: impl Into<String>,
        rssi: i32,
        timestamp_ms: i64,
    ) -> Self {
        Observation {
            anchor_name: anchor_name.into(),
            device_addr: device_addr.into(),
            rssi,
            timestamp_ms,
        }
    }

    /// 接入校验：返回 (规范化地址, rssi)，或丢弃原因
    pub fn validate(&self) -> std::result::Result<(String, i16), DropReason> {
        let addr = normalize_addr(&self.device_addr).ok_or(DropReason::MalformedAddress)?;
        if self.rssi < i32::from(RSSI_MIN) || self.rssi > i32::from(RSSI_MAX) {
            return Err(DropReason::RssiOutOfRange);
        }
        // 范围已检查，转换不会截断
        Ok((addr, self.rssi as i16))
    }
}

/// 锚点一次通知的完整负载
///
/// 条目按原样保留为 JSON 值，逐条转换：单个条目类型不对只会丢弃该条目，
/// 不影响同一负载中的其他条目。
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct AnchorReport {
    #[serde(default)]
    pub devices: Vec<Value>,
}

impl AnchorReport {
    /// 从特征值字节解码，只有负载本身不是合法 JSON 报告时才返回错误
    pub fn from_bytes(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// 逐条转换为观测，无法转换的条目给出丢弃原因
    pub fn into_observations(
        self,
        anchor_name: &str,
        timestamp_ms: i64,
    ) -> Vec<std::result::Result<Observation, DropReason>> {
        self.devices
            .iter()
            .map(|entry| entry_to_observation(entry, anchor_name, timestamp_ms))
            .collect()
    }
}

fn entry_to_observation(
    entry: &Value,
    anchor_name: &str,
    timestamp_ms: i64,
) -> std::result::Result<Observation, DropReason> {
    let addr = entry
        .get("addr")
        .and_then(Value::as_str)
        .ok_or(DropReason::MalformedEntry)?;
    let rssi = entry
        .get("rssi")
        .and_then(Value::as_i64)
        .ok_or(DropReason::MalformedEntry)?;
    let rssi = i32::try_from(rssi).map_err(|_| DropReason::RssiOutOfRange)?;
    Ok(Observation::new(anchor_name, addr, rssi, timestamp_ms))
}
