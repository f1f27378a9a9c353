/// 输出给渲染层的终端位置

use crate::tracker::EndPoint;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// 单个终端的当前位置
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePosition {
    pub device_addr: String,
    pub x: f64,
    pub y: f64,
    pub unknown: bool,
    pub enabled: bool,
    /// 最近一次重新估计的时间
    pub updated_at: DateTime<Utc>,
}

impl DevicePosition {
    pub fn from_end_point(end_point: &EndPoint) -> Self {
        let (x, y) = end_point.position();
        DevicePosition {
            device_addr: end_point.addr.clone(),
            x,
            y,
            unknown: end_point.is_unknown(),
            enabled: end_point.enabled,
            updated_at: end_point.updated_at(),
        }
    }

    pub fn xy(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

impl fmt::Display for DevicePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unknown {
            write!(f, "{} 位置未知 (最后: {:.1}, {:.1})", self.device_addr, self.x, self.y)
        } else {
            write!(f, "{} ({:.1}, {:.1})", self.device_addr, self.x, self.y)
        }
    }
}
