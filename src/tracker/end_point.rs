/// 终端（被定位的无线设备）

use crate::tracker::Estimate;
use chrono::{DateTime, Utc};

/// 单个终端
///
/// 位置有效性状态机：UNKNOWN → KNOWN（首个有效关系），KNOWN → UNKNOWN
/// （有效关系集合为空），KNOWN → KNOWN（刷新坐标）。变为 UNKNOWN 时保留
/// 最后一次已知坐标，供界面连续显示。
#[derive(Clone, Debug, PartialEq)]
pub struct EndPoint {
    /// MAC 地址（大写规范形式）
    pub addr: String,
    /// 是否在地图上显示
    pub enabled: bool,
    unknown_position: bool,
    x: f64,
    y: f64,
    updated_at: DateTime<Utc>,
}

impl EndPoint {
    /// 创建新终端：默认可见，位置未知，坐标 (0, 0)
    pub fn new(addr: impl Into<String>) -> Self {
        EndPoint {
            addr: addr.into(),
            enabled: true,
            unknown_position: true,
            x: 0.0,
            y: 0.0,
            updated_at: Utc::now(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.unknown_position
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    /// 最近一次应用估计结果的时间
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// 应用一次估计结果，返回状态或坐标是否发生变化
    pub fn apply(&mut self, estimate: &Estimate, at: DateTime<Utc>) -> bool {
        self.updated_at = at;
        match *estimate {
            Estimate::Known { x, y, .. } => {
                let changed = self.unknown_position || self.x != x || self.y != y;
                self.unknown_position = false;
                self.x = x;
                self.y = y;
                changed
            }
            Estimate::Unknown => {
                let changed = !self.unknown_position;
                self.unknown_position = true;
                changed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_end_point_is_unknown() {
        let ep = EndPoint::new("AA:BB:CC:DD:EE:FF");
        assert!(ep.is_unknown());
        assert!(ep.enabled);
        assert_eq!(ep.position(), (0.0, 0.0));
    }

    #[test]
    fn test_unknown_keeps_last_position() {
        let mut ep = EndPoint::new("AA:BB:CC:DD:EE:FF");
        assert!(ep.apply(&Estimate::Known { x: 12.0, y: 34.0, anchors: 1 }, Utc::now()));
        assert!(!ep.is_unknown());

        assert!(ep.apply(&Estimate::Unknown, Utc::now()));
        assert!(ep.is_unknown());
        assert_eq!(ep.position(), (12.0, 34.0));

        // UNKNOWN -> UNKNOWN 不算变化
        assert!(!ep.apply(&Estimate::Unknown, Utc::now()));
    }

    #[test]
    fn test_refresh_with_same_value_is_not_a_change() {
        let mut ep = EndPoint::new("AA:BB:CC:DD:EE:FF");
        ep.apply(&Estimate::Known { x: 1.0, y: 2.0, anchors: 2 }, Utc::now());
        assert!(!ep.apply(&Estimate::Known { x: 1.0, y: 2.0, anchors: 2 }, Utc::now()));
        assert!(ep.apply(&Estimate::Known { x: 1.5, y: 2.0, anchors: 2 }, Utc::now()));
    }
}
