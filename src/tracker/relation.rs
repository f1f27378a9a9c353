/// 锚点与终端之间的关系（最近一次观测）

use serde::Serialize;

/// 关系标识，由关系索引分配，在关系存活期间不变
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RelationId(pub(crate) u64);

impl RelationId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// 锚点 ↔ 终端 的最近一次观测
///
/// 同一 (锚点, 终端) 对最多只有一个关系；新观测原地覆盖旧值，不保留历史。
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Relation {
    pub id: RelationId,
    /// 锚点名称
    pub anchor_name: String,
    /// 终端 MAC 地址
    pub device_addr: String,
    /// RSSI (dBm)，-100..=0
    pub rssi: i16,
    /// 最后一次观测的时间戳（毫秒）
    pub timestamp_ms: i64,
}

impl Relation {
    /// 观测是否仍在时间窗口内（`timestamp >= now - window`）
    pub fn is_fresh(&self, now_ms: i64, stale_after_ms: i64) -> bool {
        self.timestamp_ms >= now_ms.saturating_sub(stale_after_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation(timestamp_ms: i64) -> Relation {
        Relation {
            id: RelationId(1),
            anchor_name: "A1".to_string(),
            device_addr: "AA:BB:CC:DD:EE:FF".to_string(),
            rssi: -40,
            timestamp_ms,
        }
    }

    #[test]
    fn test_freshness_boundary() {
        let now = 20_000;
        assert!(relation(10_000).is_fresh(now, 10_000));
        assert!(!relation(9_999).is_fresh(now, 10_000));
        assert!(relation(19_000).is_fresh(now, 10_000));
    }
}
