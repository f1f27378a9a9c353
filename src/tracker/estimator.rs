/// 位置估计
///
/// 使用 RSSI 加权质心：每个锚点的权重 w = rssi + 100（-100..0 映射到 0..100），
/// 估计位置 = Σ (w_i / Σw) * 锚点坐标_i。
///
/// 注意：这是信号强度加权质心，并非基于距离的真实三边定位。没有路径损耗
/// 模型，估计值只在方向上合理（信号越强的锚点越把位置拉向自己），在度量上
/// 并不准确。

use crate::tracker::RelationIndex;

/// 默认的时效窗口（毫秒）
pub const DEFAULT_STALE_AFTER_MS: i64 = 10_000;

/// RSSI 有效下界，对应权重 0
pub const RSSI_FLOOR: i16 = -100;

/// 单个参与加权的样本
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeightedSample {
    pub rssi: i16,
    pub x: f64,
    pub y: f64,
}

impl WeightedSample {
    pub fn new(rssi: i16, x: f64, y: f64) -> Self {
        WeightedSample { rssi, x, y }
    }

    /// 权重 = rssi + 100，超出量程时截断到 0
    pub fn weight(&self) -> f64 {
        (f64::from(self.rssi) - f64::from(RSSI_FLOOR)).max(0.0)
    }
}

/// 估计结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Estimate {
    /// 已知位置，`anchors` 为参与计算的锚点数
    Known { x: f64, y: f64, anchors: usize },
    /// 无有效关系，或所有权重为 0
    Unknown,
}

impl Estimate {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Estimate::Unknown)
    }

    pub fn xy(&self) -> Option<(f64, f64)> {
        match *self {
            Estimate::Known { x, y, .. } => Some((x, y)),
            Estimate::Unknown => None,
        }
    }
}

/// 加权质心，权重之和为 0 时返回 None
pub fn weighted_centroid(samples: &[WeightedSample]) -> Option<(f64, f64)> {
    let total_weight: f64 = samples.iter().map(WeightedSample::weight).sum();
    if total_weight <= 0.0 {
        return None;
    }

    let x = samples
        .iter()
        .map(|s| s.x * s.weight() / total_weight)
        .sum::<f64>();
    let y = samples
        .iter()
        .map(|s| s.y * s.weight() / total_weight)
        .sum::<f64>();

    Some((x, y))
}

/// 位置估计器
#[derive(Clone, Copy, Debug)]
pub struct PositionEstimator {
    /// 早于 `now - stale_after_ms` 的关系不参与计算
    pub stale_after_ms: i64,
}

impl PositionEstimator {
    pub fn new(stale_after_ms: i64) -> Self {
        PositionEstimator { stale_after_ms }
    }

    /// 估计终端位置
    ///
    /// # 参数
    /// - `device_addr`: 终端地址
    /// - `index`: 关系索引
    /// - `anchor_position`: 按锚点名称查询坐标，查不到的锚点被忽略
    /// - `now_ms`: 当前时间（毫秒）
    pub fn estimate<F>(
        &self,
        device_addr: &str,
        index: &RelationIndex,
        anchor_position: F,
        now_ms: i64,
    ) -> Estimate
    where
        F: Fn(&str) -> Option<(f64, f64)>,
    {
        let samples: Vec<WeightedSample> = index
            .relations_for_device(device_addr)
            .into_values()
            .filter(|relation| relation.is_fresh(now_ms, self.stale_after_ms))
            .filter_map(|relation| {
                anchor_position(&relation.anchor_name)
                    .map(|(x, y)| WeightedSample::new(relation.rssi, x, y))
            })
            .collect();

        match weighted_centroid(&samples) {
            Some((x, y)) => Estimate::Known {
                x,
                y,
                anchors: samples.len(),
            },
            None => Estimate::Unknown,
        }
    }
}

impl Default for PositionEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const DEV: &str = "AA:BB:CC:DD:EE:FF";

    fn anchors() -> HashMap<String, (f64, f64)> {
        HashMap::from([
            ("A1".to_string(), (500.0, 100.0)),
            ("A2".to_string(), (100.0, 900.0)),
            ("A3".to_string(), (900.0, 900.0)),
        ])
    }

    #[test]
    fn test_weight_mapping() {
        assert_eq!(WeightedSample::new(-100, 0.0, 0.0).weight(), 0.0);
        assert_eq!(WeightedSample::new(-26, 0.0, 0.0).weight(), 74.0);
        assert_eq!(WeightedSample::new(0, 0.0, 0.0).weight(), 100.0);
    }

    #[test]
    fn test_no_relations_is_unknown() {
        let index = RelationIndex::new();
        let positions = anchors();
        let estimate = PositionEstimator::default().estimate(
            DEV,
            &index,
            |name| positions.get(name).copied(),
            0,
        );
        assert!(estimate.is_unknown());
    }

    #[test]
    fn test_single_relation_equals_anchor() {
        let mut index = RelationIndex::new();
        index.upsert("A2", DEV, -63, 1_000);
        let positions = anchors();
        let estimate = PositionEstimator::default().estimate(
            DEV,
            &index,
            |name| positions.get(name).copied(),
            1_000,
        );
        assert_eq!(estimate.xy(), Some((100.0, 900.0)));
    }

    #[test]
    fn test_three_anchor_centroid() {
        let mut index = RelationIndex::new();
        index.upsert("A1", DEV, -26, 1_000);
        index.upsert("A2", DEV, -54, 1_000);
        index.upsert("A3", DEV, -87, 1_000);
        let positions = anchors();

        let estimate = PositionEstimator::default().estimate(
            DEV,
            &index,
            |name| positions.get(name).copied(),
            2_000,
        );
        let (x, y) = estimate.xy().unwrap();
        // (500*74 + 100*46 + 900*13) / 133, (100*74 + 900*46 + 900*13) / 133
        assert!((x - 53_300.0 / 133.0).abs() < 1e-9);
        assert!((y - 60_500.0 / 133.0).abs() < 1e-9);
        assert!(matches!(estimate, Estimate::Known { anchors: 3, .. }));
    }

    #[test]
    fn test_all_zero_weight_is_unknown() {
        let mut index = RelationIndex::new();
        index.upsert("A1", DEV, -100, 1_000);
        index.upsert("A2", DEV, -100, 1_000);
        let positions = anchors();
        let estimate = PositionEstimator::default().estimate(
            DEV,
            &index,
            |name| positions.get(name).copied(),
            1_000,
        );
        assert_eq!(estimate, Estimate::Unknown);
    }

    #[test]
    fn test_stale_relation_is_excluded() {
        let mut index = RelationIndex::new();
        let now = 100_000;
        index.upsert("A1", DEV, -30, now - 15_000);
        index.upsert("A3", DEV, -60, now - 1_000);
        let positions = anchors();

        let estimate = PositionEstimator::new(10_000).estimate(
            DEV,
            &index,
            |name| positions.get(name).copied(),
            now,
        );
        assert_eq!(estimate.xy(), Some((900.0, 900.0)));
        // 过期关系仍在索引中
        assert!(index.relations_for_device(DEV).contains_key("A1"));
    }

    #[test]
    fn test_unresolvable_anchor_is_ignored() {
        let mut index = RelationIndex::new();
        index.upsert("ghost", DEV, -10, 0);
        let positions = anchors();
        let estimate = PositionEstimator::default().estimate(
            DEV,
            &index,
            |name| positions.get(name).copied(),
            0,
        );
        assert!(estimate.is_unknown());
    }
}
