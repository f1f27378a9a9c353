/// 关系索引
///
/// 维护 “锚点 ↔ 终端 ↔ 最近观测” 的多对多关系，提供两个视图：
/// - 终端 -> {锚点 -> 关系}：位置估计时读取
/// - 锚点 -> {终端 -> 关系}：删除锚点、移动锚点时使用
///
/// 关系实例只存一份，两个视图都只保存 `RelationId`，因此同一对
/// (锚点, 终端) 在两个视图中必然指向同一个关系。

use crate::tracker::{Relation, RelationId};
use std::collections::HashMap;

/// upsert 的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upsert {
    /// 新建了关系
    Inserted(RelationId),
    /// 原地更新了已有关系
    Updated(RelationId),
}

impl Upsert {
    pub fn id(self) -> RelationId {
        match self {
            Upsert::Inserted(id) | Upsert::Updated(id) => id,
        }
    }
}

#[derive(Debug, Default)]
pub struct RelationIndex {
    relations: HashMap<RelationId, Relation>,
    /// 终端地址 -> 锚点名称 -> 关系
    by_device: HashMap<String, HashMap<String, RelationId>>,
    /// 锚点名称 -> 终端地址 -> 关系
    by_anchor: HashMap<String, HashMap<String, RelationId>>,
    next_id: u64,
}

impl RelationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或更新关系（最后写入者胜出）
    ///
    /// 已存在时原地修改 rssi 与时间戳，关系标识保持不变；
    /// 否则新建关系并同时写入两个视图。
    pub fn upsert(
        &mut self,
        anchor_name: &str,
        device_addr: &str,
        rssi: i16,
        timestamp_ms: i64,
    ) -> Upsert {
        let existing = self
            .by_device
            .get(device_addr)
            .and_then(|anchors| anchors.get(anchor_name))
            .copied();

        if let Some(id) = existing {
            if let Some(relation) = self.relations.get_mut(&id) {
                relation.rssi = rssi;
                relation.timestamp_ms = timestamp_ms;
            }
            return Upsert::Updated(id);
        }

        let id = RelationId(self.next_id);
        self.next_id += 1;

        self.relations.insert(
            id,
            Relation {
                id,
                anchor_name: anchor_name.to_string(),
                device_addr: device_addr.to_string(),
                rssi,
                timestamp_ms,
            },
        );
        self.by_device
            .entry(device_addr.to_string())
            .or_default()
            .insert(anchor_name.to_string(), id);
        self.by_anchor
            .entry(anchor_name.to_string())
            .or_default()
            .insert(device_addr.to_string(), id);

        Upsert::Inserted(id)
    }

    /// 获取单个关系
    pub fn get(&self, anchor_name: &str, device_addr: &str) -> Option<&Relation> {
        self.by_device
            .get(device_addr)
            .and_then(|anchors| anchors.get(anchor_name))
            .and_then(|id| self.relations.get(id))
    }

    /// 终端的全部关系快照：锚点名称 -> 关系
    ///
    /// 未知终端返回空映射；不做时效过滤。
    pub fn relations_for_device(&self, device_addr: &str) -> HashMap<String, Relation> {
        self.snapshot(self.by_device.get(device_addr))
    }

    /// 锚点的全部关系快照：终端地址 -> 关系
    pub fn relations_for_anchor(&self, anchor_name: &str) -> HashMap<String, Relation> {
        self.snapshot(self.by_anchor.get(anchor_name))
    }

    /// 与锚点有关系的终端地址（排序）
    pub fn devices_for_anchor(&self, anchor_name: &str) -> Vec<String> {
        let mut devices: Vec<String> = self
            .by_anchor
            .get(anchor_name)
            .map(|devices| devices.keys().cloned().collect())
            .unwrap_or_default();
        devices.sort();
        devices
    }

    /// 删除锚点的全部关系，返回受影响的终端地址（排序）
    pub fn remove_anchor(&mut self, anchor_name: &str) -> Vec<String> {
        let Some(devices) = self.by_anchor.remove(anchor_name) else {
            return Vec::new();
        };

        let mut affected = Vec::with_capacity(devices.len());
        for (device_addr, id) in devices {
            self.relations.remove(&id);
            if let Some(anchors) = self.by_device.get_mut(&device_addr) {
                anchors.remove(anchor_name);
                if anchors.is_empty() {
                    self.by_device.remove(&device_addr);
                }
            }
            affected.push(device_addr);
        }
        affected.sort();
        affected
    }

    /// 清空所有关系
    pub fn clear(&mut self) {
        self.relations.clear();
        self.by_device.clear();
        self.by_anchor.clear();
    }

    /// 关系总数
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// 两个视图是否与关系表完全一致（无孤立项）
    pub fn is_consistent(&self) -> bool {
        let device_entries: usize = self.by_device.values().map(HashMap::len).sum();
        let anchor_entries: usize = self.by_anchor.values().map(HashMap::len).sum();
        if device_entries != self.relations.len() || anchor_entries != self.relations.len() {
            return false;
        }
        if self.by_device.values().any(HashMap::is_empty)
            || self.by_anchor.values().any(HashMap::is_empty)
        {
            return false;
        }

        self.relations.iter().all(|(id, relation)| {
            let in_device_view = self
                .by_device
                .get(&relation.device_addr)
                .and_then(|anchors| anchors.get(&relation.anchor_name));
            let in_anchor_view = self
                .by_anchor
                .get(&relation.anchor_name)
                .and_then(|devices| devices.get(&relation.device_addr));
            relation.id == *id && in_device_view == Some(id) && in_anchor_view == Some(id)
        })
    }

    fn snapshot(&self, view: Option<&HashMap<String, RelationId>>) -> HashMap<String, Relation> {
        view.map(|entries| {
            entries
                .iter()
                .filter_map(|(key, id)| {
                    self.relations
                        .get(id)
                        .map(|relation| (key.clone(), relation.clone()))
                })
                .collect()
        })
        .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEV_A: &str = "AA:BB:CC:DD:EE:01";
    const DEV_B: &str = "AA:BB:CC:DD:EE:02";

    #[test]
    fn test_upsert_last_write_wins() {
        let mut index = RelationIndex::new();
        let first = index.upsert("A1", DEV_A, -40, 1_000);
        let second = index.upsert("A1", DEV_A, -70, 2_000);

        assert!(matches!(first, Upsert::Inserted(_)));
        assert_eq!(second, Upsert::Updated(first.id()));

        let relations = index.relations_for_device(DEV_A);
        assert_eq!(relations.len(), 1);
        assert_eq!(relations["A1"].rssi, -70);
        assert_eq!(relations["A1"].timestamp_ms, 2_000);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut index = RelationIndex::new();
        index.upsert("A1", DEV_A, -55, 5_000);
        let once = index.relations_for_device(DEV_A);
        index.upsert("A1", DEV_A, -55, 5_000);
        assert_eq!(index.relations_for_device(DEV_A), once);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_unknown_device_is_empty() {
        let index = RelationIndex::new();
        assert!(index.relations_for_device(DEV_A).is_empty());
        assert!(index.relations_for_anchor("A1").is_empty());
    }

    #[test]
    fn test_both_views_share_relation() {
        let mut index = RelationIndex::new();
        index.upsert("A1", DEV_A, -40, 1);
        index.upsert("A2", DEV_A, -50, 2);
        index.upsert("A1", DEV_B, -60, 3);

        let by_device = index.relations_for_device(DEV_A);
        let by_anchor = index.relations_for_anchor("A1");
        assert_eq!(by_device["A1"].id, by_anchor[DEV_A].id);
        assert_eq!(index.devices_for_anchor("A1"), vec![DEV_A, DEV_B]);
        assert!(index.is_consistent());
    }

    #[test]
    fn test_remove_anchor_leaves_no_orphans() {
        let mut index = RelationIndex::new();
        index.upsert("A1", DEV_A, -40, 1);
        index.upsert("A2", DEV_A, -50, 2);
        index.upsert("A1", DEV_B, -60, 3);

        let affected = index.remove_anchor("A1");
        assert_eq!(affected, vec![DEV_A, DEV_B]);
        assert!(!index.relations_for_device(DEV_A).contains_key("A1"));
        assert!(index.relations_for_device(DEV_B).is_empty());
        assert!(index.relations_for_anchor("A1").is_empty());
        assert_eq!(index.len(), 1);
        assert!(index.is_consistent());

        assert!(index.remove_anchor("A1").is_empty());
    }

    #[test]
    fn test_reinserted_pair_gets_new_identity() {
        let mut index = RelationIndex::new();
        let old = index.upsert("A1", DEV_A, -40, 1).id();
        index.remove_anchor("A1");
        let new = index.upsert("A1", DEV_A, -40, 1).id();
        assert_ne!(old, new);
    }
}
