/// 锚点（接入点）定义和锚点集合
///
/// 锚点以名称为唯一标识，在地图上拥有可移动的二维坐标。

use std::collections::HashMap;

/// 未指定坐标时锚点的默认位置
pub const DEFAULT_ANCHOR_POSITION: (f64, f64) = (10.0, 10.0);

/// 单个锚点
#[derive(Clone, Debug, PartialEq)]
pub struct Anchor {
    /// 锚点名称（唯一）
    pub name: String,
    /// 地图 X 坐标
    pub x: f64,
    /// 地图 Y 坐标
    pub y: f64,
    /// 是否正在监听特征值通知
    pub listening: bool,
}

impl Anchor {
    /// 创建新的锚点
    pub fn new(name: impl Into<String>, x: f64, y: f64) -> Self {
        Anchor {
            name: name.into(),
            x,
            y,
            listening: false,
        }
    }

    /// 获取锚点的 2D 坐标
    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

/// 锚点集合 - 名称 -> Anchor
#[derive(Clone, Debug, Default)]
pub struct AnchorSet {
    anchors: HashMap<String, Anchor>,
}

impl AnchorSet {
    /// 创建空的锚点集合
    pub fn new() -> Self {
        AnchorSet {
            anchors: HashMap::new(),
        }
    }

    /// 添加锚点，名称已存在时返回 false 且不做修改
    pub fn insert(&mut self, anchor: Anchor) -> bool {
        if self.anchors.contains_key(&anchor.name) {
            return false;
        }
        self.anchors.insert(anchor.name.clone(), anchor);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Anchor> {
        self.anchors.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Anchor> {
        self.anchors.get_mut(name)
    }

    /// 获取锚点坐标
    pub fn position_of(&self, name: &str) -> Option<(f64, f64)> {
        self.anchors.get(name).map(Anchor::position)
    }

    /// 移动锚点，返回是否存在该锚点
    pub fn set_position(&mut self, name: &str, x: f64, y: f64) -> bool {
        match self.anchors.get_mut(name) {
            Some(anchor) => {
                anchor.x = x;
                anchor.y = y;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Anchor> {
        self.anchors.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.anchors.contains_key(name)
    }

    /// 获取所有锚点的克隆（按名称排序）
    pub fn all_cloned(&self) -> Vec<Anchor> {
        let mut anchors: Vec<Anchor> = self.anchors.values().cloned().collect();
        anchors.sort_by(|a, b| a.name.cmp(&b.name));
        anchors
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}
