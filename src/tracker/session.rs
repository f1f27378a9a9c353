/// 定位会话
///
/// 把锚点集合、终端表、关系索引和位置估计器组合在一起。每个公开的修改
/// 操作都是一个完整的原子步骤：先更新关系，再重新估计受影响终端的位置，
/// 最后才通知观察者，观察者永远看不到只完成一半的状态。

use crate::error::{Result, TrackerError};
use crate::tracker::{
    Anchor, AnchorReport, AnchorSet, DevicePosition, DropReason, EndPoint, Estimate,
    Observation, PositionEstimator, Relation, RelationIndex,
};
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

// ============================================================================
// 时钟
// ============================================================================

/// 时间来源
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn now_ms(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// 系统时钟
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动时钟，克隆之间共享同一时间
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        ManualClock {
            millis: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.now_ms()).unwrap_or_default()
    }

    fn now_ms(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

// ============================================================================
// 观察者
// ============================================================================

/// 会话事件，在每个原子步骤完成后发出
#[derive(Clone, Debug, PartialEq)]
pub enum TrackerEvent {
    PositionChanged(DevicePosition),
    AnchorAdded(Anchor),
    AnchorMoved(Anchor),
    AnchorRemoved(String),
    EndPointsCleared,
}

/// 观察者注册标识
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

pub type Observer = Box<dyn FnMut(&TrackerEvent) + Send>;

/// 单条观测的接入结果
#[derive(Clone, Debug, PartialEq)]
pub enum IngestOutcome {
    Accepted(DevicePosition),
    Dropped(DropReason),
}

impl IngestOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, IngestOutcome::Accepted(_))
    }
}

// ============================================================================
// 会话
// ============================================================================

pub struct Tracker {
    anchors: AnchorSet,
    end_points: HashMap<String, EndPoint>,
    index: RelationIndex,
    estimator: PositionEstimator,
    clock: Box<dyn Clock>,
    observers: Vec<(ObserverId, Observer)>,
    next_observer: u64,
}

impl Tracker {
    pub fn new(estimator: PositionEstimator, clock: impl Clock + 'static) -> Self {
        Tracker {
            anchors: AnchorSet::new(),
            end_points: HashMap::new(),
            index: RelationIndex::new(),
            estimator,
            clock: Box::new(clock),
            observers: Vec::new(),
            next_observer: 0,
        }
    }

    /// 默认时效窗口 + 系统时钟
    pub fn with_defaults() -> Self {
        Self::new(PositionEstimator::default(), SystemClock)
    }

    // ------------------------------------------------------------------------
    // 锚点生命周期
    // ------------------------------------------------------------------------

    pub fn add_anchor(&mut self, name: &str, x: f64, y: f64) -> Result<()> {
        self.insert_anchor(Anchor::new(name, x, y))
    }

    fn insert_anchor(&mut self, anchor: Anchor) -> Result<()> {
        if !self.anchors.insert(anchor.clone()) {
            return Err(TrackerError::DuplicateAnchor(anchor.name));
        }
        info!("锚点已添加: {} ({:.1}, {:.1})", anchor.name, anchor.x, anchor.y);
        self.notify(&[TrackerEvent::AnchorAdded(anchor)]);
        Ok(())
    }

    /// 删除锚点及其全部关系，并重新估计受影响的终端
    pub fn remove_anchor(&mut self, name: &str) -> Result<Vec<String>> {
        if self.anchors.remove(name).is_none() {
            return Err(TrackerError::UnknownAnchor(name.to_string()));
        }
        let affected = self.index.remove_anchor(name);
        info!("锚点已删除: {}，影响 {} 个终端", name, affected.len());

        let mut events = vec![TrackerEvent::AnchorRemoved(name.to_string())];
        events.extend(self.reestimate_all(&affected));
        self.notify(&events);
        Ok(affected)
    }

    /// 移动锚点，所有与其相关的终端都会重新估计
    pub fn set_anchor_position(&mut self, name: &str, x: f64, y: f64) -> Result<()> {
        if !self.anchors.set_position(name, x, y) {
            return Err(TrackerError::UnknownAnchor(name.to_string()));
        }
        info!("锚点已移动: {} -> ({:.1}, {:.1})", name, x, y);

        let affected = self.index.devices_for_anchor(name);
        let mut events = Vec::with_capacity(affected.len() + 1);
        if let Some(anchor) = self.anchors.get(name) {
            events.push(TrackerEvent::AnchorMoved(anchor.clone()));
        }
        events.extend(self.reestimate_all(&affected));
        self.notify(&events);
        Ok(())
    }

    pub fn set_anchor_listening(&mut self, name: &str, listening: bool) -> Result<()> {
        let anchor = self
            .anchors
            .get_mut(name)
            .ok_or_else(|| TrackerError::UnknownAnchor(name.to_string()))?;
        anchor.listening = listening;
        Ok(())
    }

    pub fn anchor(&self, name: &str) -> Option<&Anchor> {
        self.anchors.get(name)
    }

    pub fn anchors(&self) -> Vec<Anchor> {
        self.anchors.all_cloned()
    }

    // ------------------------------------------------------------------------
    // 观测接入
    // ------------------------------------------------------------------------

    /// 接入一条观测：校验 -> upsert -> 重新估计 -> 通知
    ///
    /// 无效观测被静默丢弃（只记录 debug 日志），不会返回错误。
    pub fn ingest(&mut self, observation: &Observation) -> IngestOutcome {
        let (addr, rssi) = match observation.validate() {
            Ok(valid) => valid,
            Err(reason) => return self.drop_observation(observation, reason),
        };
        if !self.anchors.contains(&observation.anchor_name) {
            return self.drop_observation(observation, DropReason::UnknownAnchor);
        }

        self.index
            .upsert(&observation.anchor_name, &addr, rssi, observation.timestamp_ms);
        let (estimate, at) = self.compute_estimate(&addr);

        let end_point = self.end_points.entry(addr.clone()).or_insert_with(|| {
            info!("发现新终端: {}", addr);
            EndPoint::new(addr.clone())
        });
        end_point.apply(&estimate, at);
        let position = DevicePosition::from_end_point(end_point);

        self.notify(&[TrackerEvent::PositionChanged(position.clone())]);
        IngestOutcome::Accepted(position)
    }

    /// 解码锚点负载并逐条接入，时间戳取当前时钟
    ///
    /// 负载不是合法 JSON 报告时返回错误；单个条目有问题只丢弃该条目。
    pub fn ingest_report(&mut self, anchor_name: &str, payload: &[u8]) -> Result<Vec<IngestOutcome>> {
        let report = AnchorReport::from_bytes(payload)?;
        let timestamp_ms = self.clock.now_ms();
        Ok(report
            .into_observations(anchor_name, timestamp_ms)
            .into_iter()
            .map(|entry| match entry {
                Ok(observation) => self.ingest(&observation),
                Err(reason) => {
                    debug!("丢弃锚点 {} 的上报条目: {}", anchor_name, reason);
                    IngestOutcome::Dropped(reason)
                }
            })
            .collect())
    }

    fn drop_observation(&self, observation: &Observation, reason: DropReason) -> IngestOutcome {
        debug!(
            "丢弃观测 {} -> {} ({} dBm): {}",
            observation.anchor_name, observation.device_addr, observation.rssi, reason
        );
        IngestOutcome::Dropped(reason)
    }

    // ------------------------------------------------------------------------
    // 终端
    // ------------------------------------------------------------------------

    pub fn position(&self, device_addr: &str) -> Option<DevicePosition> {
        self.end_points
            .get(device_addr)
            .map(DevicePosition::from_end_point)
    }

    /// 所有终端位置（按地址排序）
    pub fn positions(&self) -> Vec<DevicePosition> {
        let mut positions: Vec<DevicePosition> = self
            .end_points
            .values()
            .map(DevicePosition::from_end_point)
            .collect();
        positions.sort_by(|a, b| a.device_addr.cmp(&b.device_addr));
        positions
    }

    /// 切换终端在地图上的可见性，终端不存在时返回 false
    pub fn set_device_enabled(&mut self, device_addr: &str, enabled: bool) -> bool {
        let Some(end_point) = self.end_points.get_mut(device_addr) else {
            return false;
        };
        end_point.enabled = enabled;
        let position = DevicePosition::from_end_point(end_point);
        self.notify(&[TrackerEvent::PositionChanged(position)]);
        true
    }

    /// 清空所有终端及其关系，锚点保留
    pub fn clear_end_points(&mut self) {
        info!("清空 {} 个终端", self.end_points.len());
        self.end_points.clear();
        self.index.clear();
        self.notify(&[TrackerEvent::EndPointsCleared]);
    }

    /// 终端的全部关系（不做时效过滤）
    pub fn relations_for_device(&self, device_addr: &str) -> HashMap<String, Relation> {
        self.index.relations_for_device(device_addr)
    }

    pub fn index(&self) -> &RelationIndex {
        &self.index
    }

    pub fn estimator(&self) -> &PositionEstimator {
        &self.estimator
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    // ------------------------------------------------------------------------
    // 观察者
    // ------------------------------------------------------------------------

    pub fn subscribe<F>(&mut self, observer: F) -> ObserverId
    where
        F: FnMut(&TrackerEvent) + Send + 'static,
    {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer_id, _)| *observer_id != id);
        self.observers.len() != before
    }

    fn notify(&mut self, events: &[TrackerEvent]) {
        for (_, observer) in self.observers.iter_mut() {
            for event in events {
                observer(event);
            }
        }
    }

    // ------------------------------------------------------------------------
    // 重新估计
    // ------------------------------------------------------------------------

    fn compute_estimate(&self, device_addr: &str) -> (Estimate, DateTime<Utc>) {
        let anchors = &self.anchors;
        let estimate = self.estimator.estimate(
            device_addr,
            &self.index,
            |name| anchors.position_of(name),
            self.clock.now_ms(),
        );
        debug!("重新估计 {}: {:?}", device_addr, estimate);
        (estimate, self.clock.now())
    }

    fn reestimate(&mut self, device_addr: &str) -> Option<DevicePosition> {
        let (estimate, at) = self.compute_estimate(device_addr);
        let end_point = self.end_points.get_mut(device_addr)?;
        end_point.apply(&estimate, at);
        Some(DevicePosition::from_end_point(end_point))
    }

    fn reestimate_all(&mut self, device_addrs: &[String]) -> Vec<TrackerEvent> {
        device_addrs
            .iter()
            .filter_map(|addr| self.reestimate(addr))
            .map(TrackerEvent::PositionChanged)
            .collect()
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::with_defaults()
    }
}
