/// 锚点特征值监听
///
/// 订阅特征值通知是平台相关的能力，核心只依赖 `CharacteristicSource`
/// 这个接口。监听回调不直接修改会话，只把原始负载交给投递函数（通常是
/// 写入通道），由服务中唯一的接入任务逐条处理。

use crate::error::{Result, TrackerError};
use log::{info, warn};
use std::sync::Arc;

/// 订阅句柄
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// 收到数据时的回调
pub type DataCallback = Box<dyn Fn(Vec<u8>) + Send + Sync>;

/// 平台提供的特征值订阅能力
pub trait CharacteristicSource: Send + Sync {
    fn subscribe(&self, on_data: DataCallback) -> Result<SubscriptionHandle>;

    fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()>;
}

/// 某锚点收到的一条原始负载
#[derive(Clone, Debug, PartialEq)]
pub struct RawReport {
    pub anchor_name: String,
    pub payload: Vec<u8>,
}

/// 单个锚点的监听器
pub struct AnchorListener {
    anchor_name: String,
    source: Arc<dyn CharacteristicSource>,
    handle: Option<SubscriptionHandle>,
}

impl AnchorListener {
    pub fn new(anchor_name: impl Into<String>, source: Arc<dyn CharacteristicSource>) -> Self {
        AnchorListener {
            anchor_name: anchor_name.into(),
            source,
            handle: None,
        }
    }

    pub fn anchor_name(&self) -> &str {
        &self.anchor_name
    }

    pub fn is_listening(&self) -> bool {
        self.handle.is_some()
    }

    /// 开始监听，每条负载交给 `deliver`，返回 false 表示下游已关闭；
    /// 已在监听时不做任何事
    pub fn start<F>(&mut self, deliver: F) -> Result<()>
    where
        F: Fn(RawReport) -> bool + Send + Sync + 'static,
    {
        if self.handle.is_some() {
            return Ok(());
        }

        let anchor_name = self.anchor_name.clone();
        let callback: DataCallback = Box::new(move |payload| {
            let report = RawReport {
                anchor_name: anchor_name.clone(),
                payload,
            };
            if !deliver(report) {
                warn!("接入通道已关闭，丢弃来自 {} 的数据", anchor_name);
            }
        });

        let handle = self.source.subscribe(callback)?;
        self.handle = Some(handle);
        info!("开始监听锚点 {}", self.anchor_name);
        Ok(())
    }

    /// 停止监听
    pub fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.source.unsubscribe(handle)?;
        info!("停止监听锚点 {}", self.anchor_name);
        Ok(())
    }
}

impl Drop for AnchorListener {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.source.unsubscribe(handle) {
                warn!("锚点 {} 取消订阅失败: {}", self.anchor_name, e);
            }
        }
    }
}

// ============================================================================
// 内存数据源（测试与回放）
// ============================================================================

/// 进程内的特征值数据源，通过 `push` 手动注入负载
#[derive(Default)]
pub struct MemorySource {
    subscribers: std::sync::Mutex<Vec<(SubscriptionHandle, Arc<DataCallback>)>>,
    next_handle: std::sync::atomic::AtomicU64,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 把负载推送给所有订阅者，返回收到负载的订阅者数量
    pub fn push(&self, payload: &[u8]) -> usize {
        let subscribers: Vec<Arc<DataCallback>> = match self.subscribers.lock() {
            Ok(guard) => guard.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            Err(_) => return 0,
        };
        for callback in &subscribers {
            callback(payload.to_vec());
        }
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|guard| guard.len()).unwrap_or(0)
    }
}

impl CharacteristicSource for MemorySource {
    fn subscribe(&self, on_data: DataCallback) -> Result<SubscriptionHandle> {
        let id = self
            .next_handle
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let handle = SubscriptionHandle(id);
        if let Ok(mut guard) = self.subscribers.lock() {
            guard.push((handle, Arc::new(on_data)));
        }
        Ok(handle)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        let mut guard = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = guard.len();
        guard.retain(|(h, _)| *h != handle);
        if guard.len() == before {
            return Err(TrackerError::UnknownSubscription(handle.0));
        }
        Ok(())
    }
}
