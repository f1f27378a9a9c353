/// 追踪服务
///
/// 会话放在 `Arc<Mutex<Tracker>>` 中。所有锚点监听器把负载写入同一个通道，
/// 只有一个接入任务读取通道：每条负载在持锁期间完成“解码 -> upsert ->
/// 重新估计 -> 通知”，读者只会看到完整步骤之后的状态。

use crate::error::{Result, TrackerError};
use crate::listener::{AnchorListener, CharacteristicSource, RawReport};
use crate::tracker::{DevicePosition, ObserverId, Tracker, TrackerEvent};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};

/// 接入任务处理的消息
#[derive(Debug)]
enum IngestMessage {
    Report(RawReport),
    /// 之前的消息全部处理完后应答
    Flush(oneshot::Sender<()>),
}

pub struct TrackerService {
    tracker: Arc<Mutex<Tracker>>,
    tx: UnboundedSender<IngestMessage>,
    listeners: HashMap<String, AnchorListener>,
    ingest_task: JoinHandle<()>,
}

impl TrackerService {
    /// 启动服务，必须在 tokio 运行时中调用
    pub fn start(tracker: Tracker) -> Self {
        let tracker = Arc::new(Mutex::new(tracker));
        let (tx, rx) = mpsc::unbounded_channel();
        let ingest_task = tokio::spawn(ingest_loop(Arc::clone(&tracker), rx));

        TrackerService {
            tracker,
            tx,
            listeners: HashMap::new(),
            ingest_task,
        }
    }

    /// 共享的会话引用，供渲染层读取
    pub fn tracker(&self) -> Arc<Mutex<Tracker>> {
        Arc::clone(&self.tracker)
    }

    /// 添加锚点并开始监听其特征值
    pub async fn add_anchor(
        &mut self,
        name: &str,
        x: f64,
        y: f64,
        source: Arc<dyn CharacteristicSource>,
    ) -> Result<()> {
        if self.listeners.contains_key(name) {
            return Err(TrackerError::DuplicateAnchor(name.to_string()));
        }

        let mut tracker = self.tracker.lock().await;
        tracker.add_anchor(name, x, y)?;

        let mut listener = AnchorListener::new(name, source);
        let tx = self.tx.clone();
        if let Err(e) = listener.start(move |report| tx.send(IngestMessage::Report(report)).is_ok()) {
            warn!("锚点 {} 订阅失败: {}", name, e);
            tracker.remove_anchor(name)?;
            return Err(e);
        }
        tracker.set_anchor_listening(name, true)?;
        self.listeners.insert(name.to_string(), listener);
        Ok(())
    }

    /// 停止监听并删除锚点，返回受影响的终端
    ///
    /// 取消订阅失败只记录日志，锚点仍会从会话中删除。
    pub async fn remove_anchor(&mut self, name: &str) -> Result<Vec<String>> {
        if let Some(mut listener) = self.listeners.remove(name) {
            if let Err(e) = listener.stop() {
                warn!("锚点 {} 取消订阅失败: {}", name, e);
            }
        }
        let mut tracker = self.tracker.lock().await;
        tracker.remove_anchor(name)
    }

    pub async fn set_anchor_position(&self, name: &str, x: f64, y: f64) -> Result<()> {
        self.tracker.lock().await.set_anchor_position(name, x, y)
    }

    pub async fn set_device_enabled(&self, device_addr: &str, enabled: bool) -> bool {
        self.tracker
            .lock()
            .await
            .set_device_enabled(device_addr, enabled)
    }

    pub async fn clear_end_points(&self) {
        self.tracker.lock().await.clear_end_points();
    }

    pub async fn positions(&self) -> Vec<DevicePosition> {
        self.tracker.lock().await.positions()
    }

    pub async fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: FnMut(&TrackerEvent) + Send + 'static,
    {
        self.tracker.lock().await.subscribe(observer)
    }

    pub async fn unsubscribe(&self, id: ObserverId) -> bool {
        self.tracker.lock().await.unsubscribe(id)
    }

    /// 等待此前投递的负载全部处理完
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(IngestMessage::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// 停止所有监听并结束接入任务
    pub async fn shutdown(mut self) {
        {
            let mut tracker = self.tracker.lock().await;
            for (name, mut listener) in self.listeners.drain() {
                if let Err(e) = listener.stop() {
                    warn!("锚点 {} 停止监听失败: {}", name, e);
                    continue;
                }
                if let Err(e) = tracker.set_anchor_listening(&name, false) {
                    debug!("锚点 {} 已不在会话中: {}", name, e);
                }
            }
        }
        self.flush().await;

        let TrackerService {
            tx, ingest_task, ..
        } = self;
        drop(tx);
        let abort = ingest_task.abort_handle();
        if timeout(Duration::from_secs(1), ingest_task).await.is_err() {
            abort.abort();
        }
        info!("追踪服务已停止");
    }
}

async fn ingest_loop(tracker: Arc<Mutex<Tracker>>, mut rx: UnboundedReceiver<IngestMessage>) {
    while let Some(message) = rx.recv().await {
        match message {
            IngestMessage::Report(report) => {
                let mut tracker = tracker.lock().await;
                match tracker.ingest_report(&report.anchor_name, &report.payload) {
                    Ok(outcomes) => {
                        let accepted = outcomes.iter().filter(|o| o.is_accepted()).count();
                        debug!(
                            "锚点 {} 上报 {} 条，接受 {} 条",
                            report.anchor_name,
                            outcomes.len(),
                            accepted
                        );
                    }
                    Err(e) => warn!("无法解析锚点 {} 的数据: {}", report.anchor_name, e),
                }
            }
            IngestMessage::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("接入通道关闭");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{DataCallback, MemorySource, SubscriptionHandle};
    use crate::tracker::{ManualClock, PositionEstimator};

    const DEV: &str = "AA:BB:CC:DD:EE:FF";

    /// 订阅成功但取消订阅总是失败的数据源
    struct StuckSource;

    impl CharacteristicSource for StuckSource {
        fn subscribe(&self, _on_data: DataCallback) -> Result<SubscriptionHandle> {
            Ok(SubscriptionHandle(7))
        }

        fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
            Err(TrackerError::UnknownSubscription(handle.0))
        }
    }

    fn service() -> TrackerService {
        let tracker = Tracker::new(PositionEstimator::default(), ManualClock::new(50_000));
        TrackerService::start(tracker)
    }

    #[tokio::test]
    async fn test_report_flows_through_service() {
        let mut service = service();
        let source = Arc::new(MemorySource::new());
        service.add_anchor("A1", 500.0, 100.0, source.clone()).await.unwrap();

        source.push(br#"{"devices":[{"addr":"AA:BB:CC:DD:EE:FF","rssi":-40}]}"#);
        service.flush().await;

        let positions = service.positions().await;
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].device_addr, DEV);
        assert_eq!(positions[0].xy(), (500.0, 100.0));

        let tracker = service.tracker();
        assert!(tracker.lock().await.anchor("A1").unwrap().listening);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_garbage_payload_does_not_stop_ingest() {
        let mut service = service();
        let source = Arc::new(MemorySource::new());
        service.add_anchor("A1", 0.0, 0.0, source.clone()).await.unwrap();

        source.push(b"\x00\xffgarbage");
        source.push(br#"{"devices":[{"addr":"AA:BB:CC:DD:EE:FF","rssi":-40}]}"#);
        service.flush().await;

        assert_eq!(service.positions().await.len(), 1);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_anchor_stops_listening() {
        let mut service = service();
        let source = Arc::new(MemorySource::new());
        service.add_anchor("A1", 0.0, 0.0, source.clone()).await.unwrap();
        assert_eq!(source.subscriber_count(), 1);

        service.remove_anchor("A1").await.unwrap();
        assert_eq!(source.subscriber_count(), 0);
        assert!(service.remove_anchor("A1").await.is_err());
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_anchor_is_rejected() {
        let mut service = service();
        let source = Arc::new(MemorySource::new());
        service.add_anchor("A1", 0.0, 0.0, source.clone()).await.unwrap();
        assert!(matches!(
            service.add_anchor("A1", 1.0, 1.0, source.clone()).await,
            Err(TrackerError::DuplicateAnchor(_))
        ));
        assert_eq!(source.subscriber_count(), 1);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_anchor_survives_unsubscribe_failure() {
        let mut service = service();
        service.add_anchor("A1", 0.0, 0.0, Arc::new(StuckSource)).await.unwrap();

        let affected = service.remove_anchor("A1").await.unwrap();
        assert!(affected.is_empty());
        let tracker = service.tracker();
        assert!(tracker.lock().await.anchor("A1").is_none());

        // 名称可以重新使用
        let source = Arc::new(MemorySource::new());
        service.add_anchor("A1", 1.0, 1.0, source.clone()).await.unwrap();
        assert_eq!(source.subscriber_count(), 1);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_clears_listening_flag() {
        let mut service = service();
        let source = Arc::new(MemorySource::new());
        service.add_anchor("A1", 0.0, 0.0, source.clone()).await.unwrap();
        service.add_anchor("A2", 5.0, 5.0, Arc::new(StuckSource)).await.unwrap();
        let tracker = service.tracker();

        service.shutdown().await;

        let tracker = tracker.lock().await;
        assert!(!tracker.anchor("A1").unwrap().listening);
        // 取消订阅失败的锚点保持原状
        assert!(tracker.anchor("A2").unwrap().listening);
        assert_eq!(source.subscriber_count(), 0);
    }
}
