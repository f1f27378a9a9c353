/// 基于 btleplug 的锚点特征值数据源
///
/// 连接锚点外设后订阅承载上报数据的特征值，只在值发生变化（外设发出
/// 通知）时把新值交给订阅回调。同一份旧数据不会被重复投递。

use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use crate::listener::{CharacteristicSource, DataCallback, SubscriptionHandle};
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, ValueNotification,
};
use btleplug::platform::{Manager, Peripheral};
use futures_util::{Stream, StreamExt};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::sleep;

pub struct BtleCharacteristic {
    anchor_name: String,
    peripheral: Peripheral,
    characteristic: Characteristic,
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_handle: AtomicU64,
}

impl BtleCharacteristic {
    /// 连接外设并定位特征值
    pub async fn connect(
        anchor_name: String,
        peripheral: Peripheral,
        characteristic_uuid: &str,
    ) -> Result<Self> {
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid.to_string().eq_ignore_ascii_case(characteristic_uuid))
            .ok_or_else(|| TrackerError::CharacteristicNotFound {
                anchor: anchor_name.clone(),
                uuid: characteristic_uuid.to_string(),
            })?;

        info!("已连接锚点 {} ({})", anchor_name, peripheral.address());
        Ok(BtleCharacteristic {
            anchor_name,
            peripheral,
            characteristic,
            tasks: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(0),
        })
    }

    pub fn anchor_name(&self) -> &str {
        &self.anchor_name
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<u64, JoinHandle<()>>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 最后一个订阅结束后关闭外设上的通知
    fn disable_notifications(&self, runtime: &Handle) {
        let peripheral = self.peripheral.clone();
        let characteristic = self.characteristic.clone();
        let anchor_name = self.anchor_name.clone();
        runtime.spawn(async move {
            if let Err(e) = peripheral.unsubscribe(&characteristic).await {
                warn!("关闭锚点 {} 的通知失败: {}", anchor_name, e);
            }
        });
    }
}

/// 把通知流中属于 `characteristic` 的非空新值交给 `on_data`，直到流结束
async fn forward_notifications<S>(
    mut notifications: S,
    characteristic: &Characteristic,
    on_data: &DataCallback,
) where
    S: Stream<Item = ValueNotification> + Unpin,
{
    while let Some(notification) = notifications.next().await {
        if notification.uuid == characteristic.uuid && !notification.value.is_empty() {
            on_data(notification.value);
        }
    }
}

impl CharacteristicSource for BtleCharacteristic {
    fn subscribe(&self, on_data: DataCallback) -> Result<SubscriptionHandle> {
        let runtime = Handle::try_current().map_err(|_| TrackerError::NoRuntime)?;

        let peripheral = self.peripheral.clone();
        let characteristic = self.characteristic.clone();
        let anchor_name = self.anchor_name.clone();

        let task: JoinHandle<()> = runtime.spawn(async move {
            let notifications = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("无法获取锚点 {} 的通知流: {}", anchor_name, e);
                    return;
                }
            };
            if let Err(e) = peripheral.subscribe(&characteristic).await {
                warn!("订阅锚点 {} 特征值失败: {}", anchor_name, e);
                return;
            }
            forward_notifications(notifications, &characteristic, &on_data).await;
            debug!("锚点 {} 的通知流已结束", anchor_name);
        });

        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.lock_tasks().insert(id, task);
        Ok(SubscriptionHandle(id))
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        let (task, now_idle) = {
            let mut tasks = self.lock_tasks();
            let task = tasks
                .remove(&handle.0)
                .ok_or(TrackerError::UnknownSubscription(handle.0))?;
            (task, tasks.is_empty())
        };
        task.abort();

        if now_idle {
            match Handle::try_current() {
                Ok(runtime) => self.disable_notifications(&runtime),
                Err(_) => debug!("无运行时，跳过关闭锚点 {} 的通知", self.anchor_name),
            }
        }
        Ok(())
    }
}

impl Drop for BtleCharacteristic {
    fn drop(&mut self) {
        let tasks: Vec<JoinHandle<()>> = self.lock_tasks().drain().map(|(_, task)| task).collect();
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            task.abort();
        }
        if let Ok(runtime) = Handle::try_current() {
            self.disable_notifications(&runtime);
        }
    }
}

/// 扫描并连接所有名称匹配的锚点外设
pub async fn discover_anchors(config: &TrackerConfig) -> Result<Vec<BtleCharacteristic>> {
    let pattern = config.anchor_pattern()?;

    let manager = Manager::new().await?;
    let adapter = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or(TrackerError::NoAdapter)?;

    info!("扫描锚点 {} 秒...", config.scan_secs);
    adapter.start_scan(ScanFilter::default()).await?;
    sleep(config.scan_duration()).await;

    let mut found = Vec::new();
    for peripheral in adapter.peripherals().await? {
        let Ok(Some(properties)) = peripheral.properties().await else {
            continue;
        };
        let Some(name) = properties.local_name else {
            continue;
        };
        if !pattern.is_match(&name) {
            continue;
        }

        match BtleCharacteristic::connect(name.clone(), peripheral, &config.characteristic_uuid).await {
            Ok(source) => found.push(source),
            Err(e) => warn!("无法连接锚点 {}: {}", name, e),
        }
    }

    adapter.stop_scan().await?;
    info!("发现 {} 个锚点", found.len());
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use btleplug::api::CharPropFlags;
    use btleplug::api::bleuuid::uuid_from_u16;
    use futures_util::stream;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn report_characteristic() -> Characteristic {
        Characteristic {
            uuid: uuid_from_u16(0xFFE1),
            service_uuid: uuid_from_u16(0xFFE0),
            properties: CharPropFlags::NOTIFY,
            descriptors: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn test_each_notification_is_delivered_once() {
        let characteristic = report_characteristic();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let on_data: DataCallback = Box::new(move |value| sink.lock().unwrap().push(value));

        let notifications = stream::iter(vec![
            ValueNotification {
                uuid: characteristic.uuid,
                value: b"first".to_vec(),
            },
            ValueNotification {
                uuid: uuid_from_u16(0x2A19),
                value: vec![87],
            },
            ValueNotification {
                uuid: characteristic.uuid,
                value: Vec::new(),
            },
            ValueNotification {
                uuid: characteristic.uuid,
                value: b"second".to_vec(),
            },
        ]);
        forward_notifications(notifications, &characteristic, &on_data).await;

        // 其他特征值和空值被忽略；流结束后不会再重复投递旧值
        let received = received.lock().unwrap();
        assert_eq!(*received, vec![b"first".to_vec(), b"second".to_vec()]);
    }
}
