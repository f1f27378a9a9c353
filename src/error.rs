/// 错误类型定义
///
/// 核心（关系索引与位置估计）不产生错误：噪声观测被丢弃，
/// 退化质心降级为“位置未知”。这里的错误只来自外围：配置、
/// 负载解码、蓝牙以及锚点生命周期的误用。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("undecodable anchor payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("unknown anchor: {0}")]
    UnknownAnchor(String),

    #[error("anchor already exists: {0}")]
    DuplicateAnchor(String),

    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    #[error("no bluetooth adapter found")]
    NoAdapter,

    #[error("anchor {anchor} has no characteristic {uuid}")]
    CharacteristicNotFound { anchor: String, uuid: String },

    #[error("no tokio runtime available to drive the subscription")]
    NoRuntime,

    #[error("unknown subscription handle: {0}")]
    UnknownSubscription(u64),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
