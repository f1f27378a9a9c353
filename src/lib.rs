//! blutrack - 基于 RSSI 加权质心的蓝牙终端追踪
//!
//! 固定位置的锚点（接入点）通过蓝牙特征值上报它们看到的终端及信号强度，
//! 本库维护锚点与终端之间的最近观测，并估计每个终端在二维地图上的位置。

pub mod config;
pub mod error;
pub mod listener;
pub mod platform;
pub mod service;
pub mod tracker;

pub use error::{Result, TrackerError};
