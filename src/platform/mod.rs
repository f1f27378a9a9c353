/// 平台相关的特征值数据源

pub mod btle;

pub use btle::*;
