/// 终端追踪核心
///
/// 该模块包含：
/// - 锚点与终端的数据结构
/// - 关系索引（锚点 ↔ 终端 ↔ 最近观测，双向视图）
/// - 基于 RSSI 加权质心的位置估计
/// - 观测接入校验与锚点负载解码
/// - 把以上组合成原子步骤的定位会话

pub mod anchor;
pub mod end_point;
pub mod estimator;
pub mod index;
pub mod observation;
pub mod relation;
pub mod results;
pub mod session;

pub use anchor::*;
pub use end_point::*;
pub use estimator::*;
pub use index::*;
pub use observation::*;
pub use relation::*;
pub use results::*;
pub use session::*;
