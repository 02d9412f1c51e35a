//! 编排引擎的领域模型
//!
//! 包含采集器描述、作业状态机、流水线运行记录、工作流定义与执行记录、
//! 健康快照，以及引擎与外部协作者之间的端口抽象。

pub mod entities;
pub mod events;
pub mod health;
pub mod job;
pub mod pipeline;
pub mod ports;
pub mod workflow;

pub use entities::*;
pub use events::*;
pub use harvest_errors::{HarvestError, HarvestResult};
pub use health::*;
pub use job::*;
pub use pipeline::*;
pub use ports::*;
pub use workflow::*;
