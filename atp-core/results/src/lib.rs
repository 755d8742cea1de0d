//! ATP 结果管道
//!
//! 定义计划/步骤运行记录、列式结果表，以及把生命周期事件和结果行
//! 并发分发给多个互相独立的结果消费者的带背压管道。

pub mod consumer;
pub mod consumers;
pub mod pipeline;
pub mod run;
pub mod table;
pub mod work;

pub use consumer::{ConsumerFailure, ResultConsumer};
pub use consumers::{CollectedEvent, CollectingConsumer, LogConsumer};
pub use pipeline::{ConsumerId, PipelineConfig, ResultPipeline, MAX_IN_FLIGHT_LIMIT};
pub use run::{ParameterBag, PlanRun, PlanRunSummary, StepRun};
pub use table::{Artifact, ResultColumn, ResultTable};
pub use work::WorkItem;

use thiserror::Error;

/// 结果管道错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("结果管道已关闭")]
    Closed,

    #[error("结果消费者不存在")]
    ConsumerNotFound,

    #[error("结果管道配置无效: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
