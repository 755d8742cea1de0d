//! ATP 执行器
//!
//! 测试计划执行引擎：按步骤树分发步骤，依据中断条件决定重试与中断，
//! 管理资源生命周期，并把运行事件与结果交给结果管道。

pub mod break_condition;
mod engine;
pub mod plan;
pub mod runner;
pub mod settings;
pub mod step;
pub mod step_context;
pub mod steps;

pub use break_condition::{BreakCondition, BreakPolicy, StepAction};
pub use plan::TestPlan;
pub use runner::{ExecutionOptions, PlanExecutor, RunMonitor};
pub use settings::EngineSettings;
pub use step::{StepBody, StepHooks, TestStep};
pub use step_context::{ChildrenOutcome, StepContext};
pub use steps::{DelayStep, ParallelStep, RepeatStep, SequenceStep, VerdictStep};

use atp_context::ContextError;
use atp_resource::ResourceError;
use atp_results::PipelineError;
use thiserror::Error;

/// 执行器错误
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("执行已取消: {0}")]
    Cancelled(String),

    #[error("发布结果失败: {0}")]
    Publish(#[from] PipelineError),

    #[error("资源错误: {0}")]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("步骤不存在: {0}")]
    StepNotFound(String),
}

impl ExecutorError {
    /// 是否由取消引起
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled(_) => true,
            Self::Resource(e) => e.is_cancelled(),
            Self::Context(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
