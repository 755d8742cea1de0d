//! 结果消费者接口

use std::sync::Arc;

use async_trait::async_trait;
use atp_common::RunId;

use crate::run::{PlanRun, StepRun};
use crate::table::{Artifact, ResultTable};

/// 结果消费者
///
/// 每个消费者有独立的投递队列，同一运行的事件按发布顺序投递。
/// 回调返回的错误或 panic 只记录在管道的失败列表中，不影响其他消费者和计划判定。
#[async_trait]
pub trait ResultConsumer: Send + Sync {
    /// 消费者名称
    fn name(&self) -> &str;

    async fn on_plan_start(&self, _run: &Arc<PlanRun>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_step_start(&self, _run: &Arc<StepRun>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_result(&self, _run: &Arc<StepRun>, _table: &ResultTable) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_step_end(&self, _run: &Arc<StepRun>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_plan_end(&self, _run: &Arc<PlanRun>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_artifact(&self, _run_id: RunId, _artifact: &Arc<Artifact>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 消费者回调失败记录
#[derive(Debug, Clone)]
pub struct ConsumerFailure {
    /// 消费者名称
    pub consumer: String,
    /// 事件类型
    pub event: &'static str,
    /// 所属运行
    pub run_id: RunId,
    /// 错误信息
    pub message: String,
}
