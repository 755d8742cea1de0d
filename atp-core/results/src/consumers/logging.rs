//! 日志消费者

use std::sync::Arc;

use async_trait::async_trait;
use atp_common::RunId;
use tracing::{debug, info, warn};

use crate::consumer::ResultConsumer;
use crate::run::{PlanRun, StepRun};
use crate::table::{Artifact, ResultTable};

/// 通过 tracing 输出步骤与计划摘要
#[derive(Debug, Default)]
pub struct LogConsumer;

impl LogConsumer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResultConsumer for LogConsumer {
    fn name(&self) -> &str {
        "log"
    }

    async fn on_plan_start(&self, run: &Arc<PlanRun>) -> anyhow::Result<()> {
        info!("计划开始: {} (run_id={})", run.plan_name, run.id);
        Ok(())
    }

    async fn on_step_start(&self, run: &Arc<StepRun>) -> anyhow::Result<()> {
        debug!(
            "步骤开始: {} (第 {} 次, run_id={})",
            run.step_name, run.attempt, run.id
        );
        Ok(())
    }

    async fn on_result(&self, run: &Arc<StepRun>, table: &ResultTable) -> anyhow::Result<()> {
        debug!(
            "步骤 {} 发布结果: {} ({} 行)",
            run.step_name,
            table.name,
            table.row_count()
        );
        Ok(())
    }

    async fn on_step_end(&self, run: &Arc<StepRun>) -> anyhow::Result<()> {
        let verdict = run.verdict();
        let elapsed = run.duration().unwrap_or_default();
        if verdict.is_failure() {
            warn!(
                "步骤结束: {} - {} ({:.3}s)",
                run.step_name,
                verdict.display_name(),
                elapsed.as_secs_f64()
            );
        } else {
            info!(
                "步骤结束: {} - {} ({:.3}s)",
                run.step_name,
                verdict.display_name(),
                elapsed.as_secs_f64()
            );
        }
        Ok(())
    }

    async fn on_plan_end(&self, run: &Arc<PlanRun>) -> anyhow::Result<()> {
        let summary = run.summary();
        if summary.failed_to_start {
            warn!("计划未能开始: {}", summary.plan_name);
        }
        info!(
            "计划结束: {} - {} (退出码 {}, 附件 {} 个)",
            summary.plan_name,
            summary.verdict.display_name(),
            summary.verdict.exit_code(),
            summary.artifact_count
        );
        Ok(())
    }

    async fn on_artifact(&self, run_id: RunId, artifact: &Arc<Artifact>) -> anyhow::Result<()> {
        debug!(
            "附件: {} ({} 字节, run_id={})",
            artifact.name,
            artifact.len(),
            run_id
        );
        Ok(())
    }
}
