//! 流程控制步骤

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value};
use tracing::debug;

use crate::step::StepBody;
use crate::step_context::StepContext;

/// 顺序执行子步骤
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceStep;

#[async_trait]
impl StepBody for SequenceStep {
    async fn run(&self, cx: &mut StepContext) -> anyhow::Result<()> {
        cx.run_children().await;
        Ok(())
    }
}

/// 并行执行子步骤，等待全部结束
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelStep;

#[async_trait]
impl StepBody for ParallelStep {
    async fn run(&self, cx: &mut StepContext) -> anyhow::Result<()> {
        cx.run_children_parallel().await;
        Ok(())
    }
}

/// 重复执行子步骤指定次数
///
/// 子步骤触发中断时提前结束。
#[derive(Debug, Clone, Copy)]
pub struct RepeatStep {
    pub count: u32,
}

impl RepeatStep {
    pub fn new(count: u32) -> Self {
        Self { count }
    }
}

#[async_trait]
impl StepBody for RepeatStep {
    async fn run(&self, cx: &mut StepContext) -> anyhow::Result<()> {
        for iteration in 1..=self.count {
            cx.check_cancelled()?;
            cx.run().bag().set("iteration", json!(iteration));

            let outcome = cx.run_children().await;
            if outcome.broke {
                debug!("重复步骤在第 {} 轮中断", iteration);
                break;
            }
        }
        Ok(())
    }

    fn parameters(&self) -> IndexMap<String, Value> {
        IndexMap::from([("count".to_string(), json!(self.count))])
    }
}
