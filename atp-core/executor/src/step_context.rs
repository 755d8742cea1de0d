//! 步骤执行上下文
//!
//! 步骤主体通过 [`StepContext`] 访问当前运行记录、发布结果，
//! 以及顺序或并行地分发子步骤。

use std::sync::Arc;
use std::time::Duration;

use atp_common::Verdict;
use atp_context::{ContextHandle, ExecutionContext};
use atp_resource::{ResourceRef, ResourceState};
use atp_results::{Artifact, PlanRun, ResultPipeline, ResultTable, StepRun, WorkItem};
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

use crate::break_condition::BreakCondition;
use crate::engine::{execute_step, RunShared, StepOutcome};
use crate::step::TestStep;
use crate::{ExecutorError, Result};

/// 一组子步骤的分发结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChildrenOutcome {
    /// 已分发子步骤判定的最大值
    pub verdict: Verdict,
    /// 实际分发的子步骤数量
    pub executed: usize,
    /// 是否有子步骤触发了中断
    pub broke: bool,
}

impl ChildrenOutcome {
    fn absorb(&mut self, outcome: StepOutcome) {
        if outcome.executed {
            self.executed += 1;
        }
        self.verdict = self.verdict.max(outcome.verdict);
        self.broke |= outcome.broke;
    }
}

/// 步骤主体可用的执行上下文
pub struct StepContext {
    step: Arc<TestStep>,
    run: Arc<StepRun>,
    exec: ExecutionContext,
    shared: Arc<RunShared>,
    ancestors: Arc<Vec<BreakCondition>>,
}

impl StepContext {
    pub(crate) fn new(
        step: Arc<TestStep>,
        run: Arc<StepRun>,
        exec: ExecutionContext,
        shared: Arc<RunShared>,
        ancestors: Arc<Vec<BreakCondition>>,
    ) -> Self {
        Self {
            step,
            run,
            exec,
            shared,
            ancestors,
        }
    }

    pub fn step(&self) -> &Arc<TestStep> {
        &self.step
    }

    /// 当前步骤运行记录
    pub fn run(&self) -> &Arc<StepRun> {
        &self.run
    }

    pub fn plan_run(&self) -> &Arc<PlanRun> {
        &self.shared.plan_run
    }

    /// 当前执行上下文
    pub fn context(&self) -> &ExecutionContext {
        &self.exec
    }

    /// 本次运行的结果管道 (可在运行中挂接/移除消费者)
    pub fn pipeline(&self) -> &Arc<ResultPipeline> {
        &self.shared.pipeline
    }

    /// 发布一组结果行，消费者繁忙时会等待
    pub async fn publish(&self, table: ResultTable) -> Result<()> {
        self.shared
            .pipeline
            .publish(WorkItem::Result {
                run: self.run.clone(),
                table,
            })
            .await?;
        Ok(())
    }

    /// 发布附件，同时记录到计划运行中
    pub async fn publish_artifact(&self, artifact: Artifact) -> Result<()> {
        let artifact = Arc::new(artifact);
        self.shared.plan_run.add_artifact(artifact.clone());
        self.shared
            .pipeline
            .publish(WorkItem::Artifact {
                run_id: self.run.id,
                artifact,
            })
            .await?;
        Ok(())
    }

    /// 提升当前执行的判定，返回提升后的判定
    pub fn upgrade_verdict(&self, verdict: Verdict) -> Verdict {
        self.run.upgrade_verdict(verdict)
    }

    pub fn verdict(&self) -> Verdict {
        self.run.verdict()
    }

    /// 可取消的休眠
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.exec.sleep(duration).await?;
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.exec.is_cancelled()
    }

    /// 已取消时返回错误，供长时间运行的步骤在检查点调用
    pub fn check_cancelled(&self) -> Result<()> {
        if self.exec.is_cancelled() {
            Err(ExecutorError::Cancelled(self.step.name().to_string()))
        } else {
            Ok(())
        }
    }

    /// 取消整个计划运行
    pub fn abort_plan(&self) {
        warn!("步骤 {} 请求中止计划运行", self.step.name());
        self.shared.root.abort();
    }

    /// 资源在当前生命周期策略下的状态
    pub fn resource_state(&self, resource: &ResourceRef) -> ResourceState {
        self.shared.strategy.state_of(resource)
    }

    fn child_ancestors(&self) -> Arc<Vec<BreakCondition>> {
        let mut ancestors = Vec::with_capacity(self.ancestors.len() + 1);
        ancestors.push(self.step.break_condition());
        ancestors.extend(self.ancestors.iter().copied());
        Arc::new(ancestors)
    }

    fn enabled_children(&self) -> Vec<Arc<TestStep>> {
        self.step
            .children()
            .iter()
            .filter(|child| child.is_enabled())
            .cloned()
            .collect()
    }

    /// 按顺序分发启用的子步骤
    ///
    /// 子步骤触发中断或上下文被取消时停止分发，子步骤判定汇总到当前执行。
    pub async fn run_children(&self) -> ChildrenOutcome {
        let ancestors = self.child_ancestors();
        let mut outcome = ChildrenOutcome::default();

        for child in self.enabled_children() {
            if self.exec.is_cancelled() {
                debug!("上下文已取消, 不再分发子步骤: {}", child.name());
                break;
            }

            let result = execute_step(
                child.clone(),
                self.run.id,
                ancestors.clone(),
                self.shared.clone(),
                self.exec.clone(),
            )
            .await;
            outcome.absorb(result);

            if result.broke {
                info!(
                    "子步骤 {} 判定为 {}, 停止分发后续子步骤",
                    child.name(),
                    result.verdict
                );
                break;
            }
        }

        self.run.upgrade_verdict(outcome.verdict);
        outcome
    }

    /// 并行分发启用的子步骤，每个子步骤运行在独立的子上下文中
    ///
    /// 任一子步骤中止时，其余仍在运行的子步骤一并取消。
    pub async fn run_children_parallel(&self) -> ChildrenOutcome {
        let ancestors = self.child_ancestors();
        let children = self.enabled_children();

        let handles: Vec<ContextHandle<StepOutcome>> = children
            .iter()
            .map(|child| {
                let child = child.clone();
                let ancestors = ancestors.clone();
                let shared = self.shared.clone();
                let parent_run = self.run.id;
                self.exec.spawn(format!("step:{}", child.name()), move |cx| {
                    execute_step(child, parent_run, ancestors, shared, cx)
                })
            })
            .collect();

        let contexts: Vec<ExecutionContext> = handles.iter().map(|h| h.context().clone()).collect();
        let mut pending: FuturesUnordered<_> = handles
            .into_iter()
            .zip(children.iter())
            .map(|(handle, child)| async move { (child.name(), handle.join().await) })
            .collect();

        let mut outcome = ChildrenOutcome::default();
        while let Some((name, joined)) = pending.next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!("并行子步骤 {} 异常结束: {}", name, e);
                    StepOutcome::failed(Verdict::Error)
                }
            };

            if result.verdict == Verdict::Aborted {
                for context in &contexts {
                    context.abort();
                }
            }
            outcome.absorb(result);
        }

        self.run.upgrade_verdict(outcome.verdict);
        outcome
    }
}
