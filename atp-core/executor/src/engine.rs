//! 判定引擎
//!
//! 单个步骤的执行状态机：执行一次 → 判定 → 按中断条件决定重试、中断或继续。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use atp_common::{RunId, Verdict};
use atp_context::handle::panic_message;
use atp_context::{ContextError, ExecutionContext};
use atp_resource::{LifecycleStrategy, ResourceError};
use atp_results::{PlanRun, ResultPipeline, StepRun, WorkItem};
use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, error, info, warn};

use crate::break_condition::{BreakCondition, BreakPolicy, StepAction};
use crate::step::TestStep;
use crate::step_context::StepContext;
use crate::ExecutorError;

/// 一次计划运行内所有步骤共享的状态
pub(crate) struct RunShared {
    pub plan_run: Arc<PlanRun>,
    pub pipeline: Arc<ResultPipeline>,
    pub strategy: Arc<dyn LifecycleStrategy>,
    pub policy: BreakPolicy,
    pub root: ExecutionContext,
}

/// 步骤被分发后的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StepOutcome {
    pub verdict: Verdict,
    pub broke: bool,
    pub executed: bool,
}

impl StepOutcome {
    fn skipped() -> Self {
        Self {
            verdict: Verdict::NotSet,
            broke: false,
            executed: false,
        }
    }

    pub(crate) fn failed(verdict: Verdict) -> Self {
        Self {
            verdict,
            broke: false,
            executed: true,
        }
    }
}

/// 分发一个步骤，包含全部重试
///
/// `ancestors` 为祖先的中断条件，按从近到远排列。
pub(crate) fn execute_step(
    step: Arc<TestStep>,
    parent_run: RunId,
    ancestors: Arc<Vec<BreakCondition>>,
    shared: Arc<RunShared>,
    exec: ExecutionContext,
) -> BoxFuture<'static, StepOutcome> {
    async move {
        if !step.is_enabled() {
            debug!("跳过禁用的步骤: {}", step.name());
            return StepOutcome::skipped();
        }

        let condition = shared.policy.resolve(step.break_condition(), &ancestors);
        let max_attempts = shared.policy.max_attempts(step.max_attempts());
        let mut attempt = 0;

        loop {
            attempt += 1;
            let verdict = run_attempt(&step, parent_run, attempt, &ancestors, &shared, &exec).await;

            match condition.decide(verdict, attempt, max_attempts) {
                StepAction::Retry => {
                    info!(
                        "步骤 {} 判定为 {}, 重试 ({}/{})",
                        step.name(),
                        verdict,
                        attempt + 1,
                        max_attempts
                    );
                }
                StepAction::Break => {
                    return StepOutcome {
                        verdict,
                        broke: true,
                        executed: true,
                    };
                }
                StepAction::Continue => {
                    return StepOutcome {
                        verdict,
                        broke: false,
                        executed: true,
                    };
                }
            }
        }
    }
    .boxed()
}

async fn run_attempt(
    step: &Arc<TestStep>,
    parent_run: RunId,
    attempt: u32,
    ancestors: &Arc<Vec<BreakCondition>>,
    shared: &Arc<RunShared>,
    exec: &ExecutionContext,
) -> Verdict {
    let body = step.body().clone();
    if step.hooks().attempt_reset {
        body.reset_attempt();
    }

    let run = Arc::new(StepRun::new(
        step.id(),
        step.name(),
        parent_run,
        attempt,
        body.parameters(),
    ));
    step.begin_attempt(run.clone());
    debug!("开始执行步骤: {} (第 {} 次)", step.name(), attempt);
    publish(shared, WorkItem::StepStarted(run.clone())).await;

    let verdict = if exec.is_cancelled() {
        Verdict::Aborted
    } else {
        match shared.strategy.acquire(&body.resources(), exec).await {
            Err(e) if e.is_cancelled() => Verdict::Aborted,
            Err(e) => {
                error!("步骤 {} 所需资源不可用: {}", step.name(), e);
                Verdict::Error
            }
            Ok(()) => {
                let mut cx = StepContext::new(
                    step.clone(),
                    run.clone(),
                    exec.clone(),
                    shared.clone(),
                    ancestors.clone(),
                );
                match AssertUnwindSafe(body.run(&mut cx)).catch_unwind().await {
                    Ok(Ok(())) => run.verdict(),
                    Ok(Err(e)) if is_cancellation(&e) || exec.is_cancelled() => {
                        debug!("步骤 {} 被取消: {:#}", step.name(), e);
                        Verdict::Aborted
                    }
                    Ok(Err(e)) => {
                        error!("步骤 {} 执行失败: {:#}", step.name(), e);
                        Verdict::Error
                    }
                    Err(payload) => {
                        error!("步骤 {} 发生 panic: {}", step.name(), panic_message(payload));
                        Verdict::Error
                    }
                }
            }
        }
    };

    run.upgrade_verdict(verdict);
    if exec.is_cancelled() {
        run.upgrade_verdict(Verdict::Aborted);
    }

    let verdict = run.verdict();
    run.complete();
    publish(shared, WorkItem::StepCompleted(run.clone())).await;
    step.record_verdict(verdict);
    debug!("步骤 {} 执行完成: {}", step.name(), verdict);
    verdict
}

async fn publish(shared: &RunShared, item: WorkItem) {
    let kind = item.kind();
    if let Err(e) = shared.pipeline.publish(item).await {
        warn!("发布 {} 事件失败: {}", kind, e);
    }
}

/// 错误链中是否包含取消
pub(crate) fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<ExecutorError>()
            .is_some_and(ExecutorError::is_cancelled)
            || cause
                .downcast_ref::<ContextError>()
                .is_some_and(ContextError::is_cancelled)
            || cause
                .downcast_ref::<ResourceError>()
                .is_some_and(ResourceError::is_cancelled)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use atp_results::PipelineError;

    #[test]
    fn test_cancellation_detected_through_context() {
        let err = anyhow::Error::new(ExecutorError::from(ContextError::Cancelled("root".into())))
            .context("等待仪器就绪");
        assert!(is_cancellation(&err));

        let err = anyhow::Error::new(ResourceError::Cancelled("dmm".into()));
        assert!(is_cancellation(&err));
    }

    #[test]
    fn test_ordinary_errors_are_not_cancellation() {
        assert!(!is_cancellation(&anyhow::anyhow!("测量超限")));
        assert!(!is_cancellation(&anyhow::Error::new(ExecutorError::from(
            PipelineError::Closed
        ))));
        assert!(!is_cancellation(&anyhow::Error::new(ContextError::Panicked(
            "boom".into()
        ))));
    }
}
