//! 计划执行器

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use atp_common::Verdict;
use atp_context::ExecutionContext;
use atp_resource::{strategy_for, LifecycleStrategy};
use atp_results::{PlanRun, ResultConsumer, ResultPipeline, WorkItem};
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::engine::{execute_step, RunShared};
use crate::plan::TestPlan;
use crate::settings::EngineSettings;
use crate::step::TestStep;
use crate::{ExecutorError, Result};

/// 运行监视器
///
/// 运行开始时拿到本次运行的结果管道，可在运行中途挂接或移除消费者。
#[async_trait]
pub trait RunMonitor: Send + Sync {
    async fn on_run_started(&self, pipeline: &Arc<ResultPipeline>, run: &Arc<PlanRun>);

    async fn on_run_completed(&self, _run: &Arc<PlanRun>) {}
}

/// 单次执行的选项
#[derive(Clone, Default)]
pub struct ExecutionOptions {
    /// 结果消费者
    pub consumers: Vec<Arc<dyn ResultConsumer>>,
    /// 外部元数据
    pub metadata: IndexMap<String, Value>,
    /// 运行监视器
    pub monitors: Vec<Arc<dyn RunMonitor>>,
    /// 根执行上下文 (默认为每次运行新建)
    pub context: Option<ExecutionContext>,
}

impl ExecutionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_consumer(mut self, consumer: Arc<dyn ResultConsumer>) -> Self {
        self.consumers.push(consumer);
        self
    }

    pub fn with_consumers(mut self, consumers: Vec<Arc<dyn ResultConsumer>>) -> Self {
        self.consumers.extend(consumers);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn RunMonitor>) -> Self {
        self.monitors.push(monitor);
        self
    }

    /// 在指定的根上下文中运行，调用方可借此从外部取消整个计划
    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// 计划执行器
pub struct PlanExecutor {
    settings: EngineSettings,
}

impl PlanExecutor {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    /// 校验配置后创建
    pub fn try_new(settings: EngineSettings) -> Result<Self> {
        settings
            .validate()
            .map_err(|e| ExecutorError::ConfigError(e.to_string()))?;
        Ok(Self::new(settings))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// 执行测试计划
    pub async fn execute(
        &self,
        plan: &TestPlan,
        consumers: Vec<Arc<dyn ResultConsumer>>,
        metadata: IndexMap<String, Value>,
    ) -> Arc<PlanRun> {
        let options = ExecutionOptions {
            consumers,
            metadata,
            ..ExecutionOptions::default()
        };
        self.execute_with(plan, options).await
    }

    /// 按选项执行测试计划
    ///
    /// 返回时结果管道已经排空，所有消费者都已收到计划结束事件。
    pub async fn execute_with(&self, plan: &TestPlan, options: ExecutionOptions) -> Arc<PlanRun> {
        info!("开始执行测试计划: {}", plan.name);
        plan.reset();

        let plan_run = Arc::new(PlanRun::new(plan.name.clone(), options.metadata));
        let pipeline = Arc::new(
            ResultPipeline::new(self.settings.pipeline.clone()).for_run(plan_run.clone()),
        );
        for consumer in options.consumers {
            let name = consumer.name().to_string();
            if let Err(e) = pipeline.attach(consumer) {
                warn!("挂接结果消费者 {} 失败: {}", name, e);
            }
        }
        for monitor in &options.monitors {
            monitor.on_run_started(&pipeline, &plan_run).await;
        }

        let root = options
            .context
            .unwrap_or_else(|| ExecutionContext::root(format!("plan:{}", plan.name)));
        let strategy = strategy_for(self.settings.resource_strategy);
        debug!("资源策略: {}", strategy.kind().display_name());

        publish(&pipeline, WorkItem::PlanStarted(plan_run.clone())).await;

        let resources = plan.referenced_resources();
        let started = match strategy.begin(&resources, &root).await {
            Ok(()) => true,
            Err(e) if e.is_cancelled() || root.is_cancelled() => {
                warn!("测试计划 {} 在资源准备期间被中止: {}", plan.name, e);
                plan_run.upgrade_verdict(Verdict::Aborted);
                false
            }
            Err(e) => {
                error!("测试计划 {} 无法开始, 资源准备失败: {}", plan.name, e);
                plan_run.mark_failed_to_start();
                false
            }
        };

        if started {
            let hooked = plan.enabled_steps();
            if run_pre_plan_hooks(&hooked).await {
                self.dispatch(plan, &plan_run, &pipeline, &strategy, &root)
                    .await;
            } else {
                plan_run.mark_failed_to_start();
            }
            run_post_plan_hooks(&hooked).await;
        }

        let report = strategy.close_all().await;
        if !report.is_clean() {
            for failure in &report.failures {
                warn!("{}", failure);
            }
        }
        debug!("已关闭 {} 个资源", report.closed.len());

        if root.is_cancelled() {
            plan_run.upgrade_verdict(Verdict::Aborted);
        }

        plan_run.complete();
        publish(&pipeline, WorkItem::PlanCompleted(plan_run.clone())).await;
        for monitor in &options.monitors {
            monitor.on_run_completed(&plan_run).await;
        }
        pipeline.drain_and_close().await;

        let failures = pipeline.failures();
        if !failures.is_empty() {
            warn!("{} 次结果消费者回调失败", failures.len());
        }
        info!(
            "测试计划 {} 执行完成: {} (耗时 {:?})",
            plan.name,
            plan_run.verdict(),
            plan_run.duration().unwrap_or_default()
        );

        plan_run
    }

    async fn dispatch(
        &self,
        plan: &TestPlan,
        plan_run: &Arc<PlanRun>,
        pipeline: &Arc<ResultPipeline>,
        strategy: &Arc<dyn LifecycleStrategy>,
        root: &ExecutionContext,
    ) {
        let shared = Arc::new(RunShared {
            plan_run: plan_run.clone(),
            pipeline: pipeline.clone(),
            strategy: strategy.clone(),
            policy: self.settings.policy(),
            root: root.clone(),
        });
        let ancestors = Arc::new(vec![plan.break_condition()]);

        let steps = plan.steps().iter().filter(|s| s.is_enabled());
        for (index, step) in steps.enumerate() {
            if root.is_cancelled() {
                warn!("测试计划已中止, 不再执行后续步骤");
                break;
            }
            info!("执行步骤 {}: {}", index + 1, step.name());

            let outcome = execute_step(
                step.clone(),
                plan_run.id,
                ancestors.clone(),
                shared.clone(),
                root.clone(),
            )
            .await;
            plan_run.upgrade_verdict(outcome.verdict);

            if outcome.broke {
                warn!(
                    "步骤 {} 判定为 {}, 停止执行后续步骤",
                    step.name(),
                    outcome.verdict
                );
                break;
            }
        }
    }
}

async fn publish(pipeline: &ResultPipeline, item: WorkItem) {
    let kind = item.kind();
    if let Err(e) = pipeline.publish(item).await {
        warn!("发布 {} 事件失败: {}", kind, e);
    }
}

async fn run_pre_plan_hooks(steps: &[Arc<TestStep>]) -> bool {
    for step in steps.iter().filter(|s| s.hooks().pre_plan_run) {
        let result = AssertUnwindSafe(step.body().pre_plan_run())
            .catch_unwind()
            .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("步骤 {} 的运行前钩子失败: {:#}", step.name(), e);
                return false;
            }
            Err(_) => {
                error!("步骤 {} 的运行前钩子发生 panic", step.name());
                return false;
            }
        }
    }
    true
}

async fn run_post_plan_hooks(steps: &[Arc<TestStep>]) {
    for step in steps.iter().rev().filter(|s| s.hooks().post_plan_run) {
        let result = AssertUnwindSafe(step.body().post_plan_run())
            .catch_unwind()
            .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("步骤 {} 的运行后钩子失败: {:#}", step.name(), e),
            Err(_) => warn!("步骤 {} 的运行后钩子发生 panic", step.name()),
        }
    }
}
