//! 测试步骤
//!
//! 步骤树是普通的所有权树：父步骤持有子步骤，子步骤只保存父步骤 ID。
//! 步骤的行为由 [`StepBody`] 提供，生命周期钩子是否需要调用由构造时
//! 捕获的 [`StepHooks`] 能力标志决定。

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use atp_common::{AtomicVerdict, StepId, Verdict};
use atp_resource::ResourceRef;
use atp_results::StepRun;
use indexmap::IndexMap;
use serde_json::Value;
use uuid::Uuid;

use crate::break_condition::BreakCondition;
use crate::step_context::StepContext;

/// 步骤的可选生命周期钩子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepHooks {
    /// 计划运行开始前调用 `pre_plan_run`
    pub pre_plan_run: bool,
    /// 计划运行结束后调用 `post_plan_run`
    pub post_plan_run: bool,
    /// 每次执行 (含重试) 前调用 `reset_attempt`
    pub attempt_reset: bool,
}

impl StepHooks {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_pre_plan_run(mut self) -> Self {
        self.pre_plan_run = true;
        self
    }

    pub fn with_post_plan_run(mut self) -> Self {
        self.post_plan_run = true;
        self
    }

    pub fn with_attempt_reset(mut self) -> Self {
        self.attempt_reset = true;
        self
    }
}

/// 步骤行为
#[async_trait]
pub trait StepBody: Send + Sync + 'static {
    /// 执行一次步骤
    ///
    /// 返回错误时判定为 Error；由取消引起的错误判定为 Aborted。
    /// 正常返回而未设置判定时保持 NotSet。
    async fn run(&self, cx: &mut StepContext) -> anyhow::Result<()>;

    /// 步骤使用的资源
    fn resources(&self) -> Vec<ResourceRef> {
        Vec::new()
    }

    /// 开始执行时记录到步骤运行记录中的参数
    fn parameters(&self) -> IndexMap<String, Value> {
        IndexMap::new()
    }

    /// 声明需要调用的钩子
    fn hooks(&self) -> StepHooks {
        StepHooks::none()
    }

    async fn pre_plan_run(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn post_plan_run(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn reset_attempt(&self) {}
}

/// 测试步骤
pub struct TestStep {
    id: StepId,
    name: String,
    enabled: bool,
    break_condition: BreakCondition,
    max_attempts: Option<u32>,
    parent: Option<StepId>,
    children: Vec<Arc<TestStep>>,
    body: Arc<dyn StepBody>,
    hooks: StepHooks,
    verdict: AtomicVerdict,
    attempts: AtomicU32,
    last_run: Mutex<Option<Arc<StepRun>>>,
}

impl TestStep {
    pub fn new(name: impl Into<String>, body: impl StepBody) -> Self {
        Self::from_body(name, Arc::new(body))
    }

    pub fn from_body(name: impl Into<String>, body: Arc<dyn StepBody>) -> Self {
        let hooks = body.hooks();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            enabled: true,
            break_condition: BreakCondition::INHERIT,
            max_attempts: None,
            parent: None,
            children: Vec::new(),
            body,
            hooks,
            verdict: AtomicVerdict::default(),
            attempts: AtomicU32::new(0),
            last_run: Mutex::new(None),
        }
    }

    /// 添加子步骤
    pub fn with_child(mut self, mut child: TestStep) -> Self {
        child.parent = Some(self.id);
        self.children.push(Arc::new(child));
        self
    }

    pub fn with_children(self, children: impl IntoIterator<Item = TestStep>) -> Self {
        children.into_iter().fold(self, |step, child| step.with_child(child))
    }

    pub fn with_break_condition(mut self, condition: BreakCondition) -> Self {
        self.break_condition = condition;
        self
    }

    /// 最大执行次数 (含首次)，覆盖引擎默认值
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn id(&self) -> StepId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn break_condition(&self) -> BreakCondition {
        self.break_condition
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    pub fn parent_id(&self) -> Option<StepId> {
        self.parent
    }

    pub fn children(&self) -> &[Arc<TestStep>] {
        &self.children
    }

    pub fn body(&self) -> &Arc<dyn StepBody> {
        &self.body
    }

    pub fn hooks(&self) -> StepHooks {
        self.hooks
    }

    /// 最近一次执行的判定
    pub fn verdict(&self) -> Verdict {
        self.verdict.load()
    }

    /// 本次计划运行中的执行次数 (含重试)
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    pub fn last_run(&self) -> Option<Arc<StepRun>> {
        self.last_run
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn begin_attempt(&self, run: Arc<StepRun>) {
        self.attempts.fetch_add(1, Ordering::AcqRel);
        *self.last_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(run);
    }

    /// 记录一次执行的最终判定；每次执行从 NotSet 重新开始
    pub(crate) fn record_verdict(&self, verdict: Verdict) {
        self.verdict.reset();
        self.verdict.upgrade(verdict);
    }

    /// 两次计划运行之间重置运行状态 (递归)
    pub fn reset(&self) {
        self.verdict.reset();
        self.attempts.store(0, Ordering::Release);
        *self.last_run.lock().unwrap_or_else(|e| e.into_inner()) = None;
        for child in &self.children {
            child.reset();
        }
    }
}

impl std::fmt::Debug for TestStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestStep")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("break_condition", &self.break_condition)
            .field("children", &self.children.len())
            .finish()
    }
}
