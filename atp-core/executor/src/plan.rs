//! 测试计划

use std::collections::HashSet;
use std::sync::Arc;

use atp_common::StepId;
use atp_resource::{ResourceKey, ResourceRef};

use crate::break_condition::BreakCondition;
use crate::step::TestStep;
use crate::{ExecutorError, Result};

/// 测试计划 (步骤树的根)
#[derive(Debug)]
pub struct TestPlan {
    /// 计划名称
    pub name: String,
    steps: Vec<Arc<TestStep>>,
    break_condition: BreakCondition,
}

impl TestPlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            break_condition: BreakCondition::INHERIT,
        }
    }

    pub fn with_step(mut self, step: TestStep) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn with_steps(self, steps: impl IntoIterator<Item = TestStep>) -> Self {
        steps.into_iter().fold(self, |plan, step| plan.with_step(step))
    }

    /// 计划级中断条件 (所有顶层步骤的祖先)
    pub fn with_break_condition(mut self, condition: BreakCondition) -> Self {
        self.break_condition = condition;
        self
    }

    pub fn break_condition(&self) -> BreakCondition {
        self.break_condition
    }

    /// 顶层步骤
    pub fn steps(&self) -> &[Arc<TestStep>] {
        &self.steps
    }

    /// 先序遍历全部步骤
    pub fn walk(&self) -> Vec<Arc<TestStep>> {
        let mut out = Vec::new();
        let mut stack: Vec<Arc<TestStep>> = self.steps.iter().rev().cloned().collect();
        while let Some(step) = stack.pop() {
            stack.extend(step.children().iter().rev().cloned());
            out.push(step);
        }
        out
    }

    /// 先序遍历将会执行的步骤 (禁用步骤的子树整体跳过)
    pub fn enabled_steps(&self) -> Vec<Arc<TestStep>> {
        let mut out = Vec::new();
        let mut stack: Vec<Arc<TestStep>> = self
            .steps
            .iter()
            .rev()
            .filter(|s| s.is_enabled())
            .cloned()
            .collect();
        while let Some(step) = stack.pop() {
            stack.extend(
                step.children()
                    .iter()
                    .rev()
                    .filter(|s| s.is_enabled())
                    .cloned(),
            );
            out.push(step);
        }
        out
    }

    pub fn find_step(&self, id: StepId) -> Option<Arc<TestStep>> {
        self.walk().into_iter().find(|s| s.id() == id)
    }

    /// 按 ID 获取步骤，不存在时返回错误
    pub fn require_step(&self, id: StepId) -> Result<Arc<TestStep>> {
        self.find_step(id)
            .ok_or_else(|| ExecutorError::StepNotFound(id.to_string()))
    }

    /// 查找父步骤，顶层步骤返回 None
    pub fn parent_of(&self, id: StepId) -> Option<Arc<TestStep>> {
        let parent_id = self.find_step(id)?.parent_id()?;
        self.find_step(parent_id)
    }

    /// 启用步骤直接引用的资源 (按首次出现顺序去重)
    pub fn referenced_resources(&self) -> Vec<ResourceRef> {
        let mut seen = HashSet::new();
        self.enabled_steps()
            .iter()
            .flat_map(|step| step.body().resources())
            .filter(|resource| seen.insert(ResourceKey::of(resource)))
            .collect()
    }

    /// 重置全部步骤的运行状态
    pub fn reset(&self) {
        for step in &self.steps {
            step.reset();
        }
    }
}
