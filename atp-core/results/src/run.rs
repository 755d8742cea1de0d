//! 运行记录
//!
//! [`PlanRun`] 是一次计划执行的根记录，[`StepRun`] 在步骤每次开始执行时创建。
//! 两者在完成后除参数包外不再改变；参数包允许多个消费者并发写入不同的键。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use atp_common::{AtomicVerdict, RunId, StepId, Verdict};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::table::Artifact;

/// 并发安全的键值参数包
#[derive(Debug, Default)]
pub struct ParameterBag {
    entries: DashMap<String, Value>,
}

impl ParameterBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按键排序的快照
    pub fn snapshot(&self) -> IndexMap<String, Value> {
        let mut entries: Vec<(String, Value)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct Completion {
    finished_at: DateTime<Utc>,
    duration: Duration,
}

/// 步骤运行记录
#[derive(Debug)]
pub struct StepRun {
    /// 运行 ID
    pub id: RunId,
    /// 父运行 ID (计划运行或父步骤运行)
    pub parent_id: RunId,
    /// 步骤 ID
    pub step_id: StepId,
    /// 步骤名称
    pub step_name: String,
    /// 第几次执行 (从 1 开始)
    pub attempt: u32,
    /// 开始时间
    pub started_at: DateTime<Utc>,
    /// 开始时的参数快照
    pub parameters: IndexMap<String, Value>,
    bag: ParameterBag,
    verdict: AtomicVerdict,
    clock: Instant,
    completion: OnceLock<Completion>,
}

impl StepRun {
    pub fn new(
        step_id: StepId,
        step_name: impl Into<String>,
        parent_id: RunId,
        attempt: u32,
        parameters: IndexMap<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id,
            step_id,
            step_name: step_name.into(),
            attempt,
            started_at: Utc::now(),
            parameters,
            bag: ParameterBag::new(),
            verdict: AtomicVerdict::default(),
            clock: Instant::now(),
            completion: OnceLock::new(),
        }
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict.load()
    }

    /// 升级判定；运行完成后判定不再改变
    pub fn upgrade_verdict(&self, verdict: Verdict) -> Verdict {
        if self.is_completed() {
            debug!("步骤运行 {} 已完成, 忽略判定升级: {}", self.id, verdict);
            return self.verdict();
        }
        self.verdict.upgrade(verdict)
    }

    pub fn bag(&self) -> &ParameterBag {
        &self.bag
    }

    /// 标记完成，重复调用无效果
    pub fn complete(&self) -> bool {
        self.completion
            .set(Completion {
                finished_at: Utc::now(),
                duration: self.clock.elapsed(),
            })
            .is_ok()
    }

    pub fn is_completed(&self) -> bool {
        self.completion.get().is_some()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.completion.get().map(|c| c.duration)
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.completion.get().map(|c| c.finished_at)
    }
}

/// 计划运行记录
#[derive(Debug)]
pub struct PlanRun {
    /// 运行 ID
    pub id: RunId,
    /// 计划名称
    pub plan_name: String,
    /// 开始时间
    pub started_at: DateTime<Utc>,
    /// 外部元数据 (由前端传入)
    pub metadata: IndexMap<String, Value>,
    bag: ParameterBag,
    verdict: AtomicVerdict,
    failed_to_start: AtomicBool,
    artifacts: Mutex<Vec<Arc<Artifact>>>,
    consumers: Mutex<Vec<String>>,
    clock: Instant,
    completion: OnceLock<Completion>,
}

impl PlanRun {
    pub fn new(plan_name: impl Into<String>, metadata: IndexMap<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            plan_name: plan_name.into(),
            started_at: Utc::now(),
            metadata,
            bag: ParameterBag::new(),
            verdict: AtomicVerdict::default(),
            failed_to_start: AtomicBool::new(false),
            artifacts: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
            clock: Instant::now(),
            completion: OnceLock::new(),
        }
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict.load()
    }

    pub fn upgrade_verdict(&self, verdict: Verdict) -> Verdict {
        self.verdict.upgrade(verdict)
    }

    /// 标记运行未能开始 (资源解析或打开失败)，判定升级为 Error
    pub fn mark_failed_to_start(&self) {
        self.failed_to_start.store(true, Ordering::Release);
        self.verdict.upgrade(Verdict::Error);
    }

    pub fn failed_to_start(&self) -> bool {
        self.failed_to_start.load(Ordering::Acquire)
    }

    pub fn bag(&self) -> &ParameterBag {
        &self.bag
    }

    /// 追加附件 (只增不减)
    pub fn add_artifact(&self, artifact: Arc<Artifact>) {
        self.artifacts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(artifact);
    }

    pub fn artifacts(&self) -> Vec<Arc<Artifact>> {
        self.artifacts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 记录本次运行挂接的消费者
    pub fn record_consumer(&self, name: impl Into<String>) {
        self.consumers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(name.into());
    }

    pub fn consumer_names(&self) -> Vec<String> {
        self.consumers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn complete(&self) -> bool {
        self.completion
            .set(Completion {
                finished_at: Utc::now(),
                duration: self.clock.elapsed(),
            })
            .is_ok()
    }

    pub fn is_completed(&self) -> bool {
        self.completion.get().is_some()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.completion.get().map(|c| c.duration)
    }

    /// 进程退出码
    pub fn exit_code(&self) -> i32 {
        self.verdict().exit_code()
    }

    pub fn summary(&self) -> PlanRunSummary {
        PlanRunSummary {
            id: self.id,
            plan_name: self.plan_name.clone(),
            verdict: self.verdict(),
            failed_to_start: self.failed_to_start(),
            started_at: self.started_at,
            duration_ms: self.duration().map(|d| d.as_millis() as u64),
            artifact_count: self.artifacts().len(),
        }
    }
}

/// 计划运行摘要
#[derive(Debug, Clone, Serialize)]
pub struct PlanRunSummary {
    pub id: RunId,
    pub plan_name: String,
    pub verdict: Verdict,
    pub failed_to_start: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: Option<u64>,
    pub artifact_count: usize,
}
