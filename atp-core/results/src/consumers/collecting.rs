//! 内存收集消费者

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use atp_common::{RunId, Verdict};

use crate::consumer::ResultConsumer;
use crate::run::{PlanRun, StepRun};
use crate::table::{Artifact, ResultTable};

/// 收集到的事件
#[derive(Debug, Clone, PartialEq)]
pub enum CollectedEvent {
    PlanStarted {
        run_id: RunId,
    },
    StepStarted {
        run_id: RunId,
        step: String,
    },
    Result {
        run_id: RunId,
        table: ResultTable,
    },
    Artifact {
        run_id: RunId,
        name: String,
    },
    StepCompleted {
        run_id: RunId,
        step: String,
        verdict: Verdict,
    },
    PlanCompleted {
        run_id: RunId,
        verdict: Verdict,
    },
}

/// 把收到的全部事件按顺序保存在内存中
pub struct CollectingConsumer {
    name: String,
    delay: Duration,
    events: Mutex<Vec<CollectedEvent>>,
}

impl CollectingConsumer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: Duration::ZERO,
            events: Mutex::new(Vec::new()),
        }
    }

    /// 每个事件处理前等待一段时间，模拟慢消费者
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn events(&self) -> Vec<CollectedEvent> {
        self.lock().clone()
    }

    /// 全部结果表 (按投递顺序)
    pub fn results(&self) -> Vec<(RunId, ResultTable)> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                CollectedEvent::Result { run_id, table } => Some((*run_id, table.clone())),
                _ => None,
            })
            .collect()
    }

    /// 结果行总数
    pub fn row_count(&self) -> usize {
        self.results().iter().map(|(_, t)| t.row_count()).sum()
    }

    /// 已完成步骤的名称和判定 (按完成顺序)
    pub fn step_verdicts(&self) -> Vec<(String, Verdict)> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                CollectedEvent::StepCompleted { step, verdict, .. } => {
                    Some((step.clone(), *verdict))
                }
                _ => None,
            })
            .collect()
    }

    pub fn plan_verdict(&self) -> Option<Verdict> {
        self.lock().iter().find_map(|event| match event {
            CollectedEvent::PlanCompleted { verdict, .. } => Some(*verdict),
            _ => None,
        })
    }

    async fn record(&self, event: CollectedEvent) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.lock().push(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CollectedEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ResultConsumer for CollectingConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_plan_start(&self, run: &Arc<PlanRun>) -> anyhow::Result<()> {
        self.record(CollectedEvent::PlanStarted { run_id: run.id }).await;
        Ok(())
    }

    async fn on_step_start(&self, run: &Arc<StepRun>) -> anyhow::Result<()> {
        self.record(CollectedEvent::StepStarted {
            run_id: run.id,
            step: run.step_name.clone(),
        })
        .await;
        Ok(())
    }

    async fn on_result(&self, run: &Arc<StepRun>, table: &ResultTable) -> anyhow::Result<()> {
        self.record(CollectedEvent::Result {
            run_id: run.id,
            table: table.clone(),
        })
        .await;
        Ok(())
    }

    async fn on_step_end(&self, run: &Arc<StepRun>) -> anyhow::Result<()> {
        self.record(CollectedEvent::StepCompleted {
            run_id: run.id,
            step: run.step_name.clone(),
            verdict: run.verdict(),
        })
        .await;
        Ok(())
    }

    async fn on_plan_end(&self, run: &Arc<PlanRun>) -> anyhow::Result<()> {
        self.record(CollectedEvent::PlanCompleted {
            run_id: run.id,
            verdict: run.verdict(),
        })
        .await;
        Ok(())
    }

    async fn on_artifact(&self, run_id: RunId, artifact: &Arc<Artifact>) -> anyhow::Result<()> {
        self.record(CollectedEvent::Artifact {
            run_id,
            name: artifact.name.clone(),
        })
        .await;
        Ok(())
    }
}
