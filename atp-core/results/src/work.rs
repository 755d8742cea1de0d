//! 管道工作项

use std::sync::Arc;

use atp_common::RunId;

use crate::run::{PlanRun, StepRun};
use crate::table::{Artifact, ResultTable};

/// 发往结果消费者的事件或结果行
#[derive(Debug, Clone)]
pub enum WorkItem {
    PlanStarted(Arc<PlanRun>),
    StepStarted(Arc<StepRun>),
    Result {
        run: Arc<StepRun>,
        table: ResultTable,
    },
    Artifact {
        run_id: RunId,
        artifact: Arc<Artifact>,
    },
    StepCompleted(Arc<StepRun>),
    PlanCompleted(Arc<PlanRun>),
}

impl WorkItem {
    /// 所属运行的 ID
    pub fn owner_run(&self) -> RunId {
        match self {
            Self::PlanStarted(run) | Self::PlanCompleted(run) => run.id,
            Self::StepStarted(run) | Self::StepCompleted(run) => run.id,
            Self::Result { run, .. } => run.id,
            Self::Artifact { run_id, .. } => *run_id,
        }
    }

    /// 事件类型名称
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlanStarted(_) => "plan_started",
            Self::StepStarted(_) => "step_started",
            Self::Result { .. } => "result",
            Self::Artifact { .. } => "artifact",
            Self::StepCompleted(_) => "step_completed",
            Self::PlanCompleted(_) => "plan_completed",
        }
    }

    /// 两个结果项是否可以合并 (同一运行、同一表布局)
    pub fn can_merge(&self, next: &WorkItem) -> bool {
        match (self, next) {
            (
                Self::Result { run, table },
                Self::Result {
                    run: next_run,
                    table: next_table,
                },
            ) => run.id == next_run.id && table.has_same_layout(next_table),
            _ => false,
        }
    }

    /// 把下一个结果项的行并入当前项
    pub fn merge_from(&mut self, next: &WorkItem) -> bool {
        if !self.can_merge(next) {
            return false;
        }
        match (self, next) {
            (Self::Result { table, .. }, Self::Result { table: next_table, .. }) => {
                table.append(next_table)
            }
            _ => false,
        }
    }
}
