use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::step::StepBody;
use crate::step_context::StepContext;

/// 等待指定时长，计划被取消时提前结束并判定为 Aborted
#[derive(Debug, Clone, Copy)]
pub struct DelayStep {
    pub duration: Duration,
}

impl DelayStep {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl StepBody for DelayStep {
    async fn run(&self, cx: &mut StepContext) -> anyhow::Result<()> {
        cx.sleep(self.duration).await?;
        Ok(())
    }

    fn parameters(&self) -> IndexMap<String, Value> {
        IndexMap::from([(
            "duration_ms".to_string(),
            json!(self.duration.as_millis() as u64),
        )])
    }
}
