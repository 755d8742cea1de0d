use async_trait::async_trait;
use atp_common::Verdict;
use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::step::StepBody;
use crate::step_context::StepContext;

/// 直接给出固定判定
#[derive(Debug, Clone, Copy)]
pub struct VerdictStep {
    pub verdict: Verdict,
}

impl VerdictStep {
    pub fn new(verdict: Verdict) -> Self {
        Self { verdict }
    }
}

#[async_trait]
impl StepBody for VerdictStep {
    async fn run(&self, cx: &mut StepContext) -> anyhow::Result<()> {
        cx.upgrade_verdict(self.verdict);
        Ok(())
    }

    fn parameters(&self) -> IndexMap<String, Value> {
        IndexMap::from([("verdict".to_string(), json!(self.verdict))])
    }
}
