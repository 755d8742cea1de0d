//! 测试用资源

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use atp_resource::{Resource, ResourceField, ResourceRef};

pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// 模拟仪器，把打开/关闭动作记入共享日志
pub struct Instrument {
    name: String,
    log: EventLog,
    fields: Mutex<Vec<ResourceField>>,
    open_delay: Duration,
    fail_open: bool,
    fail_close: bool,
    opens: AtomicUsize,
}

impl Instrument {
    pub fn new(name: &str, log: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            fields: Mutex::new(Vec::new()),
            open_delay: Duration::ZERO,
            fail_open: false,
            fail_close: false,
            opens: AtomicUsize::new(0),
        }
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn link(&self, field: ResourceField) {
        self.fields.lock().unwrap().push(field);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resource for Instrument {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self) -> anyhow::Result<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        if self.fail_open {
            anyhow::bail!("{} 无响应", self.name);
        }
        self.log.lock().unwrap().push(format!("open:{}", self.name));
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        if self.fail_close {
            anyhow::bail!("{} 关闭超时", self.name);
        }
        self.log.lock().unwrap().push(format!("close:{}", self.name));
        Ok(())
    }

    fn fields(&self) -> Vec<ResourceField> {
        self.fields.lock().unwrap().clone()
    }
}

pub fn as_ref(instrument: &Arc<Instrument>) -> ResourceRef {
    instrument.clone()
}
