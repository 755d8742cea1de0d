//! 测试用步骤与资源

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use atp_common::Verdict;
use atp_executor::{StepBody, StepContext, StepHooks};
use atp_resource::{Resource, ResourceField, ResourceRef, ResourceState};

pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

/// 前 `failures` 次执行给出 `failure` 判定 (Error 以返回错误表示)，之后通过
pub struct Flaky {
    failures: u32,
    failure: Verdict,
    calls: AtomicU32,
    resets: AtomicU32,
}

impl Flaky {
    pub fn new(failures: u32) -> Self {
        Self::with_verdict(failures, Verdict::Error)
    }

    pub fn with_verdict(failures: u32, failure: Verdict) -> Self {
        Self {
            failures,
            failure,
            calls: AtomicU32::new(0),
            resets: AtomicU32::new(0),
        }
    }

    pub fn resets(&self) -> u32 {
        self.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepBody for Flaky {
    async fn run(&self, cx: &mut StepContext) -> anyhow::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            if self.failure == Verdict::Error {
                anyhow::bail!("第 {} 次测量失败", call);
            }
            cx.upgrade_verdict(self.failure);
            return Ok(());
        }
        cx.upgrade_verdict(Verdict::Pass);
        Ok(())
    }

    fn hooks(&self) -> StepHooks {
        StepHooks::none().with_attempt_reset()
    }

    fn reset_attempt(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// 检查资源状态：状态符合预期时通过，否则失败
pub struct Probe {
    resource: ResourceRef,
    uses: bool,
    expect_open: bool,
}

impl Probe {
    /// 声明使用该资源，期望执行时已打开
    pub fn using(resource: ResourceRef) -> Self {
        Self {
            resource,
            uses: true,
            expect_open: true,
        }
    }

    /// 不声明使用该资源，只观察其状态
    pub fn observing(resource: ResourceRef, expect_open: bool) -> Self {
        Self {
            resource,
            uses: false,
            expect_open,
        }
    }
}

#[async_trait]
impl StepBody for Probe {
    async fn run(&self, cx: &mut StepContext) -> anyhow::Result<()> {
        let open = cx.resource_state(&self.resource) == ResourceState::Open;
        if open == self.expect_open {
            cx.upgrade_verdict(Verdict::Pass);
        } else {
            cx.upgrade_verdict(Verdict::Fail);
        }
        Ok(())
    }

    fn resources(&self) -> Vec<ResourceRef> {
        if self.uses {
            vec![self.resource.clone()]
        } else {
            Vec::new()
        }
    }
}

/// 记录运行前/运行后钩子调用的步骤
pub struct Hooked {
    name: &'static str,
    log: EventLog,
    fail_pre: bool,
}

impl Hooked {
    pub fn new(name: &'static str, log: &EventLog) -> Self {
        Self {
            name,
            log: log.clone(),
            fail_pre: false,
        }
    }

    pub fn failing_pre(mut self) -> Self {
        self.fail_pre = true;
        self
    }
}

#[async_trait]
impl StepBody for Hooked {
    async fn run(&self, cx: &mut StepContext) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(format!("run:{}", self.name));
        cx.upgrade_verdict(Verdict::Pass);
        Ok(())
    }

    fn hooks(&self) -> StepHooks {
        StepHooks::none().with_pre_plan_run().with_post_plan_run()
    }

    async fn pre_plan_run(&self) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(format!("pre:{}", self.name));
        if self.fail_pre {
            anyhow::bail!("{} 校准失败", self.name);
        }
        Ok(())
    }

    async fn post_plan_run(&self) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(format!("post:{}", self.name));
        Ok(())
    }
}

/// 模拟仪器
pub struct Instrument {
    name: String,
    log: EventLog,
    fields: Mutex<Vec<ResourceField>>,
    fail_open: bool,
    fail_close: bool,
    open_delay: Option<Duration>,
    opens: AtomicUsize,
}

impl Instrument {
    pub fn new(name: &str, log: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            fields: Mutex::new(Vec::new()),
            fail_open: false,
            fail_close: false,
            open_delay: None,
            opens: AtomicUsize::new(0),
        }
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// 打开前等待 (模拟上电缓慢的设备)
    pub fn slow_open(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
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
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
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
