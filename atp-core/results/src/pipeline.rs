//! 结果管道
//!
//! 发布方先获取信号量许可再入队，许可随工作项一起分发给每个消费者的队列，
//! 所有消费者处理完该项后许可才释放。在途工作项数量因此不会超过
//! `max_in_flight`，慢消费者会让发布方阻塞而不是让队列无限增长。

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use atp_common::RunId;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::consumer::{ConsumerFailure, ResultConsumer};
use crate::run::PlanRun;
use crate::work::WorkItem;
use crate::{PipelineError, Result};

/// 结果管道配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 最大在途工作项数
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// 是否合并同一运行连续发布的同布局结果表
    #[serde(default = "default_merge_results")]
    pub merge_results: bool,
}

fn default_max_in_flight() -> usize {
    500
}

/// 在途上限允许的最大值 (受信号量许可数与 `acquire_many` 的 u32 参数限制)
pub const MAX_IN_FLIGHT_LIMIT: usize = if Semaphore::MAX_PERMITS < u32::MAX as usize {
    Semaphore::MAX_PERMITS
} else {
    u32::MAX as usize
};

fn default_merge_results() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            merge_results: default_merge_results(),
        }
    }
}

impl PipelineConfig {
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_merge_results(mut self, merge_results: bool) -> Self {
        self.merge_results = merge_results;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 || self.max_in_flight > MAX_IN_FLIGHT_LIMIT {
            return Err(PipelineError::InvalidConfig(format!(
                "max_in_flight 必须在 1..={} 之间, 当前为 {}",
                MAX_IN_FLIGHT_LIMIT, self.max_in_flight
            )));
        }
        Ok(())
    }
}

/// 已挂接消费者的 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(u64);

struct Envelope {
    item: WorkItem,
    _permit: OwnedSemaphorePermit,
}

struct Lane {
    id: ConsumerId,
    name: String,
    tx: mpsc::UnboundedSender<Arc<Envelope>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// 结果管道
pub struct ResultPipeline {
    config: PipelineConfig,
    capacity: usize,
    permits: Arc<Semaphore>,
    run: Option<Arc<PlanRun>>,
    lanes: Mutex<Vec<Lane>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    failures: Arc<Mutex<Vec<ConsumerFailure>>>,
    next_id: AtomicU64,
    peak: AtomicUsize,
    closed: AtomicBool,
}

impl ResultPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let capacity = config.max_in_flight.clamp(1, MAX_IN_FLIGHT_LIMIT);
        if capacity != config.max_in_flight {
            warn!(
                "max_in_flight = {} 超出范围, 按 {} 处理",
                config.max_in_flight, capacity
            );
        }
        Self {
            config,
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
            run: None,
            lanes: Mutex::new(Vec::new()),
            workers: Mutex::new(Vec::new()),
            failures: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
            peak: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// 绑定计划运行，此后挂接的每个消费者都会登记到该运行中
    pub fn for_run(mut self, run: Arc<PlanRun>) -> Self {
        self.run = Some(run);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 挂接消费者，只接收挂接之后发布的工作项
    pub fn attach(&self, consumer: Arc<dyn ResultConsumer>) -> Result<ConsumerId> {
        if self.is_closed() {
            return Err(PipelineError::Closed);
        }

        let id = ConsumerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = consumer.name().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = tokio::spawn(run_lane(
            name.clone(),
            consumer,
            rx,
            self.config.merge_results,
            self.failures.clone(),
        ));

        lock(&self.lanes).push(Lane {
            id,
            name: name.clone(),
            tx,
        });
        lock(&self.workers).push(worker);
        if let Some(run) = &self.run {
            run.record_consumer(name.clone());
        }

        info!("挂接结果消费者: {}", name);
        Ok(id)
    }

    /// 卸下消费者
    ///
    /// 已进入该消费者队列的工作项仍按原顺序投递完毕。
    pub fn detach(&self, id: ConsumerId) -> Result<()> {
        let mut lanes = lock(&self.lanes);
        let index = lanes
            .iter()
            .position(|lane| lane.id == id)
            .ok_or(PipelineError::ConsumerNotFound)?;
        let lane = lanes.remove(index);
        info!("卸下结果消费者: {}", lane.name);
        Ok(())
    }

    /// 发布工作项，在途数量达到上限时等待
    pub async fn publish(&self, item: WorkItem) -> Result<()> {
        if self.is_closed() {
            return Err(PipelineError::Closed);
        }

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::Closed)?;

        if self.is_closed() {
            return Err(PipelineError::Closed);
        }

        self.peak.fetch_max(self.in_flight(), Ordering::Relaxed);

        let envelope = Arc::new(Envelope {
            item,
            _permit: permit,
        });
        for lane in lock(&self.lanes).iter() {
            if lane.tx.send(envelope.clone()).is_err() {
                debug!("结果消费者 {} 的队列已关闭", lane.name);
            }
        }
        Ok(())
    }

    /// 等待当前全部在途工作项投递完毕
    pub async fn flush(&self) {
        let Ok(count) = u32::try_from(self.capacity) else {
            warn!("在途上限 {} 超出 u32 范围, 无法等待排空", self.capacity);
            return;
        };
        if let Ok(all) = self.permits.acquire_many(count).await {
            drop(all);
        }
    }

    /// 关闭管道并等待全部消费者处理完已入队的工作项
    pub async fn drain_and_close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let lanes = std::mem::take(&mut *lock(&self.lanes));
        debug!("关闭结果管道, 等待 {} 个消费者处理完毕", lanes.len());
        drop(lanes);

        let workers = std::mem::take(&mut *lock(&self.workers));
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("结果消费者任务异常退出: {}", e);
            }
        }

        self.permits.close();
        info!("结果管道已关闭, 峰值在途数: {}", self.peak_in_flight());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 当前在途工作项数
    pub fn in_flight(&self) -> usize {
        self.capacity
            .saturating_sub(self.permits.available_permits())
    }

    /// 运行期间观察到的最大在途数
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn consumer_names(&self) -> Vec<String> {
        lock(&self.lanes).iter().map(|lane| lane.name.clone()).collect()
    }

    /// 消费者回调失败记录
    pub fn failures(&self) -> Vec<ConsumerFailure> {
        lock(&self.failures).clone()
    }
}

async fn run_lane(
    name: String,
    consumer: Arc<dyn ResultConsumer>,
    mut rx: mpsc::UnboundedReceiver<Arc<Envelope>>,
    merge_results: bool,
    failures: Arc<Mutex<Vec<ConsumerFailure>>>,
) {
    let mut pending: Option<Arc<Envelope>> = None;

    loop {
        let envelope = match pending.take() {
            Some(envelope) => envelope,
            None => match rx.recv().await {
                Some(envelope) => envelope,
                None => break,
            },
        };

        // 合并紧随其后的同布局结果，许可在投递后统一释放
        let mut merged: Option<WorkItem> = None;
        let mut absorbed: Vec<Arc<Envelope>> = Vec::new();
        if merge_results && matches!(envelope.item, WorkItem::Result { .. }) {
            loop {
                match rx.try_recv() {
                    Ok(next) if envelope.item.can_merge(&next.item) => {
                        merged
                            .get_or_insert_with(|| envelope.item.clone())
                            .merge_from(&next.item);
                        absorbed.push(next);
                    }
                    Ok(next) => {
                        pending = Some(next);
                        break;
                    }
                    Err(_) => break,
                }
            }
        }

        let item = merged.as_ref().unwrap_or(&envelope.item);
        let outcome = AssertUnwindSafe(deliver(consumer.as_ref(), item))
            .catch_unwind()
            .await;

        let message = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(panic) => Some(panic_text(panic)),
        };
        if let Some(message) = message {
            warn!(
                "结果消费者 {} 处理 {} 失败: {}",
                name,
                item.kind(),
                message
            );
            record_failure(&failures, &name, item, message);
        }

        drop(absorbed);
        drop(envelope);
    }

    debug!("结果消费者 {} 已停止", name);
}

async fn deliver(consumer: &dyn ResultConsumer, item: &WorkItem) -> anyhow::Result<()> {
    match item {
        WorkItem::PlanStarted(run) => consumer.on_plan_start(run).await,
        WorkItem::StepStarted(run) => consumer.on_step_start(run).await,
        WorkItem::Result { run, table } => consumer.on_result(run, table).await,
        WorkItem::Artifact { run_id, artifact } => consumer.on_artifact(*run_id, artifact).await,
        WorkItem::StepCompleted(run) => consumer.on_step_end(run).await,
        WorkItem::PlanCompleted(run) => consumer.on_plan_end(run).await,
    }
}

fn record_failure(
    failures: &Mutex<Vec<ConsumerFailure>>,
    consumer: &str,
    item: &WorkItem,
    message: String,
) {
    let run_id: RunId = item.owner_run();
    lock(failures).push(ConsumerFailure {
        consumer: consumer.to_string(),
        event: item.kind(),
        run_id,
        message,
    });
}

fn panic_text(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}
