//! 资源生命周期管理
//!
//! [`LifecycleManager`] 是唯一会改变资源打开状态的组件。每个资源在一次运行中
//! 最多打开一次：打开结果 (包括失败) 缓存在 `OnceCell` 中，并发的获取请求
//! 等待同一次打开。关闭按打开的逆序进行，仍被其他已打开资源依赖的资源延后关闭。

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use atp_context::handle::panic_message;
use atp_context::ExecutionContext;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::graph::{ResourceGraph, ResourceNode};
use crate::resource::{ResourceKey, ResourceRef};
use crate::state::ResourceState;
use crate::{ResourceError, Result};

/// 资源生命周期策略类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStrategy {
    /// 运行开始前打开全部资源
    #[default]
    Eager,
    /// 步骤首次使用时打开
    Lazy,
}

impl ResourceStrategy {
    /// 获取中文显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Eager => "急切打开",
            Self::Lazy => "按需打开",
        }
    }
}

impl std::str::FromStr for ResourceStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "eager" => Ok(Self::Eager),
            "lazy" => Ok(Self::Lazy),
            _ => Err(format!("未知的资源策略: {}", s)),
        }
    }
}

/// 关闭报告
#[derive(Debug, Default, Clone)]
pub struct CloseReport {
    /// 成功关闭的资源 (按关闭顺序)
    pub closed: Vec<String>,
    /// 关闭失败
    pub failures: Vec<ResourceError>,
}

impl CloseReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct ResourceSlot {
    key: ResourceKey,
    resource: ResourceRef,
    state: Mutex<ResourceState>,
    dependencies: Mutex<Vec<ResourceKey>>,
    opened: OnceCell<Result<()>>,
}

impl ResourceSlot {
    fn new(resource: ResourceRef) -> Self {
        Self {
            key: ResourceKey::of(&resource),
            resource,
            state: Mutex::new(ResourceState::Closed),
            dependencies: Mutex::new(Vec::new()),
            opened: OnceCell::new(),
        }
    }

    fn state(&self) -> ResourceState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ResourceState) {
        *lock(&self.state) = state;
    }

    fn depends_on(&self, key: ResourceKey) -> bool {
        self.key != key && lock(&self.dependencies).contains(&key)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// 资源生命周期管理器
#[derive(Default)]
pub struct LifecycleManager {
    slots: Mutex<IndexMap<ResourceKey, Arc<ResourceSlot>>>,
    opened: Mutex<Vec<Arc<ResourceSlot>>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 查询资源状态，未登记的资源视为未打开
    pub fn state_of(&self, resource: &ResourceRef) -> ResourceState {
        lock(&self.slots)
            .get(&ResourceKey::of(resource))
            .map(|slot| slot.state())
            .unwrap_or_default()
    }

    /// 已打开资源的数量
    pub fn open_count(&self) -> usize {
        lock(&self.opened).len()
    }

    fn slot(&self, resource: &ResourceRef) -> Arc<ResourceSlot> {
        lock(&self.slots)
            .entry(ResourceKey::of(resource))
            .or_insert_with(|| Arc::new(ResourceSlot::new(resource.clone())))
            .clone()
    }

    /// 打开图中的全部资源
    ///
    /// 互不依赖的资源并发打开；每个资源只等待它的 `Before` 依赖。
    /// 全部尝试结束后返回第一个错误。
    pub async fn open_graph(&self, graph: &ResourceGraph, cx: &ExecutionContext) -> Result<()> {
        let results = join_all(graph.nodes().map(|node| self.ensure_open(graph, node, cx))).await;
        results.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(())
    }

    fn ensure_open<'a>(
        &'a self,
        graph: &'a ResourceGraph,
        node: &'a ResourceNode,
        cx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let slot = self.slot(&node.resource);
            slot.opened
                .get_or_init(|| self.open_node(graph, node, slot.clone(), cx))
                .await
                .clone()
        }
        .boxed()
    }

    async fn open_node(
        &self,
        graph: &ResourceGraph,
        node: &ResourceNode,
        slot: Arc<ResourceSlot>,
        cx: &ExecutionContext,
    ) -> Result<()> {
        let name = node.resource.name().to_string();
        *lock(&slot.dependencies) = node.dependencies.iter().map(|e| e.target).collect();

        let pending: Vec<_> = node
            .before_dependencies()
            .filter_map(|edge| graph.node(edge.target))
            .collect();
        let results = join_all(pending.iter().map(|dep| self.ensure_open(graph, dep, cx))).await;

        for (dep, result) in pending.iter().zip(results) {
            if let Err(e) = result {
                slot.set_state(ResourceState::Failed);
                if e.is_cancelled() {
                    return Err(e);
                }
                return Err(ResourceError::DependencyFailed {
                    resource: name,
                    dependency: dep.resource.name().to_string(),
                });
            }
        }

        if let Err(e) = cx.check_cancelled() {
            slot.set_state(ResourceState::Failed);
            return Err(e.into());
        }

        slot.set_state(ResourceState::Opening);
        info!("打开资源: {}", name);

        let opening = AssertUnwindSafe(node.resource.open()).catch_unwind();
        match cx.run_until_cancelled(opening).await {
            Ok(Ok(Ok(()))) => {
                slot.set_state(ResourceState::Open);
                lock(&self.opened).push(slot);
                info!("资源已打开: {}", name);
                Ok(())
            }
            Ok(Ok(Err(e))) => {
                slot.set_state(ResourceState::Failed);
                warn!("打开资源 {} 失败: {:#}", name, e);
                Err(ResourceError::OpenFailed {
                    resource: name,
                    message: format!("{:#}", e),
                })
            }
            Ok(Err(panic)) => {
                slot.set_state(ResourceState::Failed);
                let message = panic_message(panic);
                warn!("打开资源 {} 时发生 panic: {}", name, message);
                Err(ResourceError::OpenFailed {
                    resource: name,
                    message,
                })
            }
            Err(cancelled) => {
                slot.set_state(ResourceState::Failed);
                debug!("打开资源 {} 时被取消", name);
                Err(cancelled.into())
            }
        }
    }

    /// 关闭全部已打开的资源 (尽力而为)
    ///
    /// 单个资源关闭失败只记入报告，不影响其余资源。关闭后登记表清空，
    /// 下一次运行重新打开。
    pub async fn close_all(&self) -> CloseReport {
        let mut pending: Vec<Arc<ResourceSlot>> = std::mem::take(&mut *lock(&self.opened));
        let mut report = CloseReport::default();

        while !pending.is_empty() {
            let index = (0..pending.len())
                .rev()
                .find(|&i| {
                    let key = pending[i].key;
                    !pending.iter().any(|other| other.depends_on(key))
                })
                .unwrap_or(pending.len() - 1);
            let slot = pending.remove(index);
            let name = slot.resource.name().to_string();

            slot.set_state(ResourceState::Closing);
            info!("关闭资源: {}", name);

            match AssertUnwindSafe(slot.resource.close()).catch_unwind().await {
                Ok(Ok(())) => report.closed.push(name),
                Ok(Err(e)) => {
                    warn!("关闭资源 {} 失败: {:#}", name, e);
                    report.failures.push(ResourceError::CloseFailed {
                        resource: name,
                        message: format!("{:#}", e),
                    });
                }
                Err(panic) => {
                    let message = panic_message(panic);
                    warn!("关闭资源 {} 时发生 panic: {}", name, message);
                    report.failures.push(ResourceError::CloseFailed {
                        resource: name,
                        message,
                    });
                }
            }
            slot.set_state(ResourceState::Closed);
        }

        lock(&self.slots).clear();
        report
    }
}

/// 资源生命周期策略
#[async_trait]
pub trait LifecycleStrategy: Send + Sync {
    fn kind(&self) -> ResourceStrategy;

    /// 运行开始前调用，返回错误表示运行无法开始
    async fn begin(&self, roots: &[ResourceRef], cx: &ExecutionContext) -> Result<()>;

    /// 步骤执行前调用，返回错误时该步骤判定为 Error
    async fn acquire(&self, roots: &[ResourceRef], cx: &ExecutionContext) -> Result<()>;

    /// 运行结束时关闭全部资源
    async fn close_all(&self) -> CloseReport;

    fn state_of(&self, resource: &ResourceRef) -> ResourceState;
}

async fn resolve_and_open(
    manager: &LifecycleManager,
    roots: &[ResourceRef],
    cx: &ExecutionContext,
) -> Result<()> {
    if roots.is_empty() {
        return Ok(());
    }
    let graph = ResourceGraph::resolve(roots)?;
    manager.open_graph(&graph, cx).await
}

/// 急切策略：运行开始前解析并打开全部资源
#[derive(Default)]
pub struct EagerStrategy {
    manager: LifecycleManager,
}

impl EagerStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LifecycleStrategy for EagerStrategy {
    fn kind(&self) -> ResourceStrategy {
        ResourceStrategy::Eager
    }

    async fn begin(&self, roots: &[ResourceRef], cx: &ExecutionContext) -> Result<()> {
        info!("急切打开 {} 个根资源", roots.len());
        resolve_and_open(&self.manager, roots, cx).await
    }

    async fn acquire(&self, roots: &[ResourceRef], cx: &ExecutionContext) -> Result<()> {
        // begin 已打开的资源直接命中缓存
        resolve_and_open(&self.manager, roots, cx).await
    }

    async fn close_all(&self) -> CloseReport {
        self.manager.close_all().await
    }

    fn state_of(&self, resource: &ResourceRef) -> ResourceState {
        self.manager.state_of(resource)
    }
}

/// 惰性策略：步骤首次使用资源时才解析并打开
#[derive(Default)]
pub struct LazyStrategy {
    manager: LifecycleManager,
}

impl LazyStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LifecycleStrategy for LazyStrategy {
    fn kind(&self) -> ResourceStrategy {
        ResourceStrategy::Lazy
    }

    async fn begin(&self, roots: &[ResourceRef], _cx: &ExecutionContext) -> Result<()> {
        debug!("按需打开策略: 推迟 {} 个根资源的打开", roots.len());
        Ok(())
    }

    async fn acquire(&self, roots: &[ResourceRef], cx: &ExecutionContext) -> Result<()> {
        resolve_and_open(&self.manager, roots, cx).await
    }

    async fn close_all(&self) -> CloseReport {
        self.manager.close_all().await
    }

    fn state_of(&self, resource: &ResourceRef) -> ResourceState {
        self.manager.state_of(resource)
    }
}

/// 按类型创建生命周期策略
pub fn strategy_for(kind: ResourceStrategy) -> Arc<dyn LifecycleStrategy> {
    match kind {
        ResourceStrategy::Eager => Arc::new(EagerStrategy::new()),
        ResourceStrategy::Lazy => Arc::new(LazyStrategy::new()),
    }
}
