//! 执行上下文

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::handle::ContextHandle;
use crate::hierarchy::{Activity, Completion};
use crate::values::{ContextKey, ContextValues};
use crate::{ContextError, Result};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// 执行上下文 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

struct ContextInner {
    id: ContextId,
    parent: Option<ContextId>,
    name: String,
    token: CancellationToken,
    values: RwLock<ContextValues>,
    completion: Arc<Completion>,
    activity: Weak<Activity>,
}

/// 执行上下文
///
/// 克隆开销很小，克隆出的句柄指向同一个上下文。
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl ExecutionContext {
    /// 创建根上下文
    pub fn root(name: impl Into<String>) -> Self {
        Self::build(
            name.into(),
            None,
            CancellationToken::new(),
            ContextValues::default(),
            Weak::new(),
        )
    }

    fn build(
        name: String,
        parent: Option<ContextId>,
        token: CancellationToken,
        values: ContextValues,
        activity: Weak<Activity>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: ContextId::next(),
                parent,
                name,
                token,
                values: RwLock::new(values),
                completion: Arc::new(Completion::new()),
                activity,
            }),
        }
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn parent_id(&self) -> Option<ContextId> {
        self.inner.parent
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// 在子上下文中派生一个并发工作单元
    ///
    /// 子上下文的取消令牌是当前令牌的子令牌；继承的上下文值在此刻复制。
    /// 父上下文的层级完成会等待该工作单元及其后代结束。
    pub fn spawn<F, Fut, T>(&self, name: impl Into<String>, f: F) -> ContextHandle<T>
    where
        F: FnOnce(ExecutionContext) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let values = self.read_values().branch();
        let (child, activity) = Self::branch_with(
            name.into(),
            Some(self.inner.id),
            self.inner.token.child_token(),
            values,
            self.inner.activity.upgrade(),
        );
        debug!("派生工作单元: {} (父: {})", child.name(), self.name());

        Self::launch(child, activity, f)
    }

    /// 在独立的新上下文中派生工作单元
    ///
    /// 新上下文不在任何取消层级中，只从 `parent` (若有) 复制继承的值。
    pub fn with_new_context<F, Fut, T>(
        parent: Option<&ExecutionContext>,
        name: impl Into<String>,
        f: F,
    ) -> ContextHandle<T>
    where
        F: FnOnce(ExecutionContext) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let values = parent
            .map(|p| p.read_values().branch())
            .unwrap_or_default();
        let (child, activity) = Self::branch_with(
            name.into(),
            None,
            CancellationToken::new(),
            values,
            None,
        );
        debug!("在新上下文中派生工作单元: {}", child.name());

        Self::launch(child, activity, f)
    }

    fn branch_with(
        name: String,
        parent: Option<ContextId>,
        token: CancellationToken,
        values: ContextValues,
        parent_activity: Option<Arc<Activity>>,
    ) -> (ExecutionContext, Arc<Activity>) {
        let completion = Arc::new(Completion::new());
        let activity = Arc::new(Activity::new(completion.clone(), parent_activity));

        let context = Self {
            inner: Arc::new(ContextInner {
                id: ContextId::next(),
                parent,
                name,
                token,
                values: RwLock::new(values),
                completion,
                activity: Arc::downgrade(&activity),
            }),
        };

        (context, activity)
    }

    fn launch<F, Fut, T>(context: ExecutionContext, activity: Arc<Activity>, f: F) -> ContextHandle<T>
    where
        F: FnOnce(ExecutionContext) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let fut = f(context.clone());
        let join = tokio::spawn(async move {
            let _activity = activity;
            fut.await
        });

        ContextHandle::new(context, join)
    }

    /// 取消此上下文及其全部后代
    pub fn abort(&self) {
        if !self.inner.token.is_cancelled() {
            info!("取消执行上下文: {}", self.name());
        }
        self.inner.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// 已取消时返回错误，用于长操作中的检查点
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(self.cancelled_error())
        } else {
            Ok(())
        }
    }

    /// 等待取消
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    /// 可取消的休眠
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.inner.token.cancelled() => Err(self.cancelled_error()),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// 运行 future，上下文取消时提前返回
    pub async fn run_until_cancelled<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.inner.token.cancelled() => Err(self.cancelled_error()),
            output = fut => Ok(output),
        }
    }

    /// 取消令牌的副本 (供需要直接监听令牌的组件使用)
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    pub fn cancelled_error(&self) -> ContextError {
        ContextError::Cancelled(self.inner.name.clone())
    }

    /// 读取上下文值
    pub fn get<T>(&self, key: &ContextKey<T>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.read_values().get(key)
    }

    /// 写入上下文值，只对当前上下文及之后派生的分支可见
    pub fn set<T>(&self, key: &ContextKey<T>, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.inner
            .values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .set(key, value);
    }

    pub fn remove<T>(&self, key: &ContextKey<T>) -> bool {
        self.inner
            .values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
    }

    pub(crate) fn completion(&self) -> &Arc<Completion> {
        &self.inner.completion
    }

    fn read_values(&self) -> std::sync::RwLockReadGuard<'_, ContextValues> {
        self.inner.values.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
