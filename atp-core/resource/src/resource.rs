//! 资源接口

use std::sync::Arc;

use async_trait::async_trait;

/// 共享资源引用，节点身份以 `Arc` 地址区分
pub type ResourceRef = Arc<dyn Resource>;

/// 有显式打开/关闭生命周期的外部资源
///
/// 资源的打开状态由生命周期管理器维护，实现方只负责实际的连接/断开动作。
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    /// 资源名称 (用于日志和错误信息)
    fn name(&self) -> &str;

    /// 打开资源
    async fn open(&self) -> anyhow::Result<()>;

    /// 关闭资源
    async fn close(&self) -> anyhow::Result<()>;

    /// 当前持有的资源引用字段，用于构建依赖图
    fn fields(&self) -> Vec<ResourceField> {
        Vec::new()
    }
}

/// 依赖字段的打开方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// 依赖必须先于本资源打开
    #[default]
    Before,
    /// 依赖可与本资源并发打开，但步骤使用前两者都必须已打开
    InParallel,
    /// 忽略此依赖，不产生依赖边
    Ignore,
}

/// 资源的一个引用字段
#[derive(Clone)]
pub struct ResourceField {
    /// 字段名称
    pub name: String,
    /// 当前引用的资源，运行时可能为空
    pub value: Option<ResourceRef>,
    /// 打开方式
    pub mode: OpenMode,
    /// 为空时是否视为缺失依赖
    pub required: bool,
}

impl ResourceField {
    pub fn new(name: impl Into<String>, value: Option<ResourceRef>) -> Self {
        Self {
            name: name.into(),
            value,
            mode: OpenMode::Before,
            required: false,
        }
    }

    /// 必需字段
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn in_parallel(self) -> Self {
        self.with_mode(OpenMode::InParallel)
    }

    pub fn ignored(self) -> Self {
        self.with_mode(OpenMode::Ignore)
    }
}

impl std::fmt::Debug for ResourceField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceField")
            .field("name", &self.name)
            .field("value", &self.value.as_ref().map(|r| r.name().to_string()))
            .field("mode", &self.mode)
            .field("required", &self.required)
            .finish()
    }
}

/// 资源节点身份 (`Arc` 数据指针地址)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(usize);

impl ResourceKey {
    pub fn of(resource: &ResourceRef) -> Self {
        Self(Arc::as_ptr(resource) as *const () as usize)
    }
}
