//! 资源依赖图
//!
//! 节点身份按 `Arc` 地址区分。边 `A -> B` 表示 A 的某个非忽略字段当前引用 B。
//! 解析时先用带递归栈的 DFS 在 `Before` 边上检测依赖环，
//! 再用 Kahn 算法计算打开顺序 (并列时按发现顺序)。

use std::collections::{BTreeSet, VecDeque};

use indexmap::IndexMap;
use tracing::debug;

use crate::resource::{OpenMode, ResourceKey, ResourceRef};
use crate::{ResourceError, Result};

/// 依赖边
#[derive(Debug, Clone)]
pub struct DependencyEdge {
    /// 产生此边的字段
    pub field: String,
    /// 被依赖的资源
    pub target: ResourceKey,
    /// `Before` 或 `InParallel`
    pub mode: OpenMode,
}

/// 图节点
pub struct ResourceNode {
    pub key: ResourceKey,
    pub resource: ResourceRef,
    pub dependencies: Vec<DependencyEdge>,
}

impl ResourceNode {
    /// 必须先于本节点打开的依赖
    pub fn before_dependencies(&self) -> impl Iterator<Item = &DependencyEdge> {
        self.dependencies
            .iter()
            .filter(|edge| edge.mode == OpenMode::Before)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// 已解析的资源依赖图
pub struct ResourceGraph {
    nodes: IndexMap<ResourceKey, ResourceNode>,
    order: Vec<ResourceKey>,
}

impl ResourceGraph {
    /// 从根资源出发解析依赖图
    ///
    /// 为空的非必需字段不产生边，因此始终为空的自引用字段不会被当作依赖环。
    pub fn resolve(roots: &[ResourceRef]) -> Result<Self> {
        let mut nodes: IndexMap<ResourceKey, ResourceNode> = IndexMap::new();
        let mut queue: VecDeque<ResourceRef> = roots.iter().cloned().collect();

        while let Some(resource) = queue.pop_front() {
            let key = ResourceKey::of(&resource);
            if nodes.contains_key(&key) {
                continue;
            }

            let mut dependencies = Vec::new();
            for field in resource.fields() {
                if field.mode == OpenMode::Ignore {
                    continue;
                }
                match field.value {
                    Some(dep) => {
                        dependencies.push(DependencyEdge {
                            field: field.name,
                            target: ResourceKey::of(&dep),
                            mode: field.mode,
                        });
                        queue.push_back(dep);
                    }
                    None if field.required => {
                        return Err(ResourceError::MissingDependency {
                            resource: resource.name().to_string(),
                            field: field.name,
                        });
                    }
                    None => {}
                }
            }

            nodes.insert(
                key,
                ResourceNode {
                    key,
                    resource,
                    dependencies,
                },
            );
        }

        let mut graph = Self {
            nodes,
            order: Vec::new(),
        };
        graph.detect_cycle()?;
        graph.order = graph.topological_order();

        debug!(
            "资源依赖图解析完成: {} 个资源, 打开顺序: {:?}",
            graph.len(),
            graph.open_order().iter().map(|r| r.name()).collect::<Vec<_>>()
        );

        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, resource: &ResourceRef) -> bool {
        self.nodes.contains_key(&ResourceKey::of(resource))
    }

    pub fn node(&self, key: ResourceKey) -> Option<&ResourceNode> {
        self.nodes.get(&key)
    }

    /// 按发现顺序遍历节点
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    /// 顺序打开时满足全部 `Before` 约束的顺序
    pub fn open_order(&self) -> Vec<ResourceRef> {
        self.order
            .iter()
            .filter_map(|key| self.nodes.get(key))
            .map(|node| node.resource.clone())
            .collect()
    }

    fn name_at(&self, index: usize) -> String {
        self.nodes
            .get_index(index)
            .map(|(_, node)| node.resource.name().to_string())
            .unwrap_or_default()
    }

    fn detect_cycle(&self) -> Result<()> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut stack = Vec::new();

        for start in 0..self.nodes.len() {
            if marks[start] == Mark::Unvisited {
                self.visit(start, &mut marks, &mut stack)?;
            }
        }
        Ok(())
    }

    fn visit(&self, index: usize, marks: &mut [Mark], stack: &mut Vec<usize>) -> Result<()> {
        marks[index] = Mark::OnStack;
        stack.push(index);

        if let Some((_, node)) = self.nodes.get_index(index) {
            for edge in node.before_dependencies() {
                let Some(target) = self.nodes.get_index_of(&edge.target) else {
                    continue;
                };
                match marks[target] {
                    Mark::OnStack => {
                        let start = stack.iter().position(|&i| i == target).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[start..].iter().map(|&i| self.name_at(i)).collect();
                        path.push(self.name_at(target));
                        return Err(ResourceError::DependencyCycle { path });
                    }
                    Mark::Unvisited => self.visit(target, marks, stack)?,
                    Mark::Done => {}
                }
            }
        }

        stack.pop();
        marks[index] = Mark::Done;
        Ok(())
    }

    fn topological_order(&self) -> Vec<ResourceKey> {
        let count = self.nodes.len();
        let mut remaining = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (index, node) in self.nodes.values().enumerate() {
            for edge in node.before_dependencies() {
                if let Some(target) = self.nodes.get_index_of(&edge.target) {
                    remaining[index] += 1;
                    dependents[target].push(index);
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| remaining[i] == 0).collect();
        let mut order = Vec::with_capacity(count);

        while let Some(index) = ready.pop_first() {
            if let Some((key, _)) = self.nodes.get_index(index) {
                order.push(*key);
            }
            for &dependent in &dependents[index] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        order
    }
}
