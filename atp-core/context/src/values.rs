//! 上下文值

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// 上下文值的继承方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inheritance {
    /// 分支时复制到子上下文，之后双方的写入互不可见
    Inherited,
    /// 不继承，新分支总是从空值开始
    Flat,
}

/// 类型化的上下文值键
///
/// 以名称区分不同的槽位，通常声明为 `static`：
///
/// ```
/// use atp_context::ContextKey;
///
/// static OPERATOR: ContextKey<String> = ContextKey::inherited("operator");
/// ```
pub struct ContextKey<T> {
    name: &'static str,
    inheritance: Inheritance,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    /// 创建分支时复制的键
    pub const fn inherited(name: &'static str) -> Self {
        Self {
            name,
            inheritance: Inheritance::Inherited,
            _marker: PhantomData,
        }
    }

    /// 创建不继承的键
    pub const fn flat(name: &'static str) -> Self {
        Self {
            name,
            inheritance: Inheritance::Flat,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn inheritance(&self) -> Inheritance {
        self.inheritance
    }
}

#[derive(Clone)]
struct Slot {
    inheritance: Inheritance,
    value: Arc<dyn Any + Send + Sync>,
}

/// 单个上下文持有的值表
#[derive(Clone, Default)]
pub(crate) struct ContextValues {
    slots: HashMap<&'static str, Slot>,
}

impl ContextValues {
    pub(crate) fn get<T>(&self, key: &ContextKey<T>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.slots
            .get(key.name)
            .and_then(|slot| slot.value.downcast_ref::<T>())
            .cloned()
    }

    pub(crate) fn set<T>(&mut self, key: &ContextKey<T>, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.slots.insert(
            key.name,
            Slot {
                inheritance: key.inheritance,
                value: Arc::new(value),
            },
        );
    }

    pub(crate) fn remove<T>(&mut self, key: &ContextKey<T>) -> bool {
        self.slots.remove(key.name).is_some()
    }

    /// 为新分支复制值表，只保留继承槽位
    pub(crate) fn branch(&self) -> Self {
        let slots = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.inheritance == Inheritance::Inherited)
            .map(|(name, slot)| (*name, slot.clone()))
            .collect();
        Self { slots }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static LABEL: ContextKey<String> = ContextKey::inherited("label");
    static ATTEMPT: ContextKey<u32> = ContextKey::flat("attempt");

    #[test]
    fn test_branch_drops_flat_slots() {
        let mut values = ContextValues::default();
        values.set(&LABEL, "root".to_string());
        values.set(&ATTEMPT, 3);

        let branch = values.branch();
        assert_eq!(branch.get(&LABEL), Some("root".to_string()));
        assert_eq!(branch.get(&ATTEMPT), None);
        assert_eq!(branch.len(), 1);
    }

    #[test]
    fn test_wrong_type_reads_none() {
        static SAME_NAME: ContextKey<u64> = ContextKey::inherited("label");

        let mut values = ContextValues::default();
        values.set(&LABEL, "x".to_string());
        assert_eq!(values.get(&SAME_NAME), None);
    }

    #[test]
    fn test_remove() {
        let mut values = ContextValues::default();
        values.set(&ATTEMPT, 1);
        assert!(values.remove(&ATTEMPT));
        assert!(!values.remove(&ATTEMPT));
    }
}
