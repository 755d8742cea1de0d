//! 结果表与附件

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 结果列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultColumn {
    /// 列名
    pub name: String,
    /// 列值
    pub values: Vec<Value>,
}

/// 命名的列式结果表，发布后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    /// 表名
    pub name: String,
    /// 列
    pub columns: Vec<ResultColumn>,
}

impl ResultTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// 构造单行结果
    pub fn row<K, I>(name: impl Into<String>, cells: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let columns = cells
            .into_iter()
            .map(|(column, value)| ResultColumn {
                name: column.into(),
                values: vec![value],
            })
            .collect();
        Self {
            name: name.into(),
            columns,
        }
    }

    /// 追加一列
    pub fn with_column(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.columns.push(ResultColumn {
            name: name.into(),
            values,
        });
        self
    }

    pub fn column(&self, name: &str) -> Option<&ResultColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// 行数 (最长列的长度)
    pub fn row_count(&self) -> usize {
        self.columns.iter().map(|c| c.values.len()).max().unwrap_or(0)
    }

    /// 表名与列名 (含顺序) 是否一致
    pub fn has_same_layout(&self, other: &ResultTable) -> bool {
        self.name == other.name
            && self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(a, b)| a.name == b.name)
    }

    /// 追加另一张布局相同的表的全部行，布局不同时返回 false
    pub fn append(&mut self, other: &ResultTable) -> bool {
        if !self.has_same_layout(other) {
            return false;
        }

        let own_rows = self.row_count();
        let other_rows = other.row_count();
        for (column, incoming) in self.columns.iter_mut().zip(&other.columns) {
            column.values.resize(own_rows, Value::Null);
            column.values.extend(incoming.values.iter().cloned());
            column.values.resize(own_rows + other_rows, Value::Null);
        }
        true
    }
}

/// 附件 (二进制数据)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// 附件名称
    pub name: String,
    /// 数据
    pub data: Vec<u8>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_append_same_layout() {
        let mut table = ResultTable::row("voltage", [("ch", json!(1)), ("v", json!(3.3))]);
        let next = ResultTable::row("voltage", [("ch", json!(2)), ("v", json!(5.0))]);

        assert!(table.append(&next));
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.column("v").unwrap().values, vec![json!(3.3), json!(5.0)]);
    }

    #[test]
    fn test_append_rejects_other_layout() {
        let mut table = ResultTable::row("voltage", [("ch", json!(1))]);
        let other = ResultTable::row("current", [("ch", json!(1))]);
        let renamed = ResultTable::row("voltage", [("channel", json!(1))]);

        assert!(!table.append(&other));
        assert!(!table.append(&renamed));
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_append_pads_ragged_columns() {
        let mut table = ResultTable::new("t")
            .with_column("a", vec![json!(1), json!(2)])
            .with_column("b", vec![json!("x")]);
        let next = ResultTable::new("t")
            .with_column("a", vec![json!(3)])
            .with_column("b", vec![]);

        assert!(table.append(&next));
        assert_eq!(table.column("b").unwrap().values, vec![json!("x"), Value::Null, Value::Null]);
        assert_eq!(table.column("a").unwrap().values.len(), 3);
    }
}
