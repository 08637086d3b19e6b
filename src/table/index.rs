//! Index structures

use crate::types::IndexOrdering;
use std::fmt;

/// One field of an index; field order within the index is significant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumn {
    pub column_name: String,
    pub ordering: IndexOrdering,
}

impl IndexColumn {
    pub fn new(column_name: impl Into<String>, ordering: IndexOrdering) -> Self {
        Self {
            column_name: column_name.into(),
            ordering,
        }
    }
}

/// Secondary index on a table
///
/// Equality compares name, uniqueness and the ordered field list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Index {
    pub name: String,
    pub unique: bool,
    pub fields: Vec<IndexColumn>,
}

impl Index {
    pub fn new(name: impl Into<String>, unique: bool) -> Self {
        Self {
            name: name.into(),
            unique,
            fields: Vec::new(),
        }
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.unique {
            write!(f, " UNIQUE")?;
        }
        write!(f, " (")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", field.column_name)?;
            match field.ordering {
                IndexOrdering::Default => {}
                IndexOrdering::Asc => write!(f, " ASC")?,
                IndexOrdering::Desc => write!(f, " DESC")?,
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_field_order_matters() {
        let a = IndexColumn::new("col_a", IndexOrdering::Asc);
        let b = IndexColumn::new("col_b", IndexOrdering::Desc);

        let mut idx1 = Index::new("composite_idx", false);
        idx1.fields = vec![a.clone(), b.clone()];

        let mut idx2 = Index::new("composite_idx", false);
        idx2.fields = vec![b, a];

        assert_ne!(idx1, idx2);

        let idx3 = idx1.clone();
        assert_eq!(idx1, idx3);
    }

    #[test]
    fn test_index_display() {
        let mut idx = Index::new("test_idx", true);
        idx.fields.push(IndexColumn::new("id", IndexOrdering::Asc));
        idx.fields.push(IndexColumn::new("name", IndexOrdering::Default));
        assert_eq!(idx.to_string(), "test_idx UNIQUE (id ASC, name)");
    }
}
