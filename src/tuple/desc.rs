use std::fmt::Display;
use std::hash::{Hash, Hasher};

use crate::error::{DbError, Result};
use crate::tuple::field::Type;

/// One column of a schema: a type plus an optional display name.
#[derive(Clone, Debug)]
pub struct TdItem {
    pub field_type: Type,
    pub name: Option<String>,
}

impl TdItem {
    pub fn new(field_type: Type, name: Option<String>) -> Self {
        Self { field_type, name }
    }
}

/// The schema of a tuple. Two descriptors are equal when their type sequences
/// are equal; names are advisory and only matter for display and binding.
#[derive(Clone, Debug)]
pub struct TupleDesc {
    items: Vec<TdItem>,
}

impl TupleDesc {
    pub fn new(items: Vec<TdItem>) -> Self {
        assert!(!items.is_empty(), "a schema needs at least one column");
        Self { items }
    }

    /// Builds an anonymous descriptor from a type sequence.
    pub fn from_types(types: Vec<Type>) -> Self {
        Self::new(types.into_iter().map(|t| TdItem::new(t, None)).collect())
    }

    pub fn named(columns: Vec<(Type, &str)>) -> Self {
        Self::new(
            columns
                .into_iter()
                .map(|(t, n)| TdItem::new(t, Some(n.to_owned())))
                .collect(),
        )
    }

    pub fn num_fields(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[TdItem] {
        &self.items
    }

    pub fn field_type(&self, i: usize) -> Result<Type> {
        self.items
            .get(i)
            .map(|item| item.field_type)
            .ok_or_else(|| DbError::NoSuchElement(format!("no field at index {i}")))
    }

    pub fn field_name(&self, i: usize) -> Result<Option<&str>> {
        self.items
            .get(i)
            .map(|item| item.name.as_deref())
            .ok_or_else(|| DbError::NoSuchElement(format!("no field at index {i}")))
    }

    /// Finds the index of the first field with the given name.
    pub fn field_name_to_index(&self, name: &str) -> Result<usize> {
        self.items
            .iter()
            .position(|item| item.name.as_deref() == Some(name))
            .ok_or_else(|| DbError::NoSuchElement(format!("no field named {name}")))
    }

    /// The fixed byte width of tuples under this schema.
    pub fn byte_size(&self) -> usize {
        self.items.iter().map(|item| item.field_type.len()).sum()
    }

    /// Concatenates two descriptors, left columns first.
    pub fn merge(left: &TupleDesc, right: &TupleDesc) -> TupleDesc {
        let mut items = left.items.clone();
        items.extend(right.items.iter().cloned());
        TupleDesc::new(items)
    }
}

impl PartialEq for TupleDesc {
    fn eq(&self, other: &Self) -> bool {
        self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(other.items.iter())
                .all(|(a, b)| a.field_type == b.field_type)
    }
}

impl Eq for TupleDesc {}

impl Hash for TupleDesc {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for item in &self.items {
            item.field_type.hash(state);
        }
    }
}

impl Display for TupleDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(
                f,
                "{}({})",
                item.field_type,
                item.name.as_deref().unwrap_or("")
            )?;
        }
        Ok(())
    }
}
