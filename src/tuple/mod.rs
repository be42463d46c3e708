use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};

use crate::common::RecordId;
use crate::error::{DbError, Result};
use crate::tuple::desc::TupleDesc;
use crate::tuple::field::Field;

pub mod desc;
pub mod field;

/// A typed row. Carries its schema plus, when the tuple lives on a page, the
/// record id of its slot.
#[derive(Clone, Debug)]
pub struct Tuple {
    desc: TupleDesc,
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(desc: TupleDesc, fields: Vec<Field>) -> Self {
        debug_assert_eq!(desc.num_fields(), fields.len());
        Self {
            desc,
            fields,
            record_id: None,
        }
    }

    pub fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    pub fn field(&self, i: usize) -> Result<&Field> {
        self.fields
            .get(i)
            .ok_or_else(|| DbError::NoSuchElement(format!("no field at index {i}")))
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }

    /// Concatenates two tuples under the merged schema.
    pub fn combine(left: &Tuple, right: &Tuple) -> Tuple {
        let desc = TupleDesc::merge(&left.desc, &right.desc);
        let mut fields = left.fields.clone();
        fields.extend(right.fields.iter().cloned());
        Tuple::new(desc, fields)
    }

    /// Writes the fixed-width byte form of this tuple, field by field.
    pub fn serialize(&self, writer: &mut impl Write) -> Result<()> {
        for field in &self.fields {
            field.serialize(writer)?;
        }
        Ok(())
    }

    /// Parses a tuple of the given schema from a reader.
    pub fn parse(desc: &TupleDesc, reader: &mut impl Read) -> Result<Tuple> {
        let mut fields = Vec::with_capacity(desc.num_fields());
        for item in desc.items() {
            fields.push(item.field_type.parse(reader)?);
        }
        Ok(Tuple::new(desc.clone(), fields))
    }
}

/// Equality is by schema and per-field value; the record id does not
/// participate, so a scanned tuple equals its freshly built counterpart.
impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.desc == other.desc && self.fields == other.fields
    }
}

impl Eq for Tuple {}

/// Hashes the tab-separated string form, so equal tuples hash equally.
impl Hash for Tuple {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}

impl Display for Tuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, "\t")?;
            }
            Display::fmt(field, f)?;
        }
        Ok(())
    }
}
