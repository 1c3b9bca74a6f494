//! # Write Records
//!
//! Field staging for the producer side. A `WriteRecord` collects typed
//! values against a schema; `WriteState::add` copies them into the
//! staged ordinal space. Records are reusable: `reset` returns every
//! field to null.

use std::sync::Arc;

use eyre::{bail, ensure, eyre, Result};

use crate::encoding::zigzag::{zigzag32, zigzag64};
use crate::schema::{FieldKind, Schema};

/// A float NaN with the sign and mantissa bits the null sentinel does
/// not use, substituted when a caller stores the sentinel pattern.
const CANONICAL_NAN_F32: u32 = 0x7FC0_0000;
const CANONICAL_NAN_F64: u64 = 0x7FF8_0000_0000_0000;

/// One staged field value. `Null` doubles as "never set".
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FieldValue {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    Reference(i32),
}

impl FieldValue {
    /// The packed bit pattern for fixed-width kinds, before a width is
    /// chosen. Var-length and null values have none.
    pub(crate) fn raw_bits(&self) -> Option<u64> {
        match *self {
            FieldValue::Int(v) => Some(zigzag32(v) as u64),
            FieldValue::Long(v) => Some(zigzag64(v)),
            FieldValue::Float(v) => Some(v.to_bits() as u64),
            FieldValue::Double(v) => Some(v.to_bits()),
            FieldValue::Bool(v) => Some(v as u64),
            FieldValue::Reference(o) => Some(o as u64),
            FieldValue::Null | FieldValue::String(_) | FieldValue::Bytes(_) => None,
        }
    }

    pub(crate) fn var_payload(&self) -> Option<&[u8]> {
        match self {
            FieldValue::String(s) => Some(s.as_bytes()),
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Staged values for one record, reusable across `add` calls.
#[derive(Debug)]
pub struct WriteRecord {
    schema: Arc<Schema>,
    values: Vec<FieldValue>,
}

impl WriteRecord {
    pub(crate) fn new(schema: Arc<Schema>) -> Self {
        let values = vec![FieldValue::Null; schema.field_count()];
        Self { schema, values }
    }

    pub(crate) fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub(crate) fn values(&self) -> &[FieldValue] {
        &self.values
    }

    /// Returns every field to null.
    pub fn reset(&mut self) {
        for value in &mut self.values {
            *value = FieldValue::Null;
        }
    }

    pub fn set_null(&mut self, name: &str) -> Result<()> {
        let field = self.field_of_any_kind(name)?;
        self.values[field] = FieldValue::Null;
        Ok(())
    }

    pub fn set_int(&mut self, name: &str, value: i32) -> Result<()> {
        let field = self.field(name, FieldKind::Int)?;
        self.values[field] = FieldValue::Int(value);
        Ok(())
    }

    /// `i64::MIN` zigzags to the all-ones null sentinel and cannot be
    /// stored.
    pub fn set_long(&mut self, name: &str, value: i64) -> Result<()> {
        ensure!(
            value != i64::MIN,
            "long value {} is reserved for the null sentinel",
            value
        );
        let field = self.field(name, FieldKind::Long)?;
        self.values[field] = FieldValue::Long(value);
        Ok(())
    }

    /// A NaN whose bits equal the null sentinel is replaced with a
    /// canonical NaN so it reads back as a value.
    pub fn set_float(&mut self, name: &str, value: f32) -> Result<()> {
        let field = self.field(name, FieldKind::Float)?;
        let value = if value.to_bits() == u32::MAX {
            f32::from_bits(CANONICAL_NAN_F32)
        } else {
            value
        };
        self.values[field] = FieldValue::Float(value);
        Ok(())
    }

    pub fn set_double(&mut self, name: &str, value: f64) -> Result<()> {
        let field = self.field(name, FieldKind::Double)?;
        let value = if value.to_bits() == u64::MAX {
            f64::from_bits(CANONICAL_NAN_F64)
        } else {
            value
        };
        self.values[field] = FieldValue::Double(value);
        Ok(())
    }

    pub fn set_bool(&mut self, name: &str, value: bool) -> Result<()> {
        let field = self.field(name, FieldKind::Boolean)?;
        self.values[field] = FieldValue::Bool(value);
        Ok(())
    }

    pub fn set_string(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        let field = self.field(name, FieldKind::String)?;
        self.values[field] = FieldValue::String(value.into());
        Ok(())
    }

    pub fn set_bytes(&mut self, name: &str, value: impl Into<Vec<u8>>) -> Result<()> {
        let field = self.field(name, FieldKind::Bytes)?;
        self.values[field] = FieldValue::Bytes(value.into());
        Ok(())
    }

    pub fn set_reference(&mut self, name: &str, ordinal: i32) -> Result<()> {
        ensure!(ordinal >= 0, "reference ordinal {} is negative", ordinal);
        let field = self.field(name, FieldKind::Reference)?;
        self.values[field] = FieldValue::Reference(ordinal);
        Ok(())
    }

    fn field(&self, name: &str, expected: FieldKind) -> Result<usize> {
        let field = self.field_of_any_kind(name)?;
        let kind = self.schema.fields()[field].kind();
        if kind != expected {
            bail!(
                "field {} of type {} is {:?}, not {:?}",
                name,
                self.schema.type_name(),
                kind,
                expected
            );
        }
        Ok(field)
    }

    fn field_of_any_kind(&self, name: &str) -> Result<usize> {
        self.schema.field_index(name).ok_or_else(|| {
            eyre!(
                "type {} has no field {}",
                self.schema.type_name(),
                name
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;

    fn record() -> WriteRecord {
        let schema = Schema::new(
            "Sample",
            vec![
                FieldDef::new("i", FieldKind::Int),
                FieldDef::new("l", FieldKind::Long),
                FieldDef::new("f", FieldKind::Float),
                FieldDef::new("d", FieldKind::Double),
                FieldDef::new("s", FieldKind::String),
                FieldDef::reference("r", "Other"),
            ],
        )
        .unwrap();
        WriteRecord::new(Arc::new(schema))
    }

    #[test]
    fn setters_validate_field_kind_and_name() {
        let mut rec = record();
        rec.set_int("i", 42).unwrap();
        assert!(rec.set_int("l", 42).is_err());
        assert!(rec.set_int("missing", 42).is_err());
        assert_eq!(rec.values()[0], FieldValue::Int(42));
    }

    #[test]
    fn long_min_is_rejected() {
        let mut rec = record();
        assert!(rec.set_long("l", i64::MIN).is_err());
        rec.set_long("l", i64::MIN + 1).unwrap();
        rec.set_long("l", i64::MAX).unwrap();
    }

    #[test]
    fn sentinel_nan_is_canonicalized() {
        let mut rec = record();
        rec.set_float("f", f32::from_bits(u32::MAX)).unwrap();
        match rec.values()[2] {
            FieldValue::Float(v) => {
                assert!(v.is_nan());
                assert_ne!(v.to_bits(), u32::MAX);
            }
            ref other => panic!("unexpected value {other:?}"),
        }
        rec.set_double("d", f64::from_bits(u64::MAX)).unwrap();
        match rec.values()[3] {
            FieldValue::Double(v) => {
                assert!(v.is_nan());
                assert_ne!(v.to_bits(), u64::MAX);
            }
            ref other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn negative_reference_is_rejected() {
        let mut rec = record();
        assert!(rec.set_reference("r", -1).is_err());
        rec.set_reference("r", 0).unwrap();
    }

    #[test]
    fn reset_returns_every_field_to_null() {
        let mut rec = record();
        rec.set_int("i", 7).unwrap();
        rec.set_string("s", "x").unwrap();
        rec.reset();
        assert!(rec.values().iter().all(|v| *v == FieldValue::Null));
    }
}
