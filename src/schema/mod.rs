//! # Record Schemas
//!
//! A schema names a record type and fixes the ordered field list every
//! storage generation of that type is laid out against. Field order is
//! significant: wire streams encode per-field bit widths and var-length
//! buffers in schema order, and readers address fields by index.
//!
//! ## Field Kinds
//!
//! | Kind      | Fixed slot holds                  | Side buffer |
//! |-----------|-----------------------------------|-------------|
//! | Int       | zig-zag encoded value             | no          |
//! | Long      | zig-zag encoded value             | no          |
//! | Float     | raw `f32` bits                    | no          |
//! | Double    | raw `f64` bits                    | no          |
//! | Boolean   | 0 / 1 (3 = null)                  | no          |
//! | String    | end offset into the field buffer  | yes         |
//! | Bytes     | end offset into the field buffer  | yes         |
//! | Reference | ordinal into the referenced type  | no          |
//!
//! ## Filtered Schemas
//!
//! A consumer may hold a schema that is a projection of the wire schema a
//! stream was written with: same type name, a subset of the fields, kinds
//! unchanged. Decoding keeps only the projected fields; the wire schema
//! tells the decoder how to walk (and skip) everything else. Projection
//! compatibility is validated once at construction, never per read.

use eyre::{ensure, Result};
use hashbrown::HashMap;

/// The storage class of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Int,
    Long,
    Float,
    Double,
    Boolean,
    String,
    Bytes,
    Reference,
}

impl FieldKind {
    /// True for kinds whose payload lives in a per-field side buffer.
    pub fn is_var_length(self) -> bool {
        matches!(self, FieldKind::String | FieldKind::Bytes)
    }
}

/// One field of a record type.
#[derive(Debug, Clone)]
pub struct FieldDef {
    name: String,
    kind: FieldKind,
    referenced_type: Option<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            referenced_type: None,
        }
    }

    /// A `Reference` field pointing at `referenced_type`.
    pub fn reference(name: impl Into<String>, referenced_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Reference,
            referenced_type: Some(referenced_type.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn referenced_type(&self) -> Option<&str> {
        self.referenced_type.as_deref()
    }
}

/// Immutable description of a record type: name plus ordered fields.
#[derive(Debug, Clone)]
pub struct Schema {
    type_name: String,
    fields: Vec<FieldDef>,
    by_name: HashMap<String, usize>,
    var_field_indices: Vec<usize>,
}

impl Schema {
    pub fn new(type_name: impl Into<String>, fields: Vec<FieldDef>) -> Result<Self> {
        let type_name = type_name.into();
        ensure!(!fields.is_empty(), "schema {} has no fields", type_name);

        let mut by_name = HashMap::with_capacity(fields.len());
        let mut var_field_indices = Vec::new();
        for (idx, field) in fields.iter().enumerate() {
            ensure!(
                by_name.insert(field.name.clone(), idx).is_none(),
                "duplicate field {} in schema {}",
                field.name,
                type_name
            );
            ensure!(
                field.kind != FieldKind::Reference || field.referenced_type.is_some(),
                "reference field {} in schema {} names no referenced type",
                field.name,
                type_name
            );
            if field.kind.is_var_length() {
                var_field_indices.push(idx);
            }
        }

        Ok(Self {
            type_name,
            fields,
            by_name,
            var_field_indices,
        })
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, idx: usize) -> Option<&FieldDef> {
        self.fields.get(idx)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn field_kind(&self, idx: usize) -> Option<FieldKind> {
        self.fields.get(idx).map(|f| f.kind)
    }

    /// Indices of the var-length fields, in schema order.
    pub fn var_field_indices(&self) -> &[usize] {
        &self.var_field_indices
    }

    pub fn var_field_count(&self) -> usize {
        self.var_field_indices.len()
    }

    /// Position of `field_idx` within the var-length fields, used to
    /// address that field's side buffer.
    pub fn var_slot(&self, field_idx: usize) -> Option<usize> {
        self.var_field_indices.iter().position(|&i| i == field_idx)
    }

    /// True when `self` is a valid projection of `wire`: same type name,
    /// every field present in `wire` under the same name, kind, and
    /// referenced type.
    pub fn is_projection_of(&self, wire: &Schema) -> bool {
        self.type_name == wire.type_name
            && self.fields.iter().all(|field| {
                wire.field_index(&field.name)
                    .map(|idx| {
                        let other = &wire.fields[idx];
                        other.kind == field.kind && other.referenced_type == field.referenced_type
                    })
                    .unwrap_or(false)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie_schema() -> Schema {
        Schema::new(
            "Movie",
            vec![
                FieldDef::new("id", FieldKind::Long),
                FieldDef::new("title", FieldKind::String),
                FieldDef::new("year", FieldKind::Int),
                FieldDef::new("poster", FieldKind::Bytes),
                FieldDef::reference("studio", "Studio"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn indexes_fields_by_name_and_position() {
        let schema = movie_schema();
        assert_eq!(schema.field_count(), 5);
        assert_eq!(schema.field_index("year"), Some(2));
        assert_eq!(schema.field_index("missing"), None);
        assert_eq!(schema.field_kind(4), Some(FieldKind::Reference));
        assert_eq!(schema.field(4).unwrap().referenced_type(), Some("Studio"));
    }

    #[test]
    fn tracks_var_length_fields() {
        let schema = movie_schema();
        assert_eq!(schema.var_field_indices(), &[1, 3]);
        assert_eq!(schema.var_slot(1), Some(0));
        assert_eq!(schema.var_slot(3), Some(1));
        assert_eq!(schema.var_slot(0), None);
    }

    #[test]
    fn rejects_duplicate_field_names() {
        let result = Schema::new(
            "Broken",
            vec![
                FieldDef::new("a", FieldKind::Int),
                FieldDef::new("a", FieldKind::Long),
            ],
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_reference_without_target() {
        let result = Schema::new("Broken", vec![FieldDef::new("ref", FieldKind::Reference)]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_empty_schema() {
        assert!(Schema::new("Empty", vec![]).is_err());
    }

    #[test]
    fn projection_requires_matching_kinds() {
        let wire = movie_schema();

        let narrowed = Schema::new(
            "Movie",
            vec![
                FieldDef::new("title", FieldKind::String),
                FieldDef::new("year", FieldKind::Int),
            ],
        )
        .unwrap();
        assert!(narrowed.is_projection_of(&wire));

        let wrong_kind = Schema::new("Movie", vec![FieldDef::new("year", FieldKind::Long)]).unwrap();
        assert!(!wrong_kind.is_projection_of(&wire));

        let wrong_type = Schema::new("Show", vec![FieldDef::new("year", FieldKind::Int)]).unwrap();
        assert!(!wrong_type.is_projection_of(&wire));
    }
}
