use crate::error::{Result, StoreError};
use crate::types::Record;
use serde::{Deserialize, Serialize};

/// A named, ordered list of field names describing one record shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordShape {
    pub name: String,
    pub fields: Vec<String>,
}

impl RecordShape {
    pub fn new(name: impl Into<String>, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }
}

/// How a raw backend record is converted before it is returned
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ConvertMode {
    /// Return the record as the backend produced it
    Raw,
    /// Project to the descriptor's instance shape
    #[default]
    Default,
    /// Project to an ad hoc shape
    As(RecordShape),
}

/// Per-collection bundle of typed record shapes plus the converter
///
/// Mirrors the base / create-input / edit-input / output-instance split of
/// the collection's API surface. The converter never drops the identifier
/// field and only emits fields declared on the target shape.
#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    pub base: RecordShape,
    pub create: RecordShape,
    pub edit: RecordShape,
    pub instance: RecordShape,
    /// Identifier field name within this collection
    pub id_field: String,
}

impl SchemaDescriptor {
    pub fn new(
        base: RecordShape,
        create: RecordShape,
        edit: RecordShape,
        instance: RecordShape,
    ) -> Self {
        Self {
            base,
            create,
            edit,
            instance,
            id_field: "id".to_string(),
        }
    }

    /// All four shapes share one field list
    pub fn uniform(shape: RecordShape) -> Self {
        Self::new(shape.clone(), shape.clone(), shape.clone(), shape)
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    /// Whether the instance shape declares this field
    pub fn knows_field(&self, field: &str) -> bool {
        field == self.id_field || self.instance.has_field(field)
    }

    /// Fail with `SchemaMismatch` unless every field is declared
    pub fn check_fields<'a>(&self, fields: impl IntoIterator<Item = &'a String>) -> Result<()> {
        let unknown: Vec<&str> = fields
            .into_iter()
            .filter(|f| !self.knows_field(f))
            .map(String::as_str)
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(StoreError::schema_mismatch(format!(
                "fields {:?} not present on collection",
                unknown
            )))
        }
    }

    /// Convert a raw backend record according to the requested mode
    ///
    /// Projection is an allow-list copy: the source record is never mutated,
    /// and the identifier survives every mode.
    pub fn convert(&self, record: &Record, mode: &ConvertMode) -> Record {
        let shape = match mode {
            ConvertMode::Raw => return record.clone(),
            ConvertMode::Default => &self.instance,
            ConvertMode::As(shape) => shape,
        };
        self.project(record, shape)
    }

    fn project(&self, record: &Record, shape: &RecordShape) -> Record {
        let mut out = Record::new();
        if let Some(id) = record.get(&self.id_field) {
            out.insert(self.id_field.clone(), id.clone());
        }
        for field in &shape.fields {
            if field == &self.id_field {
                continue;
            }
            if let Some(value) = record.get(field) {
                out.insert(field.clone(), value.clone());
            }
        }
        out
    }
}
