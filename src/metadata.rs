//! Typed per-document metadata.
//!
//! `metadata.schema` lists the user-declared fields, one `name\ttype` line
//! each. `metadata.db` holds one packed record per document: its length,
//! its unique-term count, then every schema field in order. `metadata.index`
//! is a `u64` disk vector of record offsets indexed by document id.

use crate::disk_vector::{DiskVector, DiskVectorWriter};
use crate::error::{Error, Result};
use crate::mmap::MappedFile;
use crate::packed::{self, PackedReader};
use crate::types::DocId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const SCHEMA_FILE: &str = "metadata.schema";
pub const DB_FILE: &str = "metadata.db";
pub const INDEX_FILE: &str = "metadata.index";
const SCRATCH_FILE: &str = "metadata.db.scratch";

/// Field names reserved for the built-in columns.
const RESERVED: [&str; 2] = ["length", "unique-terms"];

/// Type of a metadata field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "int")]
    SignedInt,
    #[serde(rename = "uint")]
    UnsignedInt,
    #[serde(rename = "double")]
    Double,
    #[serde(rename = "string")]
    String,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::SignedInt => "int",
            FieldType::UnsignedInt => "uint",
            FieldType::Double => "double",
            FieldType::String => "string",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "int" => Some(FieldType::SignedInt),
            "uint" => Some(FieldType::UnsignedInt),
            "double" => Some(FieldType::Double),
            "string" => Some(FieldType::String),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    SignedInt(i64),
    UnsignedInt(u64),
    Double(f64),
    Str(String),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::SignedInt(_) => FieldType::SignedInt,
            FieldValue::UnsignedInt(_) => FieldType::UnsignedInt,
            FieldValue::Double(_) => FieldType::Double,
            FieldValue::Str(_) => FieldType::String,
        }
    }

    /// Parse `text` as a value of type `ty`.
    pub fn parse(ty: FieldType, text: &str) -> Result<Self> {
        let mismatch = |e: &dyn fmt::Display| {
            Error::SchemaMismatch(format!("{:?} is not a valid {}: {}", text, ty, e))
        };
        Ok(match ty {
            FieldType::SignedInt => {
                FieldValue::SignedInt(text.trim().parse().map_err(|e| mismatch(&e))?)
            }
            FieldType::UnsignedInt => {
                FieldValue::UnsignedInt(text.trim().parse().map_err(|e| mismatch(&e))?)
            }
            FieldType::Double => {
                FieldValue::Double(text.trim().parse().map_err(|e| mismatch(&e))?)
            }
            FieldType::String => FieldValue::Str(text.to_string()),
        })
    }

    fn write<W: Write>(&self, out: &mut W) -> Result<usize> {
        match self {
            FieldValue::SignedInt(v) => packed::write_i64(out, *v),
            FieldValue::UnsignedInt(v) => packed::write_u64(out, *v),
            FieldValue::Double(v) => packed::write_f64(out, *v),
            FieldValue::Str(v) => packed::write_str(out, v),
        }
    }

    fn read(ty: FieldType, input: &mut PackedReader<'_>) -> Result<Self> {
        Ok(match ty {
            FieldType::SignedInt => FieldValue::SignedInt(input.read_i64()?),
            FieldType::UnsignedInt => FieldValue::UnsignedInt(input.read_u64()?),
            FieldType::Double => FieldValue::Double(input.read_f64()?),
            FieldType::String => FieldValue::Str(input.read_str()?.to_string()),
        })
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::SignedInt(v) => v.fmt(f),
            FieldValue::UnsignedInt(v) => v.fmt(f),
            FieldValue::Double(v) => v.fmt(f),
            FieldValue::Str(v) => f.write_str(v),
        }
    }
}

/// A declared field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// Ordered list of user-declared metadata fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<FieldInfo>,
}

impl Schema {
    /// Validate and wrap `fields`. Names must be unique, non-empty, free of
    /// tabs and newlines, and not shadow the built-in columns.
    pub fn new(fields: Vec<FieldInfo>) -> Result<Self> {
        for (i, field) in fields.iter().enumerate() {
            if field.name.is_empty() || field.name.contains(['\t', '\n']) {
                return Err(Error::config(format!(
                    "invalid metadata field name {:?}",
                    field.name
                )));
            }
            if RESERVED.contains(&field.name.as_str()) {
                return Err(Error::config(format!(
                    "metadata field name {:?} is reserved",
                    field.name
                )));
            }
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(Error::config(format!(
                    "duplicate metadata field {:?}",
                    field.name
                )));
            }
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Check that `values` match the schema in count and type.
    pub fn validate(&self, values: &[FieldValue]) -> Result<()> {
        if values.len() != self.fields.len() {
            return Err(Error::SchemaMismatch(format!(
                "expected {} metadata values, got {}",
                self.fields.len(),
                values.len()
            )));
        }
        for (field, value) in self.fields.iter().zip(values) {
            if value.field_type() != field.field_type {
                return Err(Error::SchemaMismatch(format!(
                    "field {:?} is {} but got {} value {}",
                    field.name,
                    field.field_type,
                    value.field_type(),
                    value
                )));
            }
        }
        Ok(())
    }

    /// Parse one tab-separated line of values in schema order.
    pub fn parse_line(&self, line: &str) -> Result<Vec<FieldValue>> {
        if self.fields.is_empty() {
            return Ok(Vec::new());
        }
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() != self.fields.len() {
            return Err(Error::SchemaMismatch(format!(
                "expected {} metadata columns, got {} in {:?}",
                self.fields.len(),
                columns.len(),
                line
            )));
        }
        self.fields
            .iter()
            .zip(columns)
            .map(|(field, text)| FieldValue::parse(field.field_type, text))
            .collect()
    }

    /// Read `metadata.schema` from `dir`.
    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(SCHEMA_FILE);
        let text = fs::read_to_string(&path)?;
        let mut fields = Vec::new();
        for (n, line) in text.lines().enumerate() {
            let parsed = line
                .split_once('\t')
                .and_then(|(name, ty)| FieldType::parse(ty).map(|ty| FieldInfo::new(name, ty)));
            match parsed {
                Some(field) => fields.push(field),
                None => {
                    return Err(Error::corrupt(format!(
                        "{} line {}: malformed field {:?}",
                        path.display(),
                        n + 1,
                        line
                    )))
                }
            }
        }
        Self::new(fields).map_err(|e| Error::corrupt(format!("{}: {}", path.display(), e)))
    }

    /// Write `metadata.schema` into `dir`.
    pub fn write(&self, dir: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(dir.join(SCHEMA_FILE))?);
        for field in &self.fields {
            writeln!(out, "{}\t{}", field.name, field.field_type)?;
        }
        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }
}

struct Scratch {
    out: BufWriter<File>,
    position: u64,
    /// `(doc, offset, len)` of every record in the scratch file.
    spans: Vec<(DocId, u64, u64)>,
}

/// Collects metadata records from concurrent workers.
///
/// Records arrive in any order and are appended to a scratch file;
/// [`finish`](MetadataWriter::finish) rewrites them in document order.
pub struct MetadataWriter {
    dir: PathBuf,
    schema: Schema,
    scratch: Mutex<Scratch>,
}

impl MetadataWriter {
    /// Start writing metadata into `dir`. Writes the schema file
    /// immediately.
    pub fn create(dir: impl Into<PathBuf>, schema: Schema) -> Result<Self> {
        let dir = dir.into();
        schema.write(&dir)?;
        let out = BufWriter::new(File::create(dir.join(SCRATCH_FILE))?);
        Ok(Self {
            dir,
            schema,
            scratch: Mutex::new(Scratch {
                out,
                position: 0,
                spans: Vec::new(),
            }),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Record one document.
    pub fn write(
        &self,
        doc: DocId,
        length: u64,
        unique_terms: u64,
        values: &[FieldValue],
    ) -> Result<()> {
        self.schema.validate(values)?;
        let mut record = Vec::with_capacity(16);
        packed::write_u64(&mut record, length)?;
        packed::write_u64(&mut record, unique_terms)?;
        for value in values {
            value.write(&mut record)?;
        }

        let mut scratch = self.scratch.lock();
        scratch.out.write_all(&record)?;
        let offset = scratch.position;
        scratch.spans.push((doc, offset, record.len() as u64));
        scratch.position += record.len() as u64;
        Ok(())
    }

    /// Write `metadata.db` and `metadata.index` in document order and remove
    /// the scratch file. Document ids must cover `0..n` exactly once.
    /// Returns `n`.
    pub fn finish(self) -> Result<u64> {
        let Scratch { out, mut spans, .. } = self.scratch.into_inner();
        out.into_inner().map_err(|e| e.into_error())?;
        spans.sort_unstable_by_key(|&(doc, _, _)| doc);
        for (expected, &(doc, _, _)) in spans.iter().enumerate() {
            if doc.0 != expected as u64 {
                return Err(Error::usage(format!(
                    "metadata document ids must be dense: expected {}, found {}",
                    expected, doc
                )));
            }
        }

        let scratch_path = self.dir.join(SCRATCH_FILE);
        {
            let scratch = MappedFile::open(&scratch_path)?;
            let data = scratch.as_slice();
            let mut db = BufWriter::new(File::create(self.dir.join(DB_FILE))?);
            let mut index = DiskVectorWriter::<u64>::create(self.dir.join(INDEX_FILE))?;
            let mut position = 0u64;
            for &(_, offset, len) in &spans {
                let start = offset as usize;
                let record = data.get(start..start + len as usize).ok_or_else(|| {
                    Error::corrupt("metadata scratch file is shorter than recorded")
                })?;
                index.push(position)?;
                db.write_all(record)?;
                position += len;
            }
            let file = db.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            index.finish()?;
            debug!(docs = spans.len(), bytes = position, "wrote metadata");
        }
        fs::remove_file(&scratch_path)?;
        Ok(spans.len() as u64)
    }
}

/// Read-only metadata database.
#[derive(Debug)]
pub struct MetadataFile {
    schema: Arc<Schema>,
    db: MappedFile,
    index: DiskVector<u64>,
}

impl MetadataFile {
    pub fn open(dir: &Path) -> Result<Self> {
        let schema = Arc::new(Schema::read(dir)?);
        let db = MappedFile::open(dir.join(DB_FILE))?;
        let index = DiskVector::<u64>::open(dir.join(INDEX_FILE))?;
        let last = index.len().checked_sub(1).map(|i| index.get(i));
        if last.is_some_and(|offset| offset >= db.len() as u64) {
            return Err(Error::corrupt(format!(
                "{} points past the end of {}",
                INDEX_FILE, DB_FILE
            )));
        }
        Ok(Self { schema, db, index })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Decode the record of `doc`.
    pub fn get(&self, doc: DocId) -> Result<Metadata> {
        let offset = self.index.try_get(doc.0 as usize).ok_or_else(|| {
            Error::usage(format!(
                "document {} out of range ({} documents)",
                doc,
                self.index.len()
            ))
        })?;
        let data = self
            .db
            .as_slice()
            .get(offset as usize..)
            .ok_or_else(|| Error::corrupt(format!("metadata offset {} out of range", offset)))?;
        let mut input = PackedReader::new(data);
        let length = input.read_u64()?;
        let unique_terms = input.read_u64()?;
        let values = self
            .schema
            .fields()
            .iter()
            .map(|f| FieldValue::read(f.field_type, &mut input))
            .collect::<Result<Vec<_>>>()?;
        Ok(Metadata {
            schema: Arc::clone(&self.schema),
            length,
            unique_terms,
            values,
        })
    }
}

/// One document's decoded metadata.
#[derive(Debug, Clone)]
pub struct Metadata {
    schema: Arc<Schema>,
    length: u64,
    unique_terms: u64,
    values: Vec<FieldValue>,
}

impl Metadata {
    /// Total term occurrences in the document.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Number of distinct terms in the document.
    pub fn unique_terms(&self) -> u64 {
        self.unique_terms
    }

    /// Values in schema order.
    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    /// Value of field `name`. The built-in `length` and `unique-terms`
    /// columns are available too.
    pub fn get(&self, name: &str) -> Option<FieldValue> {
        match name {
            "length" => Some(FieldValue::UnsignedInt(self.length)),
            "unique-terms" => Some(FieldValue::UnsignedInt(self.unique_terms)),
            _ => self
                .schema
                .index_of(name)
                .map(|i| self.values[i].clone()),
        }
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            FieldValue::SignedInt(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        match self.get(name)? {
            FieldValue::UnsignedInt(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            FieldValue::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            FieldValue::Str(v) => Some(v),
            _ => None,
        }
    }
}
