//! Tabular I/O (Arrow/Parquet/CSV)
//!
//! Datasets are read once into a single Arrow [`RecordBatch`] wrapped by
//! [`Table`]. CSV input is decoded with the detected text encoding before the
//! Arrow CSV reader sees it; Parquet input goes through the Arrow Parquet reader.
//! Result tables are written as CSV prefixed with the UTF-8 signature so they
//! open cleanly in spreadsheet tools.

mod encoding;

pub use encoding::{decode, detect_encoding, normalize_encoding_name};

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, StringArray};
use arrow::compute::{cast, concat_batches};
use arrow::csv::reader::Format;
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::{Map, Value};

use crate::model::Matrix;
use crate::{Error, Result};

/// In-memory rectangular dataset.
#[derive(Debug, Clone)]
pub struct Table {
    batch: RecordBatch,
}

impl Table {
    /// Wrap an existing record batch.
    #[must_use]
    pub const fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    /// Underlying record batch.
    #[must_use]
    pub const fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Column names in schema order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    /// Whether a column named `name` exists.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.batch.schema().index_of(name).is_ok()
    }

    fn column(&self, name: &str) -> Result<&ArrayRef> {
        let idx = self.batch.schema().index_of(name).map_err(|_| {
            Error::Validation(format!("Column '{name}' not found in dataset"))
        })?;
        Ok(self.batch.column(idx))
    }

    /// Read a numeric column as `f64`; nulls read as `0.0`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the column is absent or not numeric.
    pub fn numeric_column(&self, name: &str) -> Result<Vec<f64>> {
        let array = self.column(name)?;
        if !is_numeric_type(array.data_type()) {
            return Err(Error::Validation(format!(
                "Column '{name}' is not numeric ({})",
                array.data_type()
            )));
        }
        let casted = cast(array, &DataType::Float64)?;
        let values = casted
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| Error::Computation(format!("Column '{name}' did not cast to f64")))?;
        Ok(values
            .iter()
            .map(|v| v.filter(|x| !x.is_nan()).unwrap_or(0.0))
            .collect())
    }

    /// Read any column as text (used for group keys); nulls read as `""`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the column is absent, or an Arrow error
    /// if it cannot be rendered as text.
    pub fn string_column(&self, name: &str) -> Result<Vec<String>> {
        let casted = cast(self.column(name)?, &DataType::Utf8)?;
        let values = casted
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| Error::Computation(format!("Column '{name}' did not cast to text")))?;
        Ok(values
            .iter()
            .map(|v| v.unwrap_or_default().to_string())
            .collect())
    }

    /// Assemble the row-major feature matrix for `features`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if any feature is absent or non-numeric.
    pub fn feature_matrix(&self, features: &[String]) -> Result<Matrix> {
        let columns = features
            .iter()
            .map(|name| self.numeric_column(name))
            .collect::<Result<Vec<_>>>()?;
        Matrix::from_columns(&columns, self.num_rows())
    }

    /// Build a numeric table from inline JSON records.
    ///
    /// Missing keys and `null` read as `0.0`; numeric strings are parsed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if there are no records, a column is absent
    /// from every record, or a value is not numeric.
    pub fn from_records(records: &[Map<String, Value>], columns: &[String]) -> Result<Self> {
        if records.is_empty() {
            return Err(Error::Validation("Input records are empty".to_string()));
        }

        let mut builder = TableBuilder::new();
        for name in columns {
            if !records.iter().any(|r| r.contains_key(name)) {
                return Err(Error::Validation(format!(
                    "Column '{name}' missing from input records"
                )));
            }
            let values = records
                .iter()
                .enumerate()
                .map(|(row, record)| json_number(record.get(name), name, row))
                .collect::<Result<Vec<_>>>()?;
            builder = builder.float_column(name, values);
        }
        builder.build()
    }

    /// Return a copy with `other`'s columns appended.
    ///
    /// # Errors
    ///
    /// Returns an Arrow error if row counts differ.
    pub fn hstack(&self, other: &Self) -> Result<Self> {
        let mut fields: Vec<Field> = self
            .batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.as_ref().clone())
            .collect();
        let mut arrays: Vec<ArrayRef> = self.batch.columns().to_vec();
        for (field, array) in other.batch.schema().fields().iter().zip(other.batch.columns()) {
            fields.push(field.as_ref().clone());
            arrays.push(Arc::clone(array));
        }
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?;
        Ok(Self { batch })
    }
}

fn json_number(value: Option<&Value>, name: &str, row: usize) -> Result<f64> {
    match value {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| {
            Error::Validation(format!("Value for '{name}' in record {row} is out of range"))
        }),
        Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| {
            Error::Validation(format!(
                "Value '{s}' for '{name}' in record {row} is not numeric"
            ))
        }),
        Some(other) => Err(Error::Validation(format!(
            "Value {other} for '{name}' in record {row} is not numeric"
        ))),
    }
}

const fn is_numeric_type(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float16
            | DataType::Float32
            | DataType::Float64
    )
}

/// Column-by-column builder for result tables.
#[derive(Debug, Default)]
pub struct TableBuilder {
    fields: Vec<Field>,
    arrays: Vec<ArrayRef>,
}

impl TableBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a `Float64` column.
    #[must_use]
    pub fn float_column(mut self, name: &str, values: Vec<f64>) -> Self {
        self.fields.push(Field::new(name, DataType::Float64, false));
        self.arrays.push(Arc::new(Float64Array::from(values)));
        self
    }

    /// Append a `Utf8` column.
    #[must_use]
    pub fn text_column(mut self, name: &str, values: Vec<String>) -> Self {
        self.fields.push(Field::new(name, DataType::Utf8, false));
        self.arrays.push(Arc::new(StringArray::from(values)));
        self
    }

    /// Finish the table.
    ///
    /// # Errors
    ///
    /// Returns an Arrow error if column lengths differ.
    pub fn build(self) -> Result<Table> {
        let schema = Arc::new(Schema::new(self.fields));
        let batch = RecordBatch::try_new(schema, self.arrays)?;
        Ok(Table::new(batch))
    }
}

/// Load a dataset from CSV (any detected encoding) or Parquet.
///
/// # Errors
///
/// Returns [`Error::DataAccess`] if the file is missing, unreadable or cannot be
/// parsed.
pub fn load(path: impl AsRef<Path>) -> Result<Table> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::DataAccess(format!(
            "File not found: {}",
            path.display()
        )));
    }

    let is_parquet = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("parquet"));

    let table = if is_parquet {
        load_parquet(path)
    } else {
        load_csv(path)
    };
    table.map_err(|e| match e {
        Error::DataAccess(_) => e,
        other => Error::DataAccess(format!("Failed to read {}: {other}", path.display())),
    })
}

fn load_parquet(path: &Path) -> Result<Table> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = Arc::clone(builder.schema());
    let batches = builder.build()?.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Table::new(concat_batches(&schema, &batches)?))
}

fn load_csv(path: &Path) -> Result<Table> {
    let bytes = std::fs::read(path)?;
    let encoding = detect_encoding(&bytes);
    tracing::debug!(path = %path.display(), %encoding, "decoding dataset");
    let text = decode(&bytes, &encoding)?;
    parse_csv(&text)
}

/// Parse CSV text with a header row and an inferred schema.
///
/// # Errors
///
/// Returns an Arrow error if the text is not well-formed CSV.
pub fn parse_csv(text: &str) -> Result<Table> {
    let format = Format::default().with_header(true);
    let (schema, _) = format.infer_schema(text.as_bytes(), None)?;
    let schema = Arc::new(schema);

    let reader = ReaderBuilder::new(Arc::clone(&schema))
        .with_header(true)
        .build(text.as_bytes())?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    if batches.is_empty() {
        return Ok(Table::new(RecordBatch::new_empty(schema)));
    }
    Ok(Table::new(concat_batches(&schema, &batches)?))
}

/// Write `table` as signed UTF-8 CSV, creating parent directories.
///
/// # Errors
///
/// Returns an IO or Arrow error if the file cannot be written.
pub fn save(table: &Table, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(&[0xEF, 0xBB, 0xBF])?;
    let mut writer = WriterBuilder::new().with_header(true).build(file);
    writer.write(table.batch())?;
    Ok(())
}

/// Check that every feature and target column exists and is numeric.
///
/// All offending columns are reported together.
///
/// # Errors
///
/// Returns [`Error::Validation`] listing missing and non-numeric columns.
pub fn validate_columns(table: &Table, features: &[String], targets: &[String]) -> Result<()> {
    let schema = table.batch().schema();
    let mut missing = Vec::new();
    let mut non_numeric = Vec::new();

    for name in features.iter().chain(targets) {
        match schema.field_with_name(name) {
            Ok(field) if is_numeric_type(field.data_type()) => {}
            Ok(_) => non_numeric.push(name.as_str()),
            Err(_) => missing.push(name.as_str()),
        }
    }

    if missing.is_empty() && non_numeric.is_empty() {
        return Ok(());
    }
    let mut problems = Vec::new();
    if !missing.is_empty() {
        problems.push(format!("missing columns: {}", missing.join(", ")));
    }
    if !non_numeric.is_empty() {
        problems.push(format!("non-numeric columns: {}", non_numeric.join(", ")));
    }
    Err(Error::Validation(problems.join("; ")))
}

/// Resolve a dataset identifier against `root`, appending `.csv` when the
/// identifier has no extension.
///
/// # Errors
///
/// Returns [`Error::Validation`] if the identifier is empty, absolute, or
/// escapes `root`.
pub fn resolve_dataset_path(root: &Path, dataset_id: &str) -> Result<PathBuf> {
    let id = dataset_id.trim();
    if id.is_empty() {
        return Err(Error::Validation("dataset_id is required".to_string()));
    }
    let relative = Path::new(id);
    let escapes = relative.is_absolute()
        || relative
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)));
    if escapes {
        return Err(Error::Validation(format!(
            "dataset_id '{dataset_id}' must be a relative path inside the dataset directory"
        )));
    }

    let mut path = root.join(relative);
    if path.extension().is_none() {
        path.set_extension("csv");
    }
    Ok(path)
}
