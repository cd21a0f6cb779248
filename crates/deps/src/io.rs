//! Serialization of the dependency table.
//!
//! The canonical on-disk and on-wire form is Parquet with a fixed column
//! order. Legacy inputs (CSV, and Parquet written with the older column
//! names `file`/`type`) are normalized to the canonical schema by the
//! single reader in this module, which dispatches on file extension.

use crate::error::{ErrorKind, Result};
use crate::row::ArtifactKind;
use crate::table::DependencyTable;
use arrow::array::{Array, ArrayRef, BooleanArray, Float64Array, Int32Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Column aliases accepted on read: canonical name first, legacy names
/// after.
const PATH_COLUMNS: &[&str] = &["path", "file", ""];
const KIND_COLUMNS: &[&str] = &["kind", "type"];

impl DependencyTable {
    /// Read a dependency table from `path`, recognizing the format by
    /// extension (`parquet` or `csv`).
    ///
    /// # Errors
    /// [`ErrorKind::UnknownFormat`] for other extensions,
    /// [`ErrorKind::Corrupt`] for undecodable content.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let mut table = match extension {
            "parquet" => read_parquet(path)?,
            "csv" => read_csv(path)?,
            other => exn::bail!(ErrorKind::UnknownFormat(other.to_string())),
        };
        table.rebuild_index();
        validate(&table)?;
        Ok(table)
    }

    /// Write the table as Parquet to `path`.
    ///
    /// The write goes to a temporary file in the destination directory
    /// first and is renamed into place, so concurrent readers never see a
    /// half-written table.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        if extension != "parquet" {
            exn::bail!(ErrorKind::UnknownFormat(extension.to_string()));
        }
        let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent).map_err(ErrorKind::Io)?;
        let staging = NamedTempFile::new_in(parent).map_err(ErrorKind::Io)?;
        write_parquet(self, staging.as_file().try_clone().map_err(ErrorKind::Io)?)?;
        staging.persist(path).map_err(|e| ErrorKind::Io(e.error))?;
        Ok(())
    }
}

/// Canonical Arrow schema; column order is fixed and part of the format.
fn schema() -> Schema {
    Schema::new(vec![
        Field::new("path", DataType::Utf8, false),
        Field::new("archive", DataType::Utf8, false),
        Field::new("kind", DataType::Int32, false),
        Field::new("format", DataType::Utf8, false),
        Field::new("version", DataType::Utf8, false),
        Field::new("checksum", DataType::Utf8, false),
        Field::new("removed", DataType::Boolean, false),
        Field::new("bit_depth", DataType::Int32, false),
        Field::new("channels", DataType::Int32, false),
        Field::new("sampling_rate", DataType::Int32, false),
        Field::new("duration", DataType::Float64, false),
    ])
}

fn write_parquet(table: &DependencyTable, file: File) -> Result<()> {
    let schema = Arc::new(schema());
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(table.paths.iter())),
        Arc::new(StringArray::from_iter_values(table.archives.iter())),
        Arc::new(Int32Array::from_iter_values(table.kinds.iter().map(|k| k.as_i32()))),
        Arc::new(StringArray::from_iter_values(table.formats.iter())),
        Arc::new(StringArray::from_iter_values(table.versions.iter())),
        Arc::new(StringArray::from_iter_values(table.checksums.iter())),
        Arc::new(BooleanArray::from(table.removed.clone())),
        Arc::new(Int32Array::from(table.bit_depths.clone())),
        Arc::new(Int32Array::from(table.channels.clone())),
        Arc::new(Int32Array::from(table.sampling_rates.clone())),
        Arc::new(Float64Array::from(table.durations.clone())),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns).map_err(|e| ErrorKind::Corrupt(e.to_string()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).map_err(|e| ErrorKind::Corrupt(e.to_string()))?;
    writer.write(&batch).map_err(|e| ErrorKind::Corrupt(e.to_string()))?;
    writer.close().map_err(|e| ErrorKind::Corrupt(e.to_string()))?;
    Ok(())
}

fn read_parquet(path: &Path) -> Result<DependencyTable> {
    let file = File::open(path).map_err(ErrorKind::Io)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| ErrorKind::Corrupt(e.to_string()))?;
    let reader = builder.build().map_err(|e| ErrorKind::Corrupt(e.to_string()))?;
    let mut table = DependencyTable::new();
    for batch in reader {
        let batch = batch.map_err(|e| ErrorKind::Corrupt(e.to_string()))?;
        append_batch(&mut table, &batch)?;
    }
    Ok(table)
}

fn append_batch(table: &mut DependencyTable, batch: &RecordBatch) -> Result<()> {
    let paths = string_column(batch, PATH_COLUMNS)?;
    let archives = string_column(batch, &["archive"])?;
    let kinds = int_column(batch, KIND_COLUMNS)?;
    let formats = string_column(batch, &["format"])?;
    let versions = string_column(batch, &["version"])?;
    let checksums = string_column(batch, &["checksum"])?;
    let removed = flag_column(batch, "removed")?;
    let bit_depths = int_column(batch, &["bit_depth"])?;
    let channels = int_column(batch, &["channels"])?;
    let sampling_rates = int_column(batch, &["sampling_rate"])?;
    let durations = float_column(batch, "duration")?;

    for i in 0..batch.num_rows() {
        table.paths.push(paths.value(i).to_string());
        table.archives.push(archives.value(i).to_string());
        table.kinds.push(ArtifactKind::from_i32(kinds.value(i))?);
        table.formats.push(formats.value(i).to_string());
        table.versions.push(versions.value(i).to_string());
        table.checksums.push(checksums.value(i).to_string());
        table.removed.push(removed[i]);
        table.bit_depths.push(bit_depths.value(i));
        table.channels.push(channels.value(i));
        table.sampling_rates.push(sampling_rates.value(i));
        table.durations.push(durations.value(i));
    }
    Ok(())
}

fn column<'a>(batch: &'a RecordBatch, names: &[&str]) -> Result<&'a ArrayRef> {
    names
        .iter()
        .find_map(|name| batch.column_by_name(name))
        .ok_or_else(|| exn::Exn::from(ErrorKind::Corrupt(format!("missing column '{}'", names[0]))))
}

fn string_column<'a>(batch: &'a RecordBatch, names: &[&str]) -> Result<&'a StringArray> {
    column(batch, names)?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| exn::Exn::from(ErrorKind::Corrupt(format!("column '{}' is not a string column", names[0]))))
}

fn int_column<'a>(batch: &'a RecordBatch, names: &[&str]) -> Result<&'a Int32Array> {
    column(batch, names)?
        .as_any()
        .downcast_ref::<Int32Array>()
        .ok_or_else(|| exn::Exn::from(ErrorKind::Corrupt(format!("column '{}' is not an int32 column", names[0]))))
}

fn float_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Float64Array> {
    column(batch, &[name])?
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| exn::Exn::from(ErrorKind::Corrupt(format!("column '{name}' is not a float64 column"))))
}

/// The removed column is Boolean in the canonical schema but Int32 (0/1)
/// in legacy tables.
fn flag_column(batch: &RecordBatch, name: &str) -> Result<Vec<bool>> {
    let array = column(batch, &[name])?;
    if let Some(flags) = array.as_any().downcast_ref::<BooleanArray>() {
        return Ok((0..flags.len()).map(|i| flags.value(i)).collect());
    }
    if let Some(flags) = array.as_any().downcast_ref::<Int32Array>() {
        return Ok((0..flags.len()).map(|i| flags.value(i) != 0).collect());
    }
    exn::bail!(ErrorKind::Corrupt(format!("column '{name}' is neither boolean nor int32")))
}

fn read_csv(path: &Path) -> Result<DependencyTable> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| ErrorKind::Corrupt(e.to_string()))?;
    let headers = reader.headers().map_err(|e| ErrorKind::Corrupt(e.to_string()))?.clone();
    let position = |names: &[&str]| -> Result<usize> {
        names
            .iter()
            .find_map(|name| headers.iter().position(|h| h == *name))
            .ok_or_else(|| exn::Exn::from(ErrorKind::Corrupt(format!("missing CSV column '{}'", names[0]))))
    };
    let path_at = position(PATH_COLUMNS)?;
    let archive_at = position(&["archive"])?;
    let kind_at = position(KIND_COLUMNS)?;
    let format_at = position(&["format"])?;
    let version_at = position(&["version"])?;
    let checksum_at = position(&["checksum"])?;
    let removed_at = position(&["removed"])?;
    let bit_depth_at = position(&["bit_depth"])?;
    let channels_at = position(&["channels"])?;
    let sampling_rate_at = position(&["sampling_rate"])?;
    let duration_at = position(&["duration"])?;

    let mut table = DependencyTable::new();
    for record in reader.records() {
        let record = record.map_err(|e| ErrorKind::Corrupt(e.to_string()))?;
        let field = |at: usize| record.get(at).unwrap_or_default();
        table.paths.push(field(path_at).to_string());
        table.archives.push(field(archive_at).to_string());
        table.kinds.push(ArtifactKind::from_i32(parse_i32(field(kind_at))?)?);
        table.formats.push(field(format_at).to_ascii_lowercase());
        table.versions.push(field(version_at).to_string());
        table.checksums.push(field(checksum_at).to_string());
        table.removed.push(parse_flag(field(removed_at))?);
        table.bit_depths.push(parse_i32(field(bit_depth_at))?);
        table.channels.push(parse_i32(field(channels_at))?);
        table.sampling_rates.push(parse_i32(field(sampling_rate_at))?);
        table.durations.push(parse_f64(field(duration_at))?);
    }
    Ok(table)
}

fn parse_i32(field: &str) -> Result<i32> {
    if field.is_empty() {
        return Ok(0);
    }
    // Legacy writers store integer columns as floats ("16.0").
    match field.parse::<f64>() {
        Ok(value) => Ok(value as i32),
        Err(_) => exn::bail!(ErrorKind::Corrupt(format!("invalid integer '{field}'"))),
    }
}

fn parse_f64(field: &str) -> Result<f64> {
    if field.is_empty() {
        return Ok(0.0);
    }
    field.parse::<f64>().map_err(|_| exn::Exn::from(ErrorKind::Corrupt(format!("invalid float '{field}'"))))
}

fn parse_flag(field: &str) -> Result<bool> {
    match field {
        "" | "0" | "false" | "False" => Ok(false),
        "1" | "true" | "True" => Ok(true),
        other => exn::bail!(ErrorKind::Corrupt(format!("invalid flag '{other}'"))),
    }
}

fn validate(table: &DependencyTable) -> Result<()> {
    if table.len() != table.files().collect::<std::collections::HashSet<_>>().len() {
        exn::bail!(ErrorKind::Corrupt("duplicate paths".to_string()));
    }
    Ok(())
}
