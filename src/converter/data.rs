//! Structured-data conversion: parse into a generic tree, serialize again.
//!
//! Scalars and the map/array shape survive; key order and quoting style may not.
//! CSV and TSV are read as an array of header-keyed records with string values.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::fs;

use super::error::ConversionError;
use super::strategy::{ConversionRequest, Strategy};

pub fn parse(source_ext: &str, bytes: &[u8]) -> Result<Value, ConversionError> {
    let invalid = |e: &dyn std::fmt::Display| {
        ConversionError::failed(format!("invalid {} input: {}", source_ext, e))
    };
    match source_ext {
        "json" => serde_json::from_slice(bytes).map_err(|e| invalid(&e)),
        "yaml" => serde_yaml::from_slice(bytes).map_err(|e| invalid(&e)),
        "toml" => {
            let text = std::str::from_utf8(bytes).map_err(|e| invalid(&e))?;
            let table: toml::Table = text.parse().map_err(|e| invalid(&e))?;
            Ok(from_toml(toml::Value::Table(table)))
        }
        "csv" => read_table(bytes, b',').map_err(|e| invalid(&e)),
        "tsv" => read_table(bytes, b'\t').map_err(|e| invalid(&e)),
        other => Err(ConversionError::failed(format!(
            "no structured-data reader for .{}",
            other
        ))),
    }
}

pub fn render(target: &str, value: &Value) -> Result<String, ConversionError> {
    let unrepresentable =
        |e: &dyn std::fmt::Display| ConversionError::failed(format!("cannot write {}: {}", target, e));
    match target {
        "json" => serde_json::to_string_pretty(value)
            .map(|s| s + "\n")
            .map_err(|e| unrepresentable(&e)),
        "yaml" => serde_yaml::to_string(value).map_err(|e| unrepresentable(&e)),
        "toml" => {
            let toml::Value::Table(table) = to_toml(value)? else {
                return Err(ConversionError::failed(
                    "cannot write toml: the document must be a table at the top level",
                ));
            };
            toml::to_string_pretty(&table).map_err(|e| unrepresentable(&e))
        }
        "csv" => write_table(value, b','),
        "tsv" => write_table(value, b'\t'),
        other => Err(ConversionError::failed(format!(
            "no structured-data writer for .{}",
            other
        ))),
    }
}

/// Datetimes become strings; every other TOML value has a direct JSON form.
fn from_toml(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(f.to_string())),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(d) => Value::String(d.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(from_toml).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(key, value)| (key, from_toml(value)))
                .collect(),
        ),
    }
}

/// Strings in TOML datetime syntax are written back as datetimes.
fn to_toml(value: &Value) -> Result<toml::Value, ConversionError> {
    Ok(match value {
        Value::Null => {
            return Err(ConversionError::failed(
                "cannot write toml: it has no representation for null",
            ))
        }
        Value::Bool(b) => toml::Value::Boolean(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => toml::Value::Integer(i),
            (None, Some(f)) => toml::Value::Float(f),
            (None, None) => {
                return Err(ConversionError::failed(format!(
                    "cannot write toml: {} is out of range",
                    n
                )))
            }
        },
        Value::String(s) => match s.parse::<toml::value::Datetime>() {
            Ok(datetime) => toml::Value::Datetime(datetime),
            Err(_) => toml::Value::String(s.clone()),
        },
        Value::Array(items) => {
            toml::Value::Array(items.iter().map(to_toml).collect::<Result<_, _>>()?)
        }
        Value::Object(map) => toml::Value::Table(
            map.iter()
                .map(|(key, value)| Ok((key.clone(), to_toml(value)?)))
                .collect::<Result<_, ConversionError>>()?,
        ),
    })
}

fn table_error(e: impl std::fmt::Display) -> ConversionError {
    ConversionError::failed(format!("cannot write a table: {}", e))
}

/// Header-keyed records with string values. Short rows are padded, extra
/// cells get positional names.
fn read_table(bytes: &[u8], delimiter: u8) -> Result<Value, csv::Error> {
    let bytes = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(bytes);

    let column = |i: usize| format!("column{}", i + 1);
    let header: Vec<String> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, h)| if h.is_empty() { column(i) } else { h.to_string() })
        .collect();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let mut record = Map::new();
        for (i, cell) in row.iter().enumerate() {
            let key = header.get(i).cloned().unwrap_or_else(|| column(i));
            record.insert(key, Value::String(cell.to_string()));
        }
        for key in header.iter().skip(row.len()) {
            record.insert(key.clone(), Value::String(String::new()));
        }
        records.push(Value::Object(record));
    }
    Ok(Value::Array(records))
}

fn write_table(value: &Value, delimiter: u8) -> Result<String, ConversionError> {
    let Value::Array(items) = value else {
        return Err(table_error("the document must be an array of records"));
    };

    let mut header: Vec<String> = Vec::new();
    for item in items {
        match item {
            Value::Object(map) => {
                for key in map.keys() {
                    if !header.contains(key) {
                        header.push(key.clone());
                    }
                }
            }
            Value::Array(_) => {}
            _ => return Err(table_error("every item must be a record or a row")),
        }
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_writer(Vec::new());
    if !header.is_empty() {
        writer.write_record(&header).map_err(table_error)?;
    }
    for item in items {
        let cells: Vec<String> = match item {
            Value::Object(map) => header
                .iter()
                .map(|key| map.get(key).map(cell).unwrap_or_default())
                .collect(),
            Value::Array(row) => row.iter().map(cell).collect(),
            _ => Vec::new(),
        };
        writer.write_record(&cells).map_err(table_error)?;
    }

    let bytes = writer.into_inner().map_err(table_error)?;
    String::from_utf8(bytes).map_err(table_error)
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// json / yaml / toml / csv / tsv, in any direction.
pub struct DataTranscode;

#[async_trait]
impl Strategy for DataTranscode {
    fn name(&self) -> &'static str {
        "data-transcode"
    }

    async fn attempt(&self, request: &ConversionRequest) -> Result<(), ConversionError> {
        let bytes = fs::read(&request.input).await?;
        let value = parse(&request.source_ext, &bytes)?;
        let rendered = render(&request.target, &value)?;
        fs::write(&request.output, rendered).await?;
        Ok(())
    }
}
