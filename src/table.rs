use std::fmt;

use polars::prelude::*;
use rayon::prelude::*;
use tracing::debug;

/// A single cell, typed once when the source is loaded.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl Value {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::Bool(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "None"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{}", format_float(*x)),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

// Shortest round trip form like Python's repr: integral floats keep their
// decimal point, very large and very small magnitudes use an exponent.
fn format_float(x: f64) -> String {
    if x.is_nan() {
        "nan".to_string()
    } else if x.is_infinite() {
        if x > 0.0 { "inf".into() } else { "-inf".into() }
    } else if x != 0.0 && (x.abs() >= 1e16 || x.abs() < 1e-4) {
        let s = format!("{x:e}");
        match s.split_once('e').map(|(m, e)| (m, e.parse::<i32>())) {
            Some((mantissa, Ok(exp))) => {
                let sign = if exp < 0 { '-' } else { '+' };
                format!("{mantissa}e{sign}{:02}", exp.abs())
            }
            _ => s,
        }
    } else if x.fract() == 0.0 {
        format!("{x:.1}")
    } else {
        format!("{x}")
    }
}

/// Native type of a column, decides how search values are compared.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnKind {
    Int,
    Float,
    Bool,
    Text,
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    pub data: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind, data: Vec<Value>) -> Self {
        Column {
            name: name.into(),
            kind,
            data,
        }
    }

    pub fn as_string(&self) -> String {
        format!(
            "\"{}\", {:?}, # rows {}",
            self.name,
            self.kind,
            self.data.len()
        )
    }

    fn from_polars(column: &polars::prelude::Column) -> Result<Self, PolarsError> {
        let name = column.name().to_string();
        let (kind, data) = match column.dtype() {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32 => {
                let col = column.cast(&DataType::Int64)?;
                let data = col
                    .i64()?
                    .into_iter()
                    .map(|v| v.map_or(Value::Null, Value::Int))
                    .collect();
                (ColumnKind::Int, data)
            }
            // u64 does not fit i64, keep it as float like the other wide numbers.
            DataType::UInt64 | DataType::Float32 | DataType::Float64 => {
                let col = column.cast(&DataType::Float64)?;
                let data = col
                    .f64()?
                    .into_iter()
                    .map(|v| v.map_or(Value::Null, Value::Float))
                    .collect();
                (ColumnKind::Float, data)
            }
            DataType::Boolean => {
                let data = column
                    .bool()?
                    .into_iter()
                    .map(|v| v.map_or(Value::Null, Value::Bool))
                    .collect();
                (ColumnKind::Bool, data)
            }
            _ => {
                let col = column.cast(&DataType::String)?;
                let data = col
                    .str()?
                    .into_iter()
                    .map(|v| v.map_or(Value::Null, |s| Value::Text(s.to_string())))
                    .collect();
                (ColumnKind::Text, data)
            }
        };
        Ok(Column { name, kind, data })
    }
}

/// Rows x named columns, stored column wise.
///
/// Every column holds exactly `size()` cells and the column order is the
/// order of the source.
#[derive(Debug, Clone)]
pub struct Table {
    columns: Vec<Column>,
    size: usize,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Self {
        let size = columns.first().map(|c| c.data.len()).unwrap_or(0);
        debug_assert!(columns.iter().all(|c| c.data.len() == size));
        Table { columns, size }
    }

    /// Convert a polars frame. Each column is converted in its own rayon task.
    pub fn from_frame(df: &DataFrame) -> Result<Self, PolarsError> {
        let columns: Result<Vec<Column>, _> =
            df.get_columns().par_iter().map(Column::from_polars).collect();
        let columns = columns?;
        for c in columns.iter() {
            debug!("Column: {}", c.as_string());
        }
        Ok(Table {
            size: df.height(),
            columns,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn cell(&self, row: usize, column: usize) -> &Value {
        &self.columns[column].data[row]
    }
}
