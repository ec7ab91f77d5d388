use crate::types::{ParamError, ParamResult};
use std::path::{Path, PathBuf};

/// Text form of a float cell; missing values are written empty
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

/// Parse a float cell; empty and non-numeric cells read as `NaN`
pub fn parse_value(cell: &str) -> f64 {
    cell.trim().parse::<f64>().unwrap_or(f64::NAN)
}

/// Header plus string rows, the shape every parameter CSV takes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Where the table was read from, for diagnostics
    pub source: Option<PathBuf>,
}

impl Table {
    pub fn new<S: Into<String>>(headers: impl IntoIterator<Item = S>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
            source: None,
        }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> ParamResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ParamError::MissingInput {
                path: path.to_path_buf(),
            });
        }

        let mut reader = csv::ReaderBuilder::new().flexible(false).from_path(path)?;
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }

        log::debug!("Read {} rows from {}", rows.len(), path.display());
        Ok(Self {
            headers,
            rows,
            source: Some(path.to_path_buf()),
        })
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> ParamResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;

        log::info!("Wrote {} rows to {}", self.rows.len(), path.display());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == column)
    }

    /// Index of a column that must be present
    pub fn require_column(&self, column: &str) -> ParamResult<usize> {
        self.column_index(column).ok_or_else(|| ParamError::MissingColumn {
            column: column.to_string(),
            path: self.source.clone().unwrap_or_default(),
        })
    }

    pub fn float_column(&self, column: &str) -> ParamResult<Vec<f64>> {
        let idx = self.require_column(column)?;
        Ok(self
            .rows
            .iter()
            .map(|row| row.get(idx).map(|c| parse_value(c)).unwrap_or(f64::NAN))
            .collect())
    }

    pub fn int_column(&self, column: &str) -> ParamResult<Vec<i64>> {
        let idx = self.require_column(column)?;
        self.rows
            .iter()
            .enumerate()
            .map(|(n, row)| {
                let cell = row.get(idx).map(String::as_str).unwrap_or("");
                parse_id(cell).ok_or_else(|| ParamError::InvalidFormat {
                    path: self.source.clone().unwrap_or_default(),
                    reason: format!("row {}: '{}' is not an integer {}", n + 1, cell, column),
                })
            })
            .collect()
    }

    /// Set a column to the given values, replacing it if present
    pub fn set_column(&mut self, column: &str, values: Vec<String>) -> ParamResult<()> {
        if values.len() != self.rows.len() {
            return Err(ParamError::Processing(format!(
                "column '{}' has {} values for {} rows",
                column,
                values.len(),
                self.rows.len()
            )));
        }

        match self.column_index(column) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.headers.push(column.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(())
    }

    /// Append another table's rows, unioning the columns.
    ///
    /// Columns new to `self` are added at the end; cells absent from either
    /// side are left empty.
    pub fn append(&mut self, other: &Table) {
        for header in &other.headers {
            if self.column_index(header).is_none() {
                self.headers.push(header.clone());
                for row in self.rows.iter_mut() {
                    row.push(String::new());
                }
            }
        }

        let mapping: Vec<Option<usize>> = self
            .headers
            .iter()
            .map(|h| other.column_index(h))
            .collect();

        for row in &other.rows {
            let aligned = mapping
                .iter()
                .map(|idx| idx.and_then(|i| row.get(i).cloned()).unwrap_or_default())
                .collect();
            self.rows.push(aligned);
        }
    }
}

/// Integer id that may have been written as a float ("12.0")
pub fn parse_id(cell: &str) -> Option<i64> {
    let cell = cell.trim();
    cell.parse::<i64>().ok().or_else(|| {
        cell.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && v.fract() == 0.0)
            .map(|v| v as i64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_read_keeps_missing_cells_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.csv");
        let mut table = Table::new(["hru_id", "mean"]);
        table.push_row(vec!["1".into(), format_value(2.5)]);
        table.push_row(vec!["2".into(), format_value(f64::NAN)]);
        table.write(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "hru_id,mean\n1,2.5\n2,\n");

        let loaded = Table::read(&path).unwrap();
        let means = loaded.float_column("mean").unwrap();
        assert_eq!(means[0], 2.5);
        assert!(means[1].is_nan());
    }

    #[test]
    fn test_missing_column_names_file() {
        let mut table = Table::new(["a"]);
        table.source = Some(PathBuf::from("x.csv"));
        match table.require_column("hru_id") {
            Err(ParamError::MissingColumn { column, path }) => {
                assert_eq!(column, "hru_id");
                assert_eq!(path, PathBuf::from("x.csv"));
            }
            other => panic!("expected MissingColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_set_column_replaces_existing() {
        let mut table = Table::new(["hru_id", "vpu"]);
        table.push_row(vec!["1".into(), "old".into()]);
        table.set_column("vpu", vec!["01".into()]).unwrap();
        table.set_column("nat_hru_id", vec!["5".into()]).unwrap();
        assert_eq!(table.headers, vec!["hru_id", "vpu", "nat_hru_id"]);
        assert_eq!(table.rows[0], vec!["1", "01", "5"]);
    }

    #[test]
    fn test_append_unions_columns() {
        let mut a = Table::new(["hru_id", "mean"]);
        a.push_row(vec!["1".into(), "3".into()]);
        let mut b = Table::new(["hru_id", "count"]);
        b.push_row(vec!["2".into(), "7".into()]);
        a.append(&b);
        assert_eq!(a.headers, vec!["hru_id", "mean", "count"]);
        assert_eq!(a.rows[0], vec!["1", "3", ""]);
        assert_eq!(a.rows[1], vec!["2", "", "7"]);
    }

    #[test]
    fn test_parse_id_accepts_float_text() {
        assert_eq!(parse_id("12"), Some(12));
        assert_eq!(parse_id("12.0"), Some(12));
        assert_eq!(parse_id("12.5"), None);
    }
}
