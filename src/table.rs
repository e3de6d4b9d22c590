//! The persisted metrics table
//!
//! Metric columns are not known up front: a run produces whatever channel
//! breakdowns the comparison tool reported, and a metric may be missing for
//! some variants. The table is therefore built in two passes. First the
//! union of metric keys over all rows is computed, then every row is filled
//! in against that union (missing metrics become `0`). Columns are written
//! as the fixed columns followed by the metric columns in sorted order.
//!
//! On reload the fixed text columns stay text, `quality` becomes an
//! integer and everything else is read as a number when it parses.

use crate::error::TableError;
use crate::metrics::{round2, MetricRow, MetricValue};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::warn;

pub const FIXED_COLUMNS: [&str; 8] = [
    "filename",
    "format",
    "quality",
    "params",
    "size_kb",
    "relative_path",
    "diff_path",
    "details",
];

/// Default for a metric a row never reported
pub const MISSING_METRIC: f64 = 0.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    rows: Vec<MetricRow>,
    metric_columns: Vec<String>,
}

/// Sorted union of metric keys across `rows`
pub fn discover_metric_columns(rows: &[MetricRow]) -> Vec<String> {
    rows.iter()
        .flat_map(|r| r.metrics.keys())
        .filter(|k| !FIXED_COLUMNS.contains(&k.as_str()))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Give every row a value for every column, defaulting to [`MISSING_METRIC`].
pub fn reconcile(rows: &mut [MetricRow], columns: &[String]) {
    for row in rows {
        for column in columns {
            row.metrics
                .entry(column.clone())
                .or_insert(MetricValue::Number(MISSING_METRIC));
        }
    }
}

impl ResultTable {
    /// Build a table from freshly collected rows.
    pub fn from_rows(mut rows: Vec<MetricRow>) -> Self {
        let metric_columns = discover_metric_columns(&rows);
        reconcile(&mut rows, &metric_columns);
        Self {
            rows,
            metric_columns,
        }
    }

    pub fn rows(&self) -> &[MetricRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn metric_columns(&self) -> &[String] {
        &self.metric_columns
    }

    /// Header in serialization order
    pub fn columns(&self) -> Vec<String> {
        FIXED_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.metric_columns.iter().cloned())
            .collect()
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), TableError> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(self.columns())?;

        for row in &self.rows {
            let mut record = vec![
                row.filename.clone(),
                row.format.clone(),
                row.quality.to_string(),
                row.params.clone(),
                round2(row.size_kb).to_string(),
                row.relative_path.clone(),
                row.diff_path.clone(),
                row.details.clone(),
            ];
            record.extend(self.metric_columns.iter().map(|c| {
                row.metrics
                    .get(c)
                    .map(MetricValue::to_string)
                    .unwrap_or_default()
            }));
            wtr.write_record(&record)?;
        }

        wtr.flush().map_err(csv::Error::from)?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), TableError> {
        let file = File::create(path).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.write_csv(BufWriter::new(file))
    }

    /// Read a table back. Short rows are accepted; their missing metric
    /// cells are simply absent from the row.
    pub fn read_csv<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = rdr.headers()?.clone();

        let index = |name: &'static str| -> Result<usize, TableError> {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or(TableError::MissingColumn(name))
        };
        let filename = index("filename")?;
        let format = index("format")?;
        let quality = index("quality")?;
        let params = index("params")?;
        let size = index("size_kb")?;
        let relative_path = index("relative_path")?;
        let diff_path = index("diff_path")?;
        let details = index("details")?;

        let metric_columns: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !FIXED_COLUMNS.contains(h))
            .map(|(i, h)| (i, h.to_string()))
            .collect();

        let mut rows = Vec::new();
        for (n, record) in rdr.records().enumerate() {
            let record = record?;
            let text = |i: usize| record.get(i).unwrap_or("").to_string();

            let quality_cell = text(quality);
            let quality = parse_quality(&quality_cell).ok_or(TableError::InvalidQuality {
                row: n + 1,
                value: quality_cell.clone(),
            })?;

            let size_cell = text(size);
            let size_kb = size_cell.trim().parse::<f64>().unwrap_or_else(|_| {
                warn!("row {}: unreadable size {:?}", n + 1, size_cell);
                0.0
            });

            let metrics: BTreeMap<String, MetricValue> = metric_columns
                .iter()
                .filter_map(|(i, name)| {
                    record
                        .get(*i)
                        .map(|cell| (name.clone(), MetricValue::from_cell(cell)))
                })
                .collect();

            rows.push(MetricRow {
                filename: text(filename),
                format: text(format),
                quality,
                params: text(params),
                size_kb,
                relative_path: text(relative_path),
                diff_path: text(diff_path),
                details: text(details),
                metrics,
            });
        }

        Ok(Self {
            rows,
            metric_columns: metric_columns.into_iter().map(|(_, h)| h).collect(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, TableError> {
        let file = File::open(path).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::read_csv(BufReader::new(file))
    }
}

/// `"50"` and `"50.0"` both read as 50.
fn parse_quality(cell: &str) -> Option<u32> {
    let cell = cell.trim();
    cell.parse::<u32>().ok().or_else(|| {
        cell.parse::<f64>()
            .ok()
            .filter(|q| q.is_finite() && *q >= 0.0)
            .map(|q| q as u32)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, quality: u32, size_kb: f64, metrics: &[(&str, f64)]) -> MetricRow {
        MetricRow {
            filename: name.to_string(),
            format: "webp".to_string(),
            quality,
            params: format!("-q {}", quality),
            size_kb,
            relative_path: format!("images/{}", name),
            diff_path: format!("diffs/diff_{}", name),
            details: r#"{"width": 10, "height": 20, "colorspace": "sRGB"}"#.to_string(),
            metrics: metrics
                .iter()
                .map(|(k, v)| (k.to_string(), MetricValue::Number(*v)))
                .collect(),
        }
    }

    fn round_trip(table: &ResultTable) -> ResultTable {
        let mut buf = Vec::new();
        table.write_csv(&mut buf).unwrap();
        ResultTable::read_csv(buf.as_slice()).unwrap()
    }

    // ==========================================================================
    // SCHEMA RECONCILIATION
    // ==========================================================================

    #[test]
    fn test_union_of_metric_columns() {
        let table = ResultTable::from_rows(vec![
            row("a.webp", 50, 10.0, &[("PSNR", 30.0), ("PSNR-Red", 31.0)]),
            row("b.webp", 90, 20.0, &[("SSIM", 0.99)]),
        ]);
        assert_eq!(table.metric_columns(), ["PSNR", "PSNR-Red", "SSIM"]);
        for r in table.rows() {
            assert_eq!(r.metrics.len(), 3, "{} should have every column", r.filename);
        }
        assert_eq!(table.rows()[1].metric("PSNR"), Some(0.0));
        assert_eq!(table.rows()[0].metric("SSIM"), Some(0.0));
    }

    #[test]
    fn test_header_order() {
        let table = ResultTable::from_rows(vec![row("a.webp", 50, 1.0, &[("SSIM", 1.0), ("MAE", 2.0)])]);
        let columns = table.columns();
        assert_eq!(&columns[..8], FIXED_COLUMNS.map(String::from).as_slice());
        assert_eq!(&columns[8..], ["MAE", "SSIM"]);
    }

    #[test]
    fn test_empty_table_has_fixed_header() {
        let table = ResultTable::from_rows(vec![]);
        let mut buf = Vec::new();
        table.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.trim(), FIXED_COLUMNS.join(","));
        assert!(round_trip(&table).is_empty());
    }

    // ==========================================================================
    // ROUND TRIP
    // ==========================================================================

    #[test]
    fn test_round_trip_preserves_values() {
        let table = ResultTable::from_rows(vec![
            row("a.webp", 5, 3.14159, &[("PSNR", 27.123456789012), ("PSNR-Blue", 999.0)]),
            row("b.webp", 100, 120.5, &[("PSNR", 45.5), ("NCC", 0.999_999_1)]),
        ]);
        let loaded = round_trip(&table);

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.metric_columns(), table.metric_columns());

        let a = &loaded.rows()[0];
        assert_eq!(a.quality, 5);
        assert_eq!(a.size_kb, 3.14);
        assert_eq!(a.metric("PSNR"), Some(27.123456789012));
        assert_eq!(a.metric("PSNR-Blue"), Some(999.0));
        assert_eq!(a.metric("NCC"), Some(0.0));
        assert_eq!(a.details, table.rows()[0].details);

        let b = &loaded.rows()[1];
        assert_eq!(b.quality, 100);
        assert_eq!(b.metric("NCC"), Some(0.999_999_1));
    }

    #[test]
    fn test_params_with_spaces_and_quotes_survive() {
        let mut r = row("a.jpg", 50, 1.0, &[]);
        r.params = "-quality 50".to_string();
        r.details = r#"{"colorspace": "sRGB, linear"}"#.to_string();
        let loaded = round_trip(&ResultTable::from_rows(vec![r.clone()]));
        assert_eq!(loaded.rows()[0].params, r.params);
        assert_eq!(loaded.rows()[0].details, r.details);
    }

    // ==========================================================================
    // TYPED RELOAD
    // ==========================================================================

    #[test]
    fn test_reload_coerces_types() {
        let csv = "filename,format,quality,params,size_kb,relative_path,diff_path,details,PSNR,Note\n\
                   a.jpg,jpeg,90.0,-quality 90,12.5,images/a.jpg,,{},33.5,hello\n";
        let table = ResultTable::read_csv(csv.as_bytes()).unwrap();
        let r = &table.rows()[0];
        assert_eq!(r.quality, 90);
        assert_eq!(r.diff_path, "");
        assert_eq!(r.metrics["PSNR"], MetricValue::Number(33.5));
        assert_eq!(r.metrics["Note"], MetricValue::Text("hello".to_string()));
    }

    #[test]
    fn test_short_row_leaves_metric_absent() {
        let csv = "filename,format,quality,params,size_kb,relative_path,diff_path,details,PSNR,SSIM\n\
                   a.jpg,jpeg,90,-quality 90,12.5,images/a.jpg,,{},33.5\n";
        let table = ResultTable::read_csv(csv.as_bytes()).unwrap();
        assert!(table.rows()[0].metrics.contains_key("PSNR"));
        assert!(!table.rows()[0].metrics.contains_key("SSIM"));
    }

    #[test]
    fn test_bad_quality_is_error() {
        let csv = "filename,format,quality,params,size_kb,relative_path,diff_path,details\n\
                   a.jpg,jpeg,high,,1,images/a.jpg,,{}\n";
        let err = ResultTable::read_csv(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, TableError::InvalidQuality { row: 1, .. }));
    }

    #[test]
    fn test_missing_fixed_column_is_error() {
        let csv = "filename,format\na,b\n";
        let err = ResultTable::read_csv(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, TableError::MissingColumn("quality")));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        let table = ResultTable::from_rows(vec![row("a.webp", 50, 2.5, &[("SSIM", 0.95)])]);
        table.save(&path).unwrap();
        assert_eq!(ResultTable::load(&path).unwrap(), table);
    }
}
