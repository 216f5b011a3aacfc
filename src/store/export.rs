//! CSV export of stored series

use super::SampleStore;
use crate::error::StoreError;
use crate::types::Value;
use std::io::Write;

impl SampleStore {
    /// Write one tag's samples in `[start, end]` as CSV
    ///
    /// Columns are `timestamp,datetime,value`. Rows are thinned so that
    /// consecutive rows are at least `step` seconds apart (`step <= 0`
    /// keeps every sample). Error markers are written with their kind in
    /// the value column. Returns the number of data rows written.
    pub fn export_csv<W: Write>(
        &self,
        tag_name: &str,
        start: f64,
        end: f64,
        step: f64,
        mut writer: W,
    ) -> Result<usize, StoreError> {
        writeln!(writer, "timestamp,datetime,value")?;

        let mut rows = 0;
        let mut last_written: Option<f64> = None;
        for sample in self.get_series_range(tag_name, start, end) {
            if let Some(last) = last_written {
                if step > 0.0 && sample.timestamp - last < step {
                    continue;
                }
            }
            let datetime = sample
                .datetime()
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
                .unwrap_or_default();
            let value = match sample.value {
                Value::Error(kind) => kind.to_string(),
                other => other.as_f64().map(|v| v.to_string()).unwrap_or_default(),
            };
            writeln!(writer, "{:.6},{},{}", sample.timestamp, datetime, value)?;
            last_written = Some(sample.timestamp);
            rows += 1;
        }
        writer.flush()?;

        tracing::debug!("Exported {} rows of '{}' to CSV", rows, tag_name);
        Ok(rows)
    }
}
