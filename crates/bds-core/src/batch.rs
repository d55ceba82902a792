//! CSV batching
//!
//! Turns a dataset's CSV body into a lazy, single-pass sequence of bounded
//! row batches. The header record is skipped. Every row is cut down to the
//! destination table's column count, so columns appended to the export
//! format later do not break the load. Dropped fields are always the
//! trailing ones.

use csv::{QuoteStyle, ReaderBuilder, StringRecord, StringRecordsIntoIter, WriterBuilder};
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Read;

/// Up to `batch_size` rows from one dataset, in source order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvBatch {
    rows: Vec<Vec<String>>,
}

impl CsvBatch {
    /// Create a batch from already-normalized rows
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    /// Rows in this batch
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the batch holds no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Consume the batch, returning its rows
    pub fn into_rows(self) -> Vec<Vec<String>> {
        self.rows
    }

    /// Keep only the last row for each key, in source order
    ///
    /// `key_columns` are field positions; an empty slice keeps every row.
    /// A single upsert statement cannot touch the same key twice, so a batch
    /// repeating a key collapses to its latest row here.
    pub fn last_per_key(&self, key_columns: &[usize]) -> Cow<'_, CsvBatch> {
        if key_columns.is_empty() {
            return Cow::Borrowed(self);
        }

        let key_of = |row: &[String]| -> Vec<Option<String>> {
            key_columns.iter().map(|&i| row.get(i).cloned()).collect()
        };

        let mut last_seen = HashMap::with_capacity(self.rows.len());
        for (index, row) in self.rows.iter().enumerate() {
            last_seen.insert(key_of(row), index);
        }

        if last_seen.len() == self.rows.len() {
            return Cow::Borrowed(self);
        }

        let rows = self
            .rows
            .iter()
            .enumerate()
            .filter(|(index, row)| last_seen.get(&key_of(row)) == Some(index))
            .map(|(_, row)| row.clone())
            .collect();

        Cow::Owned(CsvBatch { rows })
    }

    /// Encode as header-less CSV with minimal quoting, ready for a bulk copy
    pub fn to_csv(&self) -> Result<Vec<u8>, csv::Error> {
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .quote_style(QuoteStyle::Necessary)
            .from_writer(Vec::new());

        for row in &self.rows {
            writer.write_record(row)?;
        }

        writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))
    }
}

/// Keep the first `num_columns` fields of a record
pub fn truncate_row(record: &StringRecord, num_columns: usize) -> Vec<String> {
    record
        .iter()
        .take(num_columns)
        .map(str::to_owned)
        .collect()
}

/// Lazy batch iterator over a CSV reader
///
/// Finite and not restartable: the underlying reader is consumed. A parse
/// error ends iteration; rows read into the failing batch are discarded.
pub struct CsvBatches<R: Read> {
    records: StringRecordsIntoIter<R>,
    batch_size: usize,
    num_columns: usize,
    done: bool,
}

impl<R: Read> CsvBatches<R> {
    /// Batch `reader`, skipping its header record
    ///
    /// # Parameters
    ///
    /// - `reader`: CSV body (UTF-8, BOM already stripped)
    /// - `batch_size`: Maximum rows per batch (values below 1 are treated as 1)
    /// - `num_columns`: Column count of the destination table
    pub fn new(reader: R, batch_size: usize, num_columns: usize) -> Self {
        let records = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader)
            .into_records();

        Self {
            records,
            batch_size: batch_size.max(1),
            num_columns,
            done: false,
        }
    }
}

impl<R: Read> Iterator for CsvBatches<R> {
    type Item = Result<CsvBatch, csv::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut rows = Vec::with_capacity(self.batch_size.min(1024));
        while rows.len() < self.batch_size {
            match self.records.next() {
                Some(Ok(record)) => rows.push(truncate_row(&record, self.num_columns)),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }

        if rows.is_empty() {
            None
        } else {
            Some(Ok(CsvBatch::new(rows)))
        }
    }
}
