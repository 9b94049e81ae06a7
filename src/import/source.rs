use crate::error::{CiviError, CiviResult};
use crate::models::{Fields, Value};
use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// One input row keyed by column name.
pub type Record = Fields;

/// Delimited file with a header row, read lazily row by row.
///
/// Cells stay strings (empty cells included). Unreadable rows are yielded as
/// errors so the pool can count them as failed records.
pub struct CsvRecordSource<R: Read = File> {
    headers: Vec<String>,
    rows: StringRecordsIntoIter<R>,
}

impl CsvRecordSource<File> {
    pub fn open(path: impl AsRef<Path>, delimiter: u8) -> CiviResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            CiviError::Config(format!("cannot open {}: {}", path.display(), err))
        })?;
        Self::from_reader(file, delimiter)
    }
}

impl<R: Read> CsvRecordSource<R> {
    pub fn from_reader(reader: R, delimiter: u8) -> CiviResult<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .from_reader(reader);
        let headers = reader
            .headers()?
            .iter()
            .map(|name| name.trim_start_matches('\u{feff}').trim().to_string())
            .collect();
        Ok(Self {
            headers,
            rows: reader.into_records(),
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn to_record(&self, row: &StringRecord) -> Record {
        self.headers
            .iter()
            .zip(row.iter())
            .map(|(name, cell)| (name.clone(), Value::from(cell)))
            .collect()
    }
}

impl<R: Read> Iterator for CsvRecordSource<R> {
    type Item = CiviResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        Some(row.map(|row| self.to_record(&row)).map_err(CiviError::from))
    }
}
