use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::ingest::IngestError;

/// A stream of tabular rows: one header record, then string records.
///
/// Implementations own format concerns (delimiters, quoting, encodings);
/// the ingest path only sees headers and cell strings.
pub trait RowSource {
    /// The raw header record, read before any row.
    fn headers(&mut self) -> Result<Vec<String>, IngestError>;

    /// The next row, `None` at end of input. Rows shorter than the header
    /// are padded with empty cells by the caller.
    fn next_row(&mut self) -> Result<Option<Vec<String>>, IngestError>;
}

/// RFC-4180 CSV over any reader, streaming record by record.
pub struct CsvRowSource<R: Read> {
    reader: csv::Reader<R>,
}

impl CsvRowSource<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let file = File::open(path.as_ref()).map_err(IngestError::Io)?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: Read> CsvRowSource<R> {
    pub fn from_reader(reader: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        CsvRowSource { reader }
    }
}

impl<R: Read> RowSource for CsvRowSource<R> {
    fn headers(&mut self) -> Result<Vec<String>, IngestError> {
        let headers = self.reader.headers().map_err(IngestError::Csv)?;
        Ok(headers.iter().map(str::to_string).collect())
    }

    fn next_row(&mut self) -> Result<Option<Vec<String>>, IngestError> {
        let mut record = csv::StringRecord::new();
        if self.reader.read_record(&mut record).map_err(IngestError::Csv)? {
            Ok(Some(record.iter().map(str::to_string).collect()))
        } else {
            Ok(None)
        }
    }
}
