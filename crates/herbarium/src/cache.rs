//! Incrementally written on-disk cache of observations.
//!
//! The cache is a single JSON array. [`CacheWriter`] writes the opening
//! bracket on creation, one record per [`CacheWriter::append`] (flushed
//! immediately), and the closing bracket only in [`CacheWriter::finish`].
//! A run that dies or is abandoned mid-way leaves an unterminated array,
//! which [`load_cache`] refuses to parse.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::CacheError;
use crate::record::Observation;

/// Default cache file name.
pub const DEFAULT_CACHE_FILE: &str = "inaturalist_observations.json";

/// Destination for records streamed out of a paginated fetch.
pub trait RecordSink<T> {
    type Error;

    fn accept(&mut self, record: T) -> Result<(), Self::Error>;
}

impl<T> RecordSink<T> for Vec<T> {
    type Error = std::convert::Infallible;

    fn accept(&mut self, record: T) -> Result<(), Self::Error> {
        self.push(record);
        Ok(())
    }
}

/// Streams records into a JSON array file.
///
/// Dropping the writer without calling [`finish`](Self::finish) flushes
/// what was written but leaves the document unterminated.
#[derive(Debug)]
pub struct CacheWriter {
    path: PathBuf,
    out: BufWriter<File>,
    written: usize,
}

impl CacheWriter {
    /// Start a new cache document at `path`, truncating any existing file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| CacheError::io(&path, e))?;
        let mut writer = Self {
            path,
            out: BufWriter::new(file),
            written: 0,
        };
        writer.write_raw(b"[")?;
        Ok(writer)
    }

    /// Records appended so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Serialize one record and flush it to disk.
    pub fn append(&mut self, record: &Observation) -> Result<(), CacheError> {
        let json = serde_json::to_vec(record).map_err(|source| CacheError::Serialize {
            id: record.id,
            source,
        })?;
        if self.written > 0 {
            self.write_raw(b",\n")?;
        }
        self.write_raw(&json)?;
        self.out.flush().map_err(|e| CacheError::io(&self.path, e))?;
        self.written += 1;
        Ok(())
    }

    /// Close the array and flush. Returns the number of records written.
    pub fn finish(mut self) -> Result<usize, CacheError> {
        self.write_raw(b"]\n")?;
        self.out.flush().map_err(|e| CacheError::io(&self.path, e))?;
        self.out
            .get_ref()
            .sync_all()
            .map_err(|e| CacheError::io(&self.path, e))?;
        tracing::debug!(path = %self.path.display(), records = self.written, "Cache finalized");
        Ok(self.written)
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), CacheError> {
        self.out
            .write_all(bytes)
            .map_err(|e| CacheError::io(&self.path, e))
    }
}

impl RecordSink<Observation> for CacheWriter {
    type Error = CacheError;

    fn accept(&mut self, record: Observation) -> Result<(), Self::Error> {
        self.append(&record)
    }
}

/// Load a complete cache document.
///
/// Fails closed: a missing file is [`CacheError::Missing`] and any document
/// that does not parse as a whole (including one cut off mid-write) is
/// [`CacheError::Incomplete`]. No partial result is ever returned.
pub fn load_cache(path: impl AsRef<Path>) -> Result<Vec<Observation>, CacheError> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CacheError::Missing(path.to_path_buf()));
        }
        Err(e) => return Err(CacheError::io(path, e)),
    };

    serde_json::from_reader(BufReader::new(file)).map_err(|source| {
        tracing::warn!(path = %path.display(), error = %source, "Cache file is not a complete document");
        CacheError::Incomplete {
            path: path.to_path_buf(),
            source,
        }
    })
}
