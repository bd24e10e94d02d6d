//! Incremental reader for recorded session logs
//!
//! Logs are read in fixed-size chunks so memory stays bounded no matter how
//! long the recording is. Only the unterminated tail of the last chunk is
//! carried over between reads; completed lines are queued and parsed one at a
//! time.

use crate::core::PacketRecord;
use crate::error::LogError;
use crate::input::line::parse_line;
use flate2::read::MultiGzDecoder;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Each line holds a marker, a timestamp and up to 65535 hex-encoded bytes,
/// so one chunk always fits at least one full line
pub const READ_CHUNK_SIZE: usize = 256 * 1024;

/// Underlying byte source, plain or gzip-compressed
enum LogSource {
    Plain(File),
    Gzip(MultiGzDecoder<File>),
}

impl LogSource {
    fn open(path: &Path) -> Result<Self, LogError> {
        let open_err = |source: io::Error| LogError::Open {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(open_err)?;

        if !is_compressed(path) {
            return Ok(LogSource::Plain(file));
        }

        let decoder = MultiGzDecoder::new(file);
        if decoder.header().is_none() {
            return Err(open_err(io::Error::new(
                io::ErrorKind::InvalidData,
                "not a valid gzip stream",
            )));
        }
        Ok(LogSource::Gzip(decoder))
    }

    fn rewind(self) -> io::Result<Self> {
        match self {
            LogSource::Plain(mut file) => {
                file.seek(SeekFrom::Start(0))?;
                Ok(LogSource::Plain(file))
            }
            LogSource::Gzip(decoder) => {
                let mut file = decoder.into_inner();
                file.seek(SeekFrom::Start(0))?;
                Ok(LogSource::Gzip(MultiGzDecoder::new(file)))
            }
        }
    }
}

impl Read for LogSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            LogSource::Plain(file) => file.read(buf),
            LogSource::Gzip(decoder) => decoder.read(buf),
        }
    }
}

/// Check the extension for a compressed log (`.gz`)
pub fn is_compressed(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false)
}

/// Forward-only reader yielding packet records in file order
pub struct SessionLogReader {
    path: PathBuf,
    source: Option<LogSource>,
    chunk: Vec<u8>,
    /// Bytes of the current unterminated line
    buffer: Vec<u8>,
    /// Complete lines not yet handed out
    lines: VecDeque<Vec<u8>>,
    /// Number of the last line handed out (1-based)
    line_number: u64,
    exhausted: bool,
}

impl SessionLogReader {
    /// Open a session log, decompressing `.gz` files transparently
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        Self::open_with_chunk_size(path, READ_CHUNK_SIZE)
    }

    pub fn open_with_chunk_size(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let source = LogSource::open(&path)?;
        debug!("Opened session log {} (chunk size {})", path.display(), chunk_size);

        Ok(Self {
            path,
            source: Some(source),
            chunk: vec![0; chunk_size.max(1)],
            buffer: Vec::new(),
            lines: VecDeque::new(),
            line_number: 0,
            exhausted: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Line number of the most recently returned line
    pub fn line_number(&self) -> u64 {
        self.line_number
    }

    /// Next record in file order, or `None` once the log is exhausted
    ///
    /// A malformed line yields `LogError::Parse`; the reader stays usable
    /// and the next call continues with the following line. Blank lines are
    /// skipped.
    pub fn next_record(&mut self) -> Result<Option<PacketRecord>, LogError> {
        loop {
            let Some(raw) = self.next_line()? else {
                return Ok(None);
            };

            let text = String::from_utf8_lossy(&raw);
            if text.trim().is_empty() {
                continue;
            }

            return parse_line(&text).map(Some).map_err(|reason| LogError::Parse {
                line: self.line_number,
                raw: text.trim_end().to_string(),
                reason,
            });
        }
    }

    /// Job that finds the final line's timestamp with a separate cursor
    ///
    /// The job reads the whole file, so run it off the async runtime. The
    /// forward position of this reader is not affected.
    pub fn last_record_scan(&self) -> impl FnOnce() -> Result<Option<i64>, LogError> + Send + 'static {
        let path = self.path.clone();
        let chunk_size = self.chunk.len();
        move || Self::scan_last_timestamp(&path, chunk_size)
    }

    fn scan_last_timestamp(path: &Path, chunk_size: usize) -> Result<Option<i64>, LogError> {
        let mut scanner = Self::open_with_chunk_size(path, chunk_size)?;
        let mut last: Option<(u64, Vec<u8>)> = None;

        while let Some(raw) = scanner.next_line()? {
            if !raw.iter().all(u8::is_ascii_whitespace) {
                last = Some((scanner.line_number, raw));
            }
        }

        let Some((line, raw)) = last else {
            return Ok(None);
        };

        let text = String::from_utf8_lossy(&raw);
        parse_line(&text)
            .map(|record| Some(record.timestamp_millis))
            .map_err(|reason| LogError::Parse {
                line,
                raw: text.trim_end().to_string(),
                reason,
            })
    }

    /// Rewind to the beginning of the log
    pub fn reset(&mut self) -> Result<(), LogError> {
        let source = match self.source.take() {
            Some(source) => source.rewind()?,
            None => LogSource::open(&self.path)?,
        };

        self.source = Some(source);
        self.buffer.clear();
        self.lines.clear();
        self.line_number = 0;
        self.exhausted = false;
        Ok(())
    }

    /// Release the underlying file; further reads report exhaustion
    pub fn close(&mut self) {
        if self.source.take().is_some() {
            debug!("Closed session log {}", self.path.display());
        }
        self.buffer.clear();
        self.lines.clear();
        self.exhausted = true;
    }

    fn next_line(&mut self) -> Result<Option<Vec<u8>>, LogError> {
        loop {
            if let Some(line) = self.lines.pop_front() {
                self.line_number += 1;
                return Ok(Some(line));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fill()?;
        }
    }

    /// Read one chunk and move every newly completed line to the queue
    fn fill(&mut self) -> Result<(), LogError> {
        let Some(source) = self.source.as_mut() else {
            self.exhausted = true;
            return Ok(());
        };

        let n = loop {
            match source.read(&mut self.chunk) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };

        if n == 0 {
            self.exhausted = true;
            if !self.buffer.is_empty() {
                // last line without a trailing newline
                self.lines.push_back(std::mem::take(&mut self.buffer));
            }
            return Ok(());
        }

        let scan_from = self.buffer.len();
        self.buffer.extend_from_slice(&self.chunk[..n]);

        let mut line_start = 0;
        for i in scan_from..self.buffer.len() {
            if self.buffer[i] == b'\n' {
                self.lines.push_back(self.buffer[line_start..i].to_vec());
                line_start = i + 1;
            }
        }
        self.buffer.drain(..line_start);

        Ok(())
    }
}

impl Iterator for SessionLogReader {
    type Item = Result<PacketRecord, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Direction;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = "< 1000 48656c6c6f\n> 1200 0102\n< 1500 776f726c64\n";

    fn write_log(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn write_gzip_log(contents: &str) -> NamedTempFile {
        let file = tempfile::Builder::new().suffix(".gz").tempfile().unwrap();
        let mut encoder = GzEncoder::new(file.reopen().unwrap(), Compression::default());
        encoder.write_all(contents.as_bytes()).unwrap();
        encoder.finish().unwrap();
        file
    }

    fn collect_ok(reader: &mut SessionLogReader) -> Vec<PacketRecord> {
        let mut records = Vec::new();
        loop {
            match reader.next_record() {
                Ok(Some(record)) => records.push(record),
                Ok(None) => return records,
                Err(e) if e.is_recoverable() => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    }

    #[test]
    fn test_reads_records_in_order() {
        let file = write_log(SAMPLE);
        let mut reader = SessionLogReader::open(file.path()).unwrap();

        let records = collect_ok(&mut reader);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].payload, b"Hello");
        assert_eq!(records[1].direction, Direction::Inbound);
        assert_eq!(records[2].timestamp_millis, 1500);

        // Exhaustion is sticky
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn test_last_line_without_newline() {
        let file = write_log("< 1000 48656c6c6f\n> 1627391001 776f726c640a");
        let mut reader = SessionLogReader::open(file.path()).unwrap();

        let records = collect_ok(&mut reader);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].payload, b"world\n");
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let file = write_log("< 1000 48656c6c6f\n< oops zz\n< 1500 776f726c64\n");
        let mut reader = SessionLogReader::open(file.path()).unwrap();

        assert!(reader.next_record().unwrap().is_some());
        match reader.next_record() {
            Err(LogError::Parse { line, raw, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(raw, "< oops zz");
            }
            other => panic!("expected parse error, got {other:?}"),
        }
        let third = reader.next_record().unwrap().unwrap();
        assert_eq!(third.timestamp_millis, 1500);
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        let file = write_log("\n< 1000 00\n\n  \n< 2000 01\n\n");
        let mut reader = SessionLogReader::open(file.path()).unwrap();
        assert_eq!(collect_ok(&mut reader).len(), 2);
    }

    #[test]
    fn test_missing_file() {
        let result = SessionLogReader::open("/nonexistent/session.cam");
        assert!(matches!(result, Err(LogError::Open { .. })));
    }

    #[test]
    fn test_gzip_log() {
        let file = write_gzip_log(SAMPLE);
        let mut reader = SessionLogReader::open(file.path()).unwrap();
        assert_eq!(collect_ok(&mut reader).len(), 3);

        reader.reset().unwrap();
        assert_eq!(collect_ok(&mut reader).len(), 3);
    }

    #[test]
    fn test_concatenated_gzip_members() {
        let file = write_gzip_log("< 1000 01\n");
        let mut appended = std::fs::OpenOptions::new().append(true).open(file.path()).unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"< 2000 02\n").unwrap();
        appended.write_all(&encoder.finish().unwrap()).unwrap();
        appended.flush().unwrap();

        let mut reader = SessionLogReader::open(file.path()).unwrap();
        let payloads: Vec<_> = collect_ok(&mut reader).into_iter().map(|r| r.payload).collect();
        assert_eq!(payloads, vec![vec![0x01], vec![0x02]]);
        assert_eq!(reader.last_record_scan()().unwrap(), Some(2000));

        reader.reset().unwrap();
        assert_eq!(collect_ok(&mut reader).len(), 2);
    }

    #[test]
    fn test_corrupt_gzip_fails_to_open() {
        let file = tempfile::Builder::new().suffix(".gz").tempfile().unwrap();
        std::fs::write(file.path(), SAMPLE).unwrap();

        let result = SessionLogReader::open(file.path());
        assert!(matches!(result, Err(LogError::Open { .. })));
    }

    #[test]
    fn test_reset_yields_identical_sequence() {
        let file = write_log(SAMPLE);
        let mut reader = SessionLogReader::open_with_chunk_size(file.path(), 7).unwrap();

        let first = collect_ok(&mut reader);
        reader.reset().unwrap();
        let second = collect_ok(&mut reader);

        assert_eq!(first, second);
        assert_eq!(reader.line_number(), 3);
    }

    #[test]
    fn test_last_record_timestamp_is_independent() {
        let file = write_log(SAMPLE);
        let mut reader = SessionLogReader::open(file.path()).unwrap();

        let first = reader.next_record().unwrap().unwrap();
        assert_eq!(reader.last_record_scan()().unwrap(), Some(1500));

        let second = reader.next_record().unwrap().unwrap();
        assert_eq!(first.timestamp_millis, 1000);
        assert_eq!(second.timestamp_millis, 1200);
    }

    #[test]
    fn test_last_record_timestamp_of_empty_log() {
        let file = write_log("");
        let reader = SessionLogReader::open(file.path()).unwrap();
        assert_eq!(reader.last_record_scan()().unwrap(), None);
    }

    #[test]
    fn test_close_releases_source() {
        let file = write_log(SAMPLE);
        let mut reader = SessionLogReader::open(file.path()).unwrap();
        reader.close();
        assert!(reader.next_record().unwrap().is_none());

        reader.reset().unwrap();
        assert_eq!(collect_ok(&mut reader).len(), 3);
    }

    #[test]
    fn test_iterator() {
        let file = write_log(SAMPLE);
        let reader = SessionLogReader::open(file.path()).unwrap();
        let outbound = reader
            .filter_map(Result::ok)
            .filter(PacketRecord::is_replayable)
            .count();
        assert_eq!(outbound, 2);
    }

    fn arb_line() -> impl Strategy<Value = String> {
        (
            prop::bool::ANY,
            0i64..10_000_000,
            prop::collection::vec(any::<u8>(), 1..40),
        )
            .prop_map(|(outbound, ts, payload)| {
                format!("{} {} {}", if outbound { '<' } else { '>' }, ts, hex::encode(payload))
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_chunk_size_does_not_change_records(
            lines in prop::collection::vec(arb_line(), 0..20),
            chunk_size in 1usize..64,
            trailing_newline in prop::bool::ANY,
        ) {
            let mut contents = lines.join("\n");
            if trailing_newline {
                contents.push('\n');
            }
            let file = write_log(&contents);

            let mut whole = SessionLogReader::open(file.path()).unwrap();
            let mut chunked = SessionLogReader::open_with_chunk_size(file.path(), chunk_size).unwrap();

            let expected = collect_ok(&mut whole);
            prop_assert_eq!(expected.len(), lines.len());
            prop_assert_eq!(collect_ok(&mut chunked), expected);
        }
    }
}
