//! Streaming decoder for the source document
//!
//! The source is a single JSON object with one array-valued property holding
//! the entity records, typically several gigabytes in size. [`RecordStream`]
//! walks the top-level object byte by byte, skips unrelated properties without
//! keeping them, and hands each array element to `serde_json` on its own, so
//! memory stays proportional to the largest record rather than the document.
//!
//! ## Shape
//!
//! ```text
//! { "meta": ..., "coveredEntities": [ {record}, {record}, ... ], "more": ... }
//! ```
//!
//! Anything else (root not an object, property missing or not an array,
//! truncated input, trailing bytes after the root) is a [`MalformedInputError`].
//! Skipped properties are validated by `serde_json` straight off the reader
//! without being kept; array elements are framed first and then parsed.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::iter::FusedIterator;
use std::path::Path;

use serde::Deserialize;
use serde::de::IgnoredAny;
use serde_json::Value;
use tracing::debug;

use crate::error::MalformedInputError;
use crate::record::{EntityRecord, SourceLayout};

/// Read buffer used when decoding straight from a file
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Element buffers larger than this are released after use
const ELEMENT_BUFFER_RETAIN: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Nothing consumed yet
    Start,
    /// Inside the records array, at least one element returned
    Elements,
    /// Array closed and the rest of the document validated
    Finished,
    /// An error was returned; the stream yields nothing more
    Failed,
}

/// Lazy, non-restartable sequence of entity records read from a JSON stream
pub struct RecordStream<R> {
    reader: R,
    layout: SourceLayout,
    state: State,
    /// Bytes consumed so far, reported in errors
    offset: u64,
    next_index: usize,
    /// Raw bytes of the element (or property name) being decoded
    element: Vec<u8>,
}

impl RecordStream<BufReader<File>> {
    /// Open a source file for streaming
    pub fn open(path: impl AsRef<Path>, layout: SourceLayout) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(
            BufReader::with_capacity(READ_BUFFER_SIZE, file),
            layout,
        ))
    }
}

impl<R: BufRead> RecordStream<R> {
    /// Create a stream over any buffered reader
    pub fn new(reader: R, layout: SourceLayout) -> Self {
        Self {
            reader,
            layout,
            state: State::Start,
            offset: 0,
            next_index: 0,
            element: Vec::new(),
        }
    }

    /// Number of records decoded so far
    pub fn records_read(&self) -> usize {
        self.next_index
    }

    fn peek(&mut self) -> Result<Option<u8>, MalformedInputError> {
        let buf = self.reader.fill_buf()?;
        Ok(buf.first().copied())
    }

    fn bump(&mut self) {
        self.reader.consume(1);
        self.offset += 1;
    }

    fn next_byte(&mut self) -> Result<u8, MalformedInputError> {
        match self.peek()? {
            Some(b) => {
                self.bump();
                Ok(b)
            }
            None => Err(self.eof()),
        }
    }

    /// Consume a byte, keeping it in the element buffer if requested
    fn take(&mut self, byte: u8, keep: bool) {
        self.bump();
        if keep {
            self.element.push(byte);
        }
    }

    fn skip_whitespace(&mut self) -> Result<Option<u8>, MalformedInputError> {
        loop {
            match self.peek()? {
                Some(b' ' | b'\t' | b'\n' | b'\r') => self.bump(),
                other => return Ok(other),
            }
        }
    }

    fn eof(&self) -> MalformedInputError {
        MalformedInputError::UnexpectedEof {
            offset: self.offset,
        }
    }

    fn unexpected(&self, expected: &'static str, found: u8) -> MalformedInputError {
        MalformedInputError::UnexpectedToken {
            expected,
            found: describe_byte(found),
            offset: self.offset,
        }
    }

    fn expect(&mut self, byte: u8, expected: &'static str) -> Result<(), MalformedInputError> {
        match self.skip_whitespace()? {
            Some(b) if b == byte => {
                self.bump();
                Ok(())
            }
            Some(b) => Err(self.unexpected(expected, b)),
            None => Err(self.eof()),
        }
    }

    /// Validate and discard one top-level property value
    fn skip_value(&mut self) -> Result<(), MalformedInputError> {
        match self.skip_whitespace()? {
            // Numbers end on a byte serde_json would have to peek and drop
            Some(b'-' | b'0'..=b'9') => self.scan_scalar(false),
            Some(_) => {
                let start = self.offset;
                let mut counted = CountingReader {
                    inner: &mut self.reader,
                    count: 0,
                };
                let result = {
                    let mut de = serde_json::Deserializer::from_reader(&mut counted);
                    IgnoredAny::deserialize(&mut de).map(|_| ())
                };
                self.offset += counted.count;
                result.map_err(|source| {
                    if source.is_eof() {
                        self.eof()
                    } else {
                        MalformedInputError::Syntax {
                            offset: start,
                            source,
                        }
                    }
                })
            }
            None => Err(self.eof()),
        }
    }

    /// Scan one complete JSON value starting at the next non-whitespace byte
    fn scan_value(&mut self, keep: bool) -> Result<(), MalformedInputError> {
        match self.skip_whitespace()? {
            Some(b'"') => self.scan_string(keep),
            Some(b'{' | b'[') => self.scan_container(keep),
            Some(b @ (b',' | b':' | b']' | b'}')) => Err(self.unexpected("a value", b)),
            Some(_) => self.scan_scalar(keep),
            None => Err(self.eof()),
        }
    }

    /// Scan a string literal; the next byte must be the opening quote
    fn scan_string(&mut self, keep: bool) -> Result<(), MalformedInputError> {
        self.take(b'"', keep);
        loop {
            let b = self.next_byte()?;
            if keep {
                self.element.push(b);
            }
            match b {
                b'"' => return Ok(()),
                b'\\' => {
                    let escaped = self.next_byte()?;
                    if keep {
                        self.element.push(escaped);
                    }
                }
                _ => {}
            }
        }
    }

    /// Scan an object or array, tracking nesting so brackets must match
    fn scan_container(&mut self, keep: bool) -> Result<(), MalformedInputError> {
        let mut closers: Vec<u8> = Vec::new();
        loop {
            let b = match self.peek()? {
                Some(b) => b,
                None => return Err(self.eof()),
            };
            match b {
                b'"' => {
                    self.scan_string(keep)?;
                    continue;
                }
                b'{' => closers.push(b'}'),
                b'[' => closers.push(b']'),
                b'}' | b']' => match closers.pop() {
                    Some(closer) if closer == b => {}
                    Some(b'}') => return Err(self.unexpected("'}'", b)),
                    _ => return Err(self.unexpected("']'", b)),
                },
                _ => {}
            }
            self.take(b, keep);
            if closers.is_empty() {
                return Ok(());
            }
        }
    }

    /// Scan a number, boolean or null and check it parses
    fn scan_scalar(&mut self, keep: bool) -> Result<(), MalformedInputError> {
        let start = self.offset;
        let mut token = Vec::new();
        while let Some(b) = self.peek()? {
            if matches!(b, b' ' | b'\t' | b'\n' | b'\r' | b',' | b':' | b']' | b'}') {
                break;
            }
            token.push(b);
            self.bump();
        }

        if keep {
            self.element.extend_from_slice(&token);
            return Ok(());
        }
        serde_json::from_slice::<serde::de::IgnoredAny>(&token)
            .map(|_| ())
            .map_err(|source| MalformedInputError::Syntax {
                offset: start,
                source,
            })
    }

    fn read_key(&mut self) -> Result<String, MalformedInputError> {
        match self.skip_whitespace()? {
            Some(b'"') => {}
            Some(b) => return Err(self.unexpected("a property name", b)),
            None => return Err(self.eof()),
        }
        let start = self.offset;
        self.element.clear();
        self.scan_string(true)?;
        serde_json::from_slice(&self.element).map_err(|source| MalformedInputError::Syntax {
            offset: start,
            source,
        })
    }

    /// Consume the document up to and including the records array's `[`
    fn open_records_array(&mut self) -> Result<(), MalformedInputError> {
        self.expect(b'{', "'{' opening the top-level object")?;
        if self.skip_whitespace()? == Some(b'}') {
            return Err(self.missing_array());
        }

        loop {
            let key = self.read_key()?;
            self.expect(b':', "':' after a property name")?;

            if key == self.layout.records_key {
                return match self.skip_whitespace()? {
                    Some(b'[') => {
                        self.bump();
                        Ok(())
                    }
                    Some(b) => Err(MalformedInputError::NotAnArray {
                        key,
                        found: value_kind(b).to_string(),
                    }),
                    None => Err(self.eof()),
                };
            }

            debug!(property = %key, offset = self.offset, "skipping top-level property");
            self.skip_value()?;

            match self.skip_whitespace()? {
                Some(b',') => self.bump(),
                Some(b'}') => return Err(self.missing_array()),
                Some(b) => return Err(self.unexpected("',' or '}'", b)),
                None => return Err(self.eof()),
            }
        }
    }

    fn missing_array(&self) -> MalformedInputError {
        MalformedInputError::MissingArray {
            key: self.layout.records_key.clone(),
        }
    }

    /// Decode the next array element, or validate the tail once the array closes
    fn next_record(&mut self, first: bool) -> Result<Option<EntityRecord>, MalformedInputError> {
        match self.skip_whitespace()? {
            Some(b']') => {
                self.bump();
                self.finish_document()?;
                return Ok(None);
            }
            Some(b',') if !first => self.bump(),
            Some(_) if first => {}
            Some(b) => return Err(self.unexpected("',' or ']'", b)),
            None => return Err(self.eof()),
        }

        self.element.clear();
        self.scan_value(true)?;

        let index = self.next_index;
        self.next_index += 1;

        let value: Value = serde_json::from_slice(&self.element)
            .map_err(|source| MalformedInputError::Json { index, source })?;
        if self.element.capacity() > ELEMENT_BUFFER_RETAIN {
            self.element = Vec::new();
        }

        EntityRecord::from_value(value, &self.layout, index).map(Some)
    }

    /// Skip any properties after the records array and require a clean end
    fn finish_document(&mut self) -> Result<(), MalformedInputError> {
        loop {
            match self.skip_whitespace()? {
                Some(b',') => {
                    self.bump();
                    let key = self.read_key()?;
                    self.expect(b':', "':' after a property name")?;
                    debug!(property = %key, offset = self.offset, "skipping top-level property");
                    self.skip_value()?;
                }
                Some(b'}') => {
                    self.bump();
                    break;
                }
                Some(b) => return Err(self.unexpected("',' or '}'", b)),
                None => return Err(self.eof()),
            }
        }

        match self.skip_whitespace()? {
            None => Ok(()),
            Some(b) => Err(self.unexpected("end of input", b)),
        }
    }
}

/// Byte-counting view over the stream's reader
struct CountingReader<'a, R> {
    inner: &'a mut R,
    count: u64,
}

impl<R: Read> Read for CountingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

impl<R: BufRead> Iterator for RecordStream<R> {
    type Item = Result<EntityRecord, MalformedInputError>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = match self.state {
            State::Finished | State::Failed => return None,
            State::Start => match self.open_records_array() {
                Ok(()) => self.next_record(true),
                Err(e) => Err(e),
            },
            State::Elements => self.next_record(false),
        };

        match result {
            Ok(Some(record)) => {
                self.state = State::Elements;
                Some(Ok(record))
            }
            Ok(None) => {
                self.state = State::Finished;
                None
            }
            Err(e) => {
                self.state = State::Failed;
                Some(Err(e))
            }
        }
    }
}

impl<R: BufRead> FusedIterator for RecordStream<R> {}

fn describe_byte(b: u8) -> String {
    if b.is_ascii_graphic() {
        format!("'{}'", b as char)
    } else {
        format!("byte 0x{:02x}", b)
    }
}

fn value_kind(first: u8) -> &'static str {
    match first {
        b'{' => "object",
        b'"' => "string",
        b't' | b'f' => "boolean",
        b'n' => "null",
        b'-' | b'0'..=b'9' => "number",
        _ => "invalid token",
    }
}
