// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Streaming tab-separated codec for operation records.
//!
//! The format is header-first, one record per row, tab delimited. Fields
//! containing tabs, quotes, or newlines are double-quoted with embedded
//! quotes doubled. Timestamps use RFC 3339 with nanosecond precision; an
//! absent first-byte stamp encodes as the empty string. Decoders locate
//! columns by header name, tolerate unknown columns in any position, and
//! skip comment lines starting with `#`.

use crate::{Categories, Error, Operation, Operations, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// The columns written by [Encoder], in order.
pub const COLUMNS: [&str; 14] = [
    "idx",
    "thread",
    "op",
    "client_id",
    "n_objects",
    "bytes",
    "endpoint",
    "file",
    "error",
    "start",
    "first_byte",
    "end",
    "duration_ns",
    "cat",
];

fn format_ts(ts: OffsetDateTime) -> Result<String> {
    ts.format(&Rfc3339)
        .map_err(|e| Error::format(format!("cannot format timestamp: {e}")))
}

fn parse_ts(field: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(field, &Rfc3339)
        .map_err(|e| Error::format(format!("invalid timestamp {field:?}: {e}")))
}

/// A streaming encoder writing one record at a time.
pub struct Encoder<W: Write> {
    writer: csv::Writer<W>,
    idx: u64,
}

impl<W: Write> Encoder<W> {
    /// Creates an encoder and writes the header row.
    pub fn new(inner: W) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_writer(inner);
        writer
            .write_record(COLUMNS)
            .map_err(|e| Error::io(format!("cannot write header: {e}")))?;
        Ok(Self { writer, idx: 0 })
    }

    /// Writes a single record.
    pub fn write(&mut self, op: &Operation) -> Result<()> {
        let first_byte = match op.first_byte {
            None => String::new(),
            Some(fb) => format_ts(fb)?,
        };
        let row = [
            self.idx.to_string(),
            op.thread.to_string(),
            op.op_type.clone(),
            op.client_id.clone(),
            op.object_count.to_string(),
            op.size_bytes.to_string(),
            op.endpoint.clone(),
            op.file.clone(),
            op.err.clone(),
            format_ts(op.start)?,
            first_byte,
            format_ts(op.end)?,
            op.duration().whole_nanoseconds().to_string(),
            op.categories.to_decimal(),
        ];
        self.writer
            .write_record(&row)
            .map_err(|e| Error::io(format!("cannot write record: {e}")))?;
        self.idx += 1;
        Ok(())
    }

    /// Writes every record in the sequence.
    pub fn write_all(&mut self, ops: &Operations) -> Result<()> {
        for op in ops {
            self.write(op)?;
        }
        Ok(())
    }

    /// Flushes the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| Error::io(format!("cannot flush: {e}")))
    }
}

/// Column positions resolved from the header by name.
#[derive(Debug)]
struct Columns {
    thread: usize,
    op: usize,
    client_id: usize,
    n_objects: usize,
    bytes: usize,
    endpoint: usize,
    file: usize,
    error: usize,
    start: usize,
    first_byte: usize,
    end: usize,
    cat: usize,
}

impl Columns {
    fn resolve(header: &csv::StringRecord) -> Result<Self> {
        let find = |name: &str| {
            header
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| Error::format(format!("missing column {name:?} in header")))
        };
        Ok(Self {
            thread: find("thread")?,
            op: find("op")?,
            client_id: find("client_id")?,
            n_objects: find("n_objects")?,
            bytes: find("bytes")?,
            endpoint: find("endpoint")?,
            file: find("file")?,
            error: find("error")?,
            start: find("start")?,
            first_byte: find("first_byte")?,
            end: find("end")?,
            cat: find("cat")?,
        })
    }
}

/// Interns repeated identifiers into small stable tokens.
///
/// Analysis does not care about the exact client or object names, only
/// about their identity, so huge logs can be decoded with bounded memory.
#[derive(Debug, Default)]
struct Interner {
    clients: HashMap<String, String>,
    files: HashMap<String, String>,
}

impl Interner {
    fn client(&mut self, name: &str) -> String {
        if let Some(token) = self.clients.get(name) {
            return token.clone();
        }
        let token = format!("c{}", self.clients.len());
        self.clients.insert(name.to_string(), token.clone());
        token
    }

    fn file(&mut self, name: &str) -> String {
        if let Some(token) = self.files.get(name) {
            return token.clone();
        }
        let token = format!("o{}", self.files.len());
        self.files.insert(name.to_string(), token.clone());
        token
    }
}

/// A streaming decoder yielding one record at a time.
pub struct Decoder<R: Read> {
    reader: csv::Reader<R>,
    columns: Columns,
    row: csv::StringRecord,
    interner: Option<Interner>,
}

impl<R: Read> Decoder<R> {
    /// Creates a decoder, reading and resolving the header row.
    pub fn new(inner: R) -> Result<Self> {
        Self::build(inner, None)
    }

    /// Creates a decoder that interns `client_id` and `file` values.
    pub fn analyze_only(inner: R) -> Result<Self> {
        Self::build(inner, Some(Interner::default()))
    }

    fn build(inner: R, interner: Option<Interner>) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .comment(Some(b'#'))
            .flexible(true)
            .from_reader(inner);
        let header = reader
            .headers()
            .map_err(|e| Error::format(format!("cannot read header: {e}")))?;
        let columns = Columns::resolve(header)?;
        Ok(Self {
            reader,
            columns,
            row: csv::StringRecord::new(),
            interner,
        })
    }

    /// Reads the next record. Returns `None` at end of input.
    pub fn next_record(&mut self) -> Option<Result<Operation>> {
        match self.reader.read_record(&mut self.row) {
            Err(e) => Some(Err(Error::format(format!("cannot read record: {e}")))),
            Ok(false) => None,
            Ok(true) => Some(self.parse()),
        }
    }

    fn parse(&mut self) -> Result<Operation> {
        let field = |i: usize| self.row.get(i).unwrap_or("");
        let cols = &self.columns;
        let thread = field(cols.thread)
            .parse::<u16>()
            .map_err(|e| Error::format(format!("invalid thread: {e}")))?;
        let object_count = field(cols.n_objects)
            .parse::<u32>()
            .map_err(|e| Error::format(format!("invalid n_objects: {e}")))?;
        let size_bytes = field(cols.bytes)
            .parse::<i64>()
            .map_err(|e| Error::format(format!("invalid bytes: {e}")))?;
        let start = parse_ts(field(cols.start))?;
        let end = parse_ts(field(cols.end))?;
        let first_byte = match field(cols.first_byte) {
            "" => None,
            s => Some(parse_ts(s)?),
        };
        let categories = Categories::from_decimal(field(cols.cat))?;
        let op_type = field(cols.op).to_string();
        let endpoint = field(cols.endpoint).to_string();
        let err = field(cols.error).to_string();
        let client_id = field(cols.client_id).to_string();
        let file = field(cols.file).to_string();
        let (client_id, file) = match self.interner.as_mut() {
            None => (client_id, file),
            Some(interner) => (interner.client(&client_id), interner.file(&file)),
        };
        Ok(Operation {
            op_type,
            client_id,
            endpoint,
            thread,
            object_count,
            size_bytes,
            file,
            start,
            first_byte,
            end,
            err,
            categories,
        })
    }

    /// Reads all remaining records into a sequence.
    pub fn decode_all(&mut self) -> Result<Operations> {
        let mut ops = Operations::new();
        while let Some(record) = self.next_record() {
            ops.push(record?);
        }
        Ok(ops)
    }
}

impl<R: Read> Iterator for Decoder<R> {
    type Item = Result<Operation>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record()
    }
}

/// Decodes records on a blocking task, streaming them into a bounded channel.
///
/// The task stops early when the receiver is dropped.
pub fn spawn_decode<R>(inner: R, capacity: usize) -> Result<tokio::sync::mpsc::Receiver<Result<Operation>>>
where
    R: Read + Send + 'static,
{
    let mut decoder = Decoder::new(inner)?;
    let (tx, rx) = tokio::sync::mpsc::channel(capacity);
    tokio::task::spawn_blocking(move || {
        while let Some(record) = decoder.next_record() {
            if tx.blocking_send(record).is_err() {
                break;
            }
        }
    });
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op;
    use pretty_assertions::assert_eq;
    use time::macros::datetime;

    fn sample_ops() -> Operations {
        let base = Operation {
            op_type: op::GET.into(),
            client_id: "bench-host-1".into(),
            endpoint: "http://127.0.0.1:9000".into(),
            thread: 7,
            object_count: 1,
            size_bytes: 4096,
            file: "data/obj-000".into(),
            start: datetime!(2025-06-01 10:00:00.000000001 UTC),
            first_byte: Some(datetime!(2025-06-01 10:00:00.123456789 UTC)),
            end: datetime!(2025-06-01 10:00:01.5 UTC),
            err: String::new(),
            categories: Categories::CACHE_HIT,
        };
        let failed = Operation {
            op_type: op::PUT.into(),
            first_byte: None,
            size_bytes: 0,
            err: "tab\there and \"quotes\"\nand a newline".into(),
            categories: Categories::empty(),
            ..base.clone()
        };
        Operations::from(vec![base, failed])
    }

    fn encode(ops: &Operations) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut enc = Encoder::new(&mut buf).expect("header");
            enc.write_all(ops).expect("rows");
            enc.flush().expect("flush");
        }
        buf
    }

    #[test]
    fn round_trip() -> anyhow::Result<()> {
        let ops = sample_ops();
        let buf = encode(&ops);
        let got = Decoder::new(buf.as_slice())?.decode_all()?;
        assert_eq!(got, ops);
        Ok(())
    }

    #[test]
    fn quoted_error_field_round_trips() -> anyhow::Result<()> {
        let ops = sample_ops();
        let buf = encode(&ops);
        let text = String::from_utf8(buf.clone())?;
        assert!(text.contains("\"tab\there and \"\"quotes\"\"\nand a newline\""));

        let got = Decoder::new(buf.as_slice())?.decode_all()?;
        assert_eq!(got.as_slice()[1].err, ops.as_slice()[1].err);
        Ok(())
    }

    #[test]
    fn columns_are_located_by_name() -> anyhow::Result<()> {
        // Shuffled column order plus an unknown column.
        let input = "op\tmystery\tstart\tend\tthread\tclient_id\tn_objects\tbytes\tendpoint\tfile\terror\tfirst_byte\tcat\n\
            GET\tx\t2025-06-01T10:00:00Z\t2025-06-01T10:00:01Z\t3\tc\t1\t100\te\tf\t\t\t0\n";
        let got = Decoder::new(input.as_bytes())?.decode_all()?;
        assert_eq!(got.len(), 1);
        let op = &got.as_slice()[0];
        assert_eq!(op.op_type, "GET");
        assert_eq!(op.thread, 3);
        assert_eq!(op.size_bytes, 100);
        assert_eq!(op.first_byte, None);
        Ok(())
    }

    #[test]
    fn trailing_comment_block_is_tolerated() -> anyhow::Result<()> {
        let ops = sample_ops();
        let mut buf = encode(&ops);
        buf.extend_from_slice(b"# produced by gale\n# host: bench-host-1\n");

        let got = Decoder::new(buf.as_slice())?.decode_all()?;
        assert_eq!(got.len(), 2);
        Ok(())
    }

    #[test]
    fn missing_column_is_a_format_error() {
        let input = "op\tthread\nGET\t1\n";
        let err = Decoder::new(input.as_bytes()).err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::Format);
    }

    #[test]
    fn analyze_only_interns_identifiers() -> anyhow::Result<()> {
        let mut ops = sample_ops();
        ops.push(Operation {
            file: "data/obj-001".into(),
            ..ops.as_slice()[0].clone()
        });
        let buf = encode(&ops);
        let got = Decoder::analyze_only(buf.as_slice())?.decode_all()?;
        assert_eq!(got.as_slice()[0].client_id, "c0");
        assert_eq!(got.as_slice()[1].client_id, "c0");
        assert_eq!(got.as_slice()[0].file, "o0");
        // Rows 0 and 1 share an object name, row 2 has a fresh one.
        assert_eq!(got.as_slice()[1].file, "o0");
        assert_eq!(got.as_slice()[2].file, "o1");
        Ok(())
    }

    #[tokio::test]
    async fn spawn_decode_streams_records() -> anyhow::Result<()> {
        let ops = sample_ops();
        let buf = encode(&ops);
        let mut rx = spawn_decode(std::io::Cursor::new(buf), 16)?;
        let mut got = Operations::new();
        while let Some(record) = rx.recv().await {
            got.push(record?);
        }
        assert_eq!(got, ops);
        Ok(())
    }
}
