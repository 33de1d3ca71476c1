//! Intel HEX images over line-oriented streams
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use ihex::{ReaderError, Record};

/// Data bytes per emitted record
pub const LINE_LENGTH: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum HexError {
    #[error("file error: {0}")]
    File(#[from] io::Error),
    #[error("record at 0x{address:05X} with {len} byte(s) does not fit into {capacity} byte(s)")]
    Size {
        address: u32,
        len: usize,
        capacity: usize,
    },
    #[error("format error: {0}")]
    Format(String),
    #[error("checksum mismatch on line {line}")]
    Checksum { line: usize },
}

/// Line source/sink an image is decoded from or encoded into
pub trait HexStream {
    fn end_of_input(&mut self) -> io::Result<bool>;
    /// Next line without its terminator, `None` at end of input
    fn read_line(&mut self) -> io::Result<Option<String>>;
    fn write(&mut self, data: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn trim_eol(mut line: String) -> String {
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    line
}

/// File-backed stream, opened either for reading or for writing
pub struct FileStream {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    writer: Option<BufWriter<File>>,
}

impl FileStream {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        log::debug!("Opened {} for reading", path.display());
        Ok(FileStream {
            path,
            reader: Some(BufReader::new(file)),
            writer: None,
        })
    }

    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        log::debug!("Opened {} for writing", path.display());
        Ok(FileStream {
            path,
            reader: None,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HexStream for FileStream {
    fn end_of_input(&mut self) -> io::Result<bool> {
        match self.reader.as_mut() {
            Some(reader) => Ok(reader.fill_buf()?.is_empty()),
            None => Ok(true),
        }
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "stream is write-only"))?;
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(trim_eol(line)))
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "stream is read-only"))?
            .write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

/// In-memory stream. Reads consume the text from the front, writes append.
#[derive(Debug, Default, Clone)]
pub struct BufferStream {
    text: String,
    pos: usize,
}

impl BufferStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_text<S: Into<String>>(text: S) -> Self {
        BufferStream {
            text: text.into(),
            pos: 0,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl HexStream for BufferStream {
    fn end_of_input(&mut self) -> io::Result<bool> {
        Ok(self.pos >= self.text.len())
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        if self.pos >= self.text.len() {
            return Ok(None);
        }
        let rest = &self.text[self.pos..];
        let end = rest.find('\n').map(|i| i + 1).unwrap_or(rest.len());
        let line = rest[..end].to_string();
        self.pos += end;
        Ok(Some(trim_eol(line)))
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let text = std::str::from_utf8(data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.text.push_str(text);
        Ok(())
    }
}

/// Decode an Intel HEX stream into `buf`, offsets relative to its start.
/// Returns the touched range `[min, max)`, or `None` when no data record
/// carried any byte.
pub fn read_ihex_stream<S: HexStream + ?Sized>(
    stream: &mut S,
    buf: &mut [u8],
) -> Result<Option<(usize, usize)>, HexError> {
    let mut base = 0u32;
    let mut touched: Option<(usize, usize)> = None;
    let mut line_no = 0;

    while !stream.end_of_input()? {
        let Some(line) = stream.read_line()? else {
            break;
        };
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record = Record::from_record_string(line).map_err(|e| match e {
            ReaderError::ChecksumMismatch(..) => HexError::Checksum { line: line_no },
            e => HexError::Format(format!("line {}: {:?}", line_no, e)),
        })?;

        match record {
            Record::Data { offset, value } => {
                if value.is_empty() {
                    continue;
                }
                let address = base + u32::from(offset);
                let start = address as usize;
                let end = start + value.len();
                if end > buf.len() {
                    return Err(HexError::Size {
                        address,
                        len: value.len(),
                        capacity: buf.len(),
                    });
                }
                buf[start..end].copy_from_slice(&value);
                touched = Some(match touched {
                    Some((lo, hi)) => (lo.min(start), hi.max(end)),
                    None => (start, end),
                });
            }
            Record::EndOfFile => return Ok(touched),
            Record::ExtendedSegmentAddress(segment) => base = u32::from(segment) << 4,
            Record::ExtendedLinearAddress(upper) => base = u32::from(upper) << 16,
            Record::StartSegmentAddress { .. } | Record::StartLinearAddress(_) => (),
        }
    }

    Err(HexError::Format("missing end-of-file record".to_string()))
}

/// Encode `data` as Intel HEX, offsets relative to its start
pub fn write_ihex_stream<S: HexStream + ?Sized>(stream: &mut S, data: &[u8]) -> Result<(), HexError> {
    let mut upper = 0u16;
    for (i, chunk) in data.chunks(LINE_LENGTH).enumerate() {
        let offset = i * LINE_LENGTH;
        let segment = (offset >> 16) as u16;
        if segment != upper {
            upper = segment;
            write_record(stream, &Record::ExtendedLinearAddress(upper))?;
        }
        write_record(
            stream,
            &Record::Data {
                offset: (offset & 0xFFFF) as u16,
                value: chunk.to_vec(),
            },
        )?;
    }
    write_record(stream, &Record::EndOfFile)?;
    stream.flush()?;
    Ok(())
}

fn write_record<S: HexStream + ?Sized>(stream: &mut S, record: &Record) -> Result<(), HexError> {
    let mut line = record
        .to_record_string()
        .map_err(|e| HexError::Format(format!("{:?}", e)))?;
    line.push('\n');
    stream.write(line.as_bytes())?;
    Ok(())
}
