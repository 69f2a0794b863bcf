//! Byte-stream source: a plain or bzip2-compressed file, or stdin.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};

use bzip2::read::MultiBzDecoder;

use crate::error::SourceError;

const BZIP2_MAGIC: [u8; 3] = *b"BZh";

/// An uncompressed byte stream from a file or standard input, with
/// transparent bzip2 decoding when requested. Short reads are legal only
/// at end of stream.
pub struct ByteSource {
    reader: Box<dyn Read + Send>,
    compressed: bool,
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteSource")
            .field("compressed", &self.compressed)
            .finish()
    }
}

impl ByteSource {
    /// Open a named file, or standard input when the name is empty or
    /// `-`. With `bunzip`, the stream must start with the bzip2 magic
    /// and is decoded on the fly.
    pub fn open(name: &str, bunzip: bool) -> Result<Self, SourceError> {
        let raw: Box<dyn Read + Send> = if name.is_empty() || name == "-" {
            Box::new(io::stdin())
        } else {
            Box::new(File::open(name)?)
        };
        if bunzip {
            Self::decoded(raw)
        } else {
            Ok(Self {
                reader: raw,
                compressed: false,
            })
        }
    }

    fn decoded(mut raw: Box<dyn Read + Send>) -> Result<Self, SourceError> {
        let mut magic = [0u8; 3];
        raw.read_exact(&mut magic).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                SourceError::BadMagic
            } else {
                SourceError::Io(e)
            }
        })?;
        if magic != BZIP2_MAGIC {
            return Err(SourceError::BadMagic);
        }
        let rejoined = io::Cursor::new(magic).chain(raw);
        Ok(Self {
            reader: Box::new(MultiBzDecoder::new(rejoined)),
            compressed: true,
        })
    }

    /// Read into `buf`, returning the number of bytes read; 0 on clean
    /// end of stream.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        match self.reader.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if self.compressed => match e.kind() {
                io::ErrorKind::UnexpectedEof => Err(SourceError::Truncated),
                io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
                    Err(SourceError::Decoder(e.to_string()))
                }
                _ => Err(SourceError::Io(e)),
            },
            Err(e) => Err(SourceError::Io(e)),
        }
    }
}

impl Read for ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}
