//! NETASCII conversion
//!
//! On the wire a line ends in `CR LF` and a bare carriage return is sent as
//! `CR NUL`. A `CR` at the end of a chunk cannot be classified until the
//! next byte is seen, so both directions carry it over between calls.

use std::io::{self, Read, Write};

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const NUL: u8 = 0;

/// The host's line terminator.
const HOST_CRLF: bool = cfg!(windows);
#[cfg(windows)]
const NEWLINE: &[u8] = b"\r\n";
#[cfg(not(windows))]
const NEWLINE: &[u8] = b"\n";

/// Host bytes to NETASCII
#[derive(Debug, Default)]
pub struct Encoder {
    pending_cr: bool,
}

impl Encoder {
    pub fn encode(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &byte in input {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == LF {
                    out.extend_from_slice(&[CR, LF]);
                    continue;
                }
                out.extend_from_slice(&[CR, NUL]);
            }
            match byte {
                CR if HOST_CRLF => self.pending_cr = true,
                CR => out.extend_from_slice(&[CR, NUL]),
                LF if !HOST_CRLF => out.extend_from_slice(&[CR, LF]),
                _ => out.push(byte),
            }
        }
    }

    pub fn finish(&mut self, out: &mut Vec<u8>) {
        if std::mem::take(&mut self.pending_cr) {
            out.extend_from_slice(&[CR, NUL]);
        }
    }
}

/// NETASCII to host bytes
#[derive(Debug, Default)]
pub struct Decoder {
    pending_cr: bool,
}

impl Decoder {
    pub fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &byte in input {
            if self.pending_cr {
                self.pending_cr = false;
                match byte {
                    LF => {
                        out.extend_from_slice(NEWLINE);
                        continue;
                    }
                    NUL => {
                        out.push(CR);
                        continue;
                    }
                    // Not valid NETASCII; keep the CR rather than lose data.
                    _ => out.push(CR),
                }
            }
            if byte == CR {
                self.pending_cr = true;
            } else {
                out.push(byte);
            }
        }
    }

    pub fn finish(&mut self, out: &mut Vec<u8>) {
        if std::mem::take(&mut self.pending_cr) {
            out.push(CR);
        }
    }
}

pub fn to_netascii(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut encoder = Encoder::default();
    encoder.encode(input, &mut out);
    encoder.finish(&mut out);
    out
}

pub fn from_netascii(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut decoder = Decoder::default();
    decoder.decode(input, &mut out);
    decoder.finish(&mut out);
    out
}

/// Presents a host file as a NETASCII byte stream.
#[derive(Debug)]
pub struct NetasciiReader<R> {
    inner: R,
    encoder: Encoder,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl<R: Read> NetasciiReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            encoder: Encoder::default(),
            buf: Vec::new(),
            pos: 0,
            eof: false,
        }
    }
}

impl<R: Read> Read for NetasciiReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        while self.pos == self.buf.len() && !self.eof {
            self.buf.clear();
            self.pos = 0;
            let mut chunk = vec![0u8; out.len().max(512)];
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                self.eof = true;
                self.encoder.finish(&mut self.buf);
            } else {
                self.encoder.encode(&chunk[..n], &mut self.buf);
            }
        }

        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Accepts a NETASCII byte stream and writes host bytes to a file.
///
/// Call [`NetasciiWriter::finish`] once the stream is complete so that a
/// trailing `CR` is written out.
#[derive(Debug)]
pub struct NetasciiWriter<W> {
    inner: W,
    decoder: Decoder,
    scratch: Vec<u8>,
}

impl<W: Write> NetasciiWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            decoder: Decoder::default(),
            scratch: Vec::new(),
        }
    }

    pub fn finish(&mut self) -> io::Result<()> {
        self.scratch.clear();
        self.decoder.finish(&mut self.scratch);
        self.inner.write_all(&self.scratch)?;
        self.inner.flush()
    }
}

impl<W: Write> Write for NetasciiWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.scratch.clear();
        self.decoder.decode(buf, &mut self.scratch);
        self.inner.write_all(&self.scratch)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
