//! Reassembly of fixed-size frames from a byte stream.
//!
//! Stream transports carry no message boundaries, so a read may return part
//! of a frame, or end exactly between two. The assembler accumulates bytes
//! until a whole frame is present and never reads past the frame boundary.

use std::io::{self, Read};

/// Result of one [`FrameAssembler::fill_from`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// A whole frame is available via [`FrameAssembler::frame`].
    Complete,
    /// The read timed out or would block; some bytes may be buffered.
    Partial,
    /// The peer closed the stream.
    Closed,
}

#[derive(Debug)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    filled: usize,
}

impl FrameAssembler {
    pub fn new(frame_size: usize) -> Self {
        Self {
            buffer: vec![0u8; frame_size],
            filled: 0,
        }
    }

    #[inline]
    pub fn frame_size(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes buffered towards the next frame.
    #[inline]
    pub fn pending(&self) -> usize {
        if self.is_complete() { 0 } else { self.filled }
    }

    #[inline]
    fn is_complete(&self) -> bool {
        self.filled == self.buffer.len()
    }

    /// Switch to a new frame size, dropping any partial frame.
    pub fn resize(&mut self, frame_size: usize) {
        self.buffer.resize(frame_size, 0);
        self.filled = 0;
    }

    /// The last completed frame.
    pub fn frame(&self) -> &[u8] {
        &self.buffer
    }

    /// Read until a whole frame is buffered, the reader times out, or the
    /// stream closes. A previously completed frame is discarded first.
    pub fn fill_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<Fill> {
        if self.is_complete() {
            self.filled = 0;
        }
        while self.filled < self.buffer.len() {
            match reader.read(&mut self.buffer[self.filled..]) {
                Ok(0) => return Ok(Fill::Closed),
                Ok(n) => self.filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Ok(Fill::Partial);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Fill::Complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Reader that hands out data in fixed chunks, then times out, then closes.
    struct ChunkedReader {
        chunks: VecDeque<Vec<u8>>,
        timeouts: usize,
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some(chunk) = self.chunks.front_mut() {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                chunk.drain(..n);
                if chunk.is_empty() {
                    self.chunks.pop_front();
                }
                return Ok(n);
            }
            if self.timeouts > 0 {
                self.timeouts -= 1;
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "no data"));
            }
            Ok(0)
        }
    }

    #[test]
    fn test_accumulates_short_reads() {
        let data: Vec<u8> = (0..10).collect();
        let mut reader = ChunkedReader {
            chunks: data.chunks(3).map(|c| c.to_vec()).collect(),
            timeouts: 0,
        };
        let mut asm = FrameAssembler::new(5);

        assert_eq!(asm.fill_from(&mut reader).unwrap(), Fill::Complete);
        assert_eq!(asm.frame(), &[0, 1, 2, 3, 4]);
        assert_eq!(asm.fill_from(&mut reader).unwrap(), Fill::Complete);
        assert_eq!(asm.frame(), &[5, 6, 7, 8, 9]);
        assert_eq!(asm.fill_from(&mut reader).unwrap(), Fill::Closed);
    }

    #[test]
    fn test_partial_survives_timeout() {
        let mut reader = ChunkedReader {
            chunks: VecDeque::from(vec![vec![1, 2]]),
            timeouts: 1,
        };
        let mut asm = FrameAssembler::new(4);
        assert_eq!(asm.fill_from(&mut reader).unwrap(), Fill::Partial);
        assert_eq!(asm.pending(), 2);

        reader.chunks.push_back(vec![3, 4, 5]);
        assert_eq!(asm.fill_from(&mut reader).unwrap(), Fill::Complete);
        assert_eq!(asm.frame(), &[1, 2, 3, 4]);
        // the fifth byte stays in the reader
        assert_eq!(reader.chunks.front().map(Vec::as_slice), Some(&[5u8][..]));
    }

    #[test]
    fn test_resize_drops_partial() {
        let mut reader = ChunkedReader {
            chunks: VecDeque::from(vec![vec![9, 9]]),
            timeouts: 1,
        };
        let mut asm = FrameAssembler::new(4);
        assert_eq!(asm.fill_from(&mut reader).unwrap(), Fill::Partial);
        asm.resize(6);
        assert_eq!(asm.frame_size(), 6);
        assert_eq!(asm.pending(), 0);
    }
}
