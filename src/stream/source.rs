//! Frame sources feeding the decode stage.
//!
//! Live sockets and recorded playback both hand out whole encoded frames
//! through the same `advance()` contract, so the decode stage treats them
//! identically.

use std::io::Read;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, warn};

use super::assembler::{Fill, FrameAssembler};
use crate::animation::PlaybackEngine;
use crate::schema::{LayoutCursor, SharedLayout, StreamLayout};

/// What a source produced on one `advance()` call.
#[derive(Debug)]
pub enum Advance<'a> {
    /// A whole encoded frame and the layout it was encoded with.
    Frame {
        bytes: &'a [u8],
        layout: &'a StreamLayout,
    },
    /// Nothing due yet.
    Pending,
    /// The source is exhausted or its connection closed.
    Ended,
}

/// Frames read from a connected byte stream.
pub struct LiveSource {
    reader: Box<dyn Read + Send>,
    assembler: FrameAssembler,
    layout: LayoutCursor,
}

impl LiveSource {
    pub fn new(reader: Box<dyn Read + Send>, layout: Arc<SharedLayout>) -> Self {
        let layout = LayoutCursor::new(layout);
        let assembler = FrameAssembler::new(layout.layout().total_frame_size);
        Self {
            reader,
            assembler,
            layout,
        }
    }

    /// Read until a whole frame arrives, the read times out, or the peer
    /// closes. Picks up layout changes before reading.
    pub fn advance(&mut self) -> Advance<'_> {
        if self.layout.refresh() {
            let size = self.layout.layout().total_frame_size;
            debug!(
                "Layout changed, dropping {} pending bytes, frame size now {}",
                self.assembler.pending(),
                size
            );
            self.assembler.resize(size);
        }

        match self.assembler.fill_from(self.reader.as_mut()) {
            Ok(Fill::Complete) => Advance::Frame {
                bytes: self.assembler.frame(),
                layout: self.layout.layout(),
            },
            Ok(Fill::Partial) => Advance::Pending,
            Ok(Fill::Closed) => Advance::Ended,
            Err(e) => {
                warn!("Read failed, closing live source: {}", e);
                Advance::Ended
            }
        }
    }
}

/// Either kind of source, borrowed for one pump.
pub enum FrameSource<'a> {
    Live(&'a mut LiveSource),
    Playback(&'a mut PlaybackEngine),
}

impl FrameSource<'_> {
    pub fn advance(&mut self, now: Instant) -> Advance<'_> {
        match self {
            FrameSource::Live(source) => source.advance(),
            FrameSource::Playback(engine) => engine.advance(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FaceSample, LayoutParams};
    use crate::stream::codec;
    use std::io::Cursor;

    fn params(count: usize) -> LayoutParams {
        LayoutParams {
            blend_shape_count: count,
            ..Default::default()
        }
    }

    fn encoded(layout: &StreamLayout, frames: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; layout.total_frame_size * frames];
        for (i, chunk) in bytes.chunks_exact_mut(layout.total_frame_size).enumerate() {
            let mut sample = FaceSample::new(layout.blend_shape_count);
            sample.frame_number = i as i32;
            codec::encode(&sample, layout, chunk).unwrap();
        }
        bytes
    }

    #[test]
    fn test_live_source_yields_frames_then_ends() {
        let layout = StreamLayout::new(&params(3)).unwrap();
        let shared = SharedLayout::new(layout.clone());
        let mut source = LiveSource::new(Box::new(Cursor::new(encoded(&layout, 2))), shared);

        for expected in 0..2 {
            match source.advance() {
                Advance::Frame { bytes, layout } => {
                    assert_eq!(codec::read_frame_number(bytes, layout), Some(expected));
                }
                other => panic!("expected frame, got {:?}", other),
            }
        }
        assert!(matches!(source.advance(), Advance::Ended));
    }

    #[test]
    fn test_live_source_follows_layout_change() {
        let small = StreamLayout::new(&params(2)).unwrap();
        let large = StreamLayout::new(&params(5)).unwrap();
        let shared = SharedLayout::new(small);
        let mut source =
            LiveSource::new(Box::new(Cursor::new(encoded(&large, 1))), shared.clone());

        shared.replace(large.clone());
        match source.advance() {
            Advance::Frame { bytes, layout } => {
                assert_eq!(bytes.len(), large.total_frame_size);
                assert_eq!(layout.blend_shape_count, 5);
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }
}
