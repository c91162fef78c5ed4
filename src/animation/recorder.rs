//! Recording live frames into immutable recorded streams.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Local};
use log::{debug, info, warn};

use super::pool::{BufferPool, TopUpWorker};
use crate::schema::{LayoutError, RecorderConfig, StreamLayout};
use crate::stream::codec;

/// Recording errors.
#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    #[error("Recorded stream holds {len} bytes, not a multiple of the {frame_size}-byte frame")]
    InvalidRecordedStream { len: usize, frame_size: usize },
    #[error("No recording in progress")]
    NotRecording,
    #[error("Frame at offset {offset} needs {frame_size} bytes, buffer holds {len}")]
    FrameOutOfBounds {
        offset: usize,
        frame_size: usize,
        len: usize,
    },
    #[error("Recording layout is invalid: {0}")]
    Layout(#[from] LayoutError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// An immutable take: raw encoded frames plus the layout they use.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStream {
    name: String,
    layout: StreamLayout,
    bytes: Vec<u8>,
}

impl RecordedStream {
    /// Wrap `bytes`, which must hold a whole number of frames.
    pub fn new(
        name: impl Into<String>,
        layout: StreamLayout,
        bytes: Vec<u8>,
    ) -> Result<Self, RecordingError> {
        if layout.frame_count_for(bytes.len()).is_none() {
            return Err(RecordingError::InvalidRecordedStream {
                len: bytes.len(),
                frame_size: layout.total_frame_size,
            });
        }
        Ok(Self {
            name: name.into(),
            layout,
            bytes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &StreamLayout {
        &self.layout
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn frame_size(&self) -> usize {
        self.layout.total_frame_size
    }

    pub fn frame_count(&self) -> usize {
        self.bytes.len() / self.layout.total_frame_size
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Frame `index`, occupying `[index * size, (index + 1) * size)`.
    pub fn frame(&self, index: usize) -> Option<&[u8]> {
        let size = self.frame_size();
        let start = index.checked_mul(size)?;
        self.bytes.get(start..start + size)
    }

    pub fn frames(&self) -> std::slice::ChunksExact<'_, u8> {
        self.bytes.chunks_exact(self.frame_size())
    }

    /// Seconds between the first and last frame, if frames carry a time.
    pub fn duration(&self) -> Option<f32> {
        let first = codec::read_frame_time(self.frame(0)?, &self.layout)?;
        let last = codec::read_frame_time(self.frame(self.frame_count() - 1)?, &self.layout)?;
        Some(last - first)
    }
}

/// Takes recorded in this session, oldest first.
#[derive(Debug, Default)]
pub struct RecordingLibrary {
    streams: Vec<Arc<RecordedStream>>,
    next_take: u32,
}

impl RecordingLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stream: RecordedStream) -> Arc<RecordedStream> {
        let stream = Arc::new(stream);
        self.streams.push(stream.clone());
        stream
    }

    pub fn get(&self, name: &str) -> Option<Arc<RecordedStream>> {
        self.streams.iter().find(|s| s.name() == name).cloned()
    }

    pub fn latest(&self) -> Option<Arc<RecordedStream>> {
        self.streams.last().cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<RecordedStream>> {
        self.streams.iter()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Hand out the next take number, starting at 1.
    pub fn next_take_number(&mut self) -> u32 {
        self.next_take += 1;
        self.next_take
    }

    /// Write every take into `dir` as `<name>.fcr`.
    pub fn save_all(&self, dir: &Path) -> Result<Vec<PathBuf>, RecordingError> {
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::with_capacity(self.streams.len());
        for stream in &self.streams {
            let path = dir.join(format!("{}.fcr", stream.name()));
            stream.save(&path)?;
            written.push(path);
        }
        Ok(written)
    }
}

struct Session {
    layout: StreamLayout,
    take: u32,
    started: DateTime<Local>,
    frames: Vec<Vec<u8>>,
}

/// Records frames handed over by the receive thread.
///
/// All methods take `&self`; the recorder is shared as an `Arc` between the
/// decode stage, which appends, and the application, which starts and
/// finishes takes.
///
/// ```ignore
/// let recorder = Arc::new(Recorder::new(config.recorder.clone()));
/// recorder.start_recording(&layout, 1)?;
/// recorder.add_data_to_recording(&frame, 0)?;
/// let take = recorder.finish_recording()?;
/// ```
pub struct Recorder {
    config: RecorderConfig,
    pool: Arc<BufferPool>,
    session: Mutex<Option<Session>>,
    recording: AtomicBool,
    library: Mutex<RecordingLibrary>,
    top_up: Mutex<Option<TopUpWorker>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Self {
        let pool = Arc::new(BufferPool::new(config.low_water_mark, config.batch_size));
        Self {
            config,
            pool,
            session: Mutex::new(None),
            recording: AtomicBool::new(false),
            library: Mutex::new(RecordingLibrary::new()),
            top_up: Mutex::new(None),
        }
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// Frames appended to the open take.
    pub fn frames_recorded(&self) -> usize {
        lock(&self.session).as_ref().map_or(0, |s| s.frames.len())
    }

    pub fn library(&self) -> MutexGuard<'_, RecordingLibrary> {
        lock(&self.library)
    }

    pub fn next_take_number(&self) -> u32 {
        self.library().next_take_number()
    }

    /// Open a new take. A take already in progress is finished first.
    pub fn start_recording(&self, layout: &StreamLayout, take_number: u32) -> Result<(), RecordingError> {
        if self.is_recording() {
            warn!("Recording already in progress, finishing it first");
            self.finish_recording()?;
        }

        if self.pool.configure(layout.total_frame_size) {
            info!("Recorder frame size now {} bytes", layout.total_frame_size);
        }
        self.pool.fill();

        let worker = TopUpWorker::spawn(self.pool.clone(), self.config.top_up_interval())?;
        *lock(&self.top_up) = Some(worker);

        *lock(&self.session) = Some(Session {
            layout: layout.clone(),
            take: take_number,
            started: Local::now(),
            frames: Vec::new(),
        });
        self.recording.store(true, Ordering::Release);
        info!("Recording take {}", take_number);
        Ok(())
    }

    /// Copy one frame starting at `offset` in `data` into the open take.
    pub fn add_data_to_recording(&self, data: &[u8], offset: usize) -> Result<(), RecordingError> {
        let mut session = lock(&self.session);
        let session = session.as_mut().ok_or(RecordingError::NotRecording)?;

        let size = session.layout.total_frame_size;
        let frame = offset
            .checked_add(size)
            .and_then(|end| data.get(offset..end))
            .ok_or(RecordingError::FrameOutOfBounds {
                offset,
                frame_size: size,
                len: data.len(),
            })?;

        let mut buffer = self.pool.acquire();
        buffer.resize(size, 0);
        buffer.copy_from_slice(frame);
        session.frames.push(buffer);
        Ok(())
    }

    /// Close the open take and add it to the library.
    ///
    /// Returns `Ok(None)` if nothing was recording or the take was empty;
    /// calling it again is harmless.
    pub fn finish_recording(&self) -> Result<Option<Arc<RecordedStream>>, RecordingError> {
        let session = lock(&self.session).take();
        self.recording.store(false, Ordering::Release);
        if let Some(mut worker) = lock(&self.top_up).take() {
            worker.stop();
        }

        let Some(session) = session else {
            return Ok(None);
        };
        if session.frames.is_empty() {
            info!("Take {} recorded no frames, discarding", session.take);
            return Ok(None);
        }

        let size = session.layout.total_frame_size;
        let mut bytes = Vec::with_capacity(session.frames.len() * size);
        for frame in session.frames {
            bytes.extend_from_slice(&frame);
            self.pool.release(frame);
        }

        let name = format!(
            "{}-take{:03}",
            session.started.format("%Y%m%d-%H%M%S"),
            session.take
        );
        let stream = RecordedStream::new(name, session.layout, bytes)?;
        info!(
            "Finished '{}': {} frames, {} pool misses",
            stream.name(),
            stream.frame_count(),
            self.pool.misses()
        );
        Ok(Some(self.library().push(stream)))
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Err(e) = self.finish_recording() {
            warn!("Could not finish recording on shutdown: {}", e);
        }
        debug!("Recorder dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FaceSample, LayoutParams};

    fn layout() -> StreamLayout {
        StreamLayout::new(&LayoutParams {
            blend_shape_count: 2,
            ..Default::default()
        })
        .unwrap()
    }

    fn frame(layout: &StreamLayout, number: i32) -> Vec<u8> {
        let mut sample = FaceSample::new(layout.blend_shape_count);
        sample.frame_number = number;
        sample.frame_time = number as f32 * 0.1;
        let mut buf = vec![0u8; layout.total_frame_size];
        codec::encode(&sample, layout, &mut buf).unwrap();
        buf
    }

    fn small_pool() -> RecorderConfig {
        RecorderConfig {
            low_water_mark: 2,
            batch_size: 1,
            top_up_interval_ms: 50,
            output_dir: None,
        }
    }

    #[test]
    fn test_stream_rejects_partial_frames() {
        let layout = layout();
        let err = RecordedStream::new("bad", layout.clone(), vec![0u8; layout.total_frame_size + 3])
            .unwrap_err();
        assert!(matches!(err, RecordingError::InvalidRecordedStream { .. }));
        let ok = RecordedStream::new("ok", layout.clone(), vec![0u8; layout.total_frame_size * 3]).unwrap();
        assert_eq!(ok.frame_count(), 3);
        assert!(ok.frame(3).is_none());
    }

    #[test]
    fn test_more_frames_than_pooled_buffers() {
        let layout = layout();
        let recorder = Recorder::new(small_pool());
        recorder.start_recording(&layout, 1).unwrap();

        for i in 0..20 {
            recorder.add_data_to_recording(&frame(&layout, i), 0).unwrap();
        }
        let stream = recorder.finish_recording().unwrap().unwrap();
        assert_eq!(stream.bytes().len(), 20 * layout.total_frame_size);
        assert_eq!(stream.frame_count(), 20);
        assert_eq!(codec::read_frame_number(stream.frame(19).unwrap(), &layout), Some(19));
        assert!(recorder.pool().misses() > 0);
        assert!((stream.duration().unwrap() - 1.9).abs() < 1e-5);
    }

    #[test]
    fn test_offset_and_bounds() {
        let layout = layout();
        let recorder = Recorder::new(small_pool());
        assert!(matches!(
            recorder.add_data_to_recording(&frame(&layout, 0), 0),
            Err(RecordingError::NotRecording)
        ));

        recorder.start_recording(&layout, 1).unwrap();
        let mut padded = vec![0xAAu8; 5];
        padded.extend(frame(&layout, 4));
        recorder.add_data_to_recording(&padded, 5).unwrap();
        assert!(matches!(
            recorder.add_data_to_recording(&padded, 6),
            Err(RecordingError::FrameOutOfBounds { .. })
        ));

        let stream = recorder.finish_recording().unwrap().unwrap();
        assert_eq!(stream.frame(0).unwrap(), &padded[5..]);
    }

    #[test]
    fn test_finish_is_idempotent_and_names_takes() {
        let layout = layout();
        let recorder = Recorder::new(small_pool());
        assert!(recorder.finish_recording().unwrap().is_none());

        let take = recorder.next_take_number();
        recorder.start_recording(&layout, take).unwrap();
        recorder.add_data_to_recording(&frame(&layout, 0), 0).unwrap();
        let stream = recorder.finish_recording().unwrap().unwrap();
        assert!(stream.name().ends_with("-take001"), "{}", stream.name());
        assert!(!recorder.is_recording());
        assert!(recorder.finish_recording().unwrap().is_none());

        let library = recorder.library();
        assert_eq!(library.len(), 1);
        assert!(library.get(stream.name()).is_some());
    }

    #[test]
    fn test_restart_finishes_previous_take() {
        let layout = layout();
        let recorder = Recorder::new(small_pool());
        recorder.start_recording(&layout, 1).unwrap();
        recorder.add_data_to_recording(&frame(&layout, 0), 0).unwrap();
        recorder.start_recording(&layout, 2).unwrap();
        assert!(recorder.is_recording());
        assert_eq!(recorder.frames_recorded(), 0);
        assert_eq!(recorder.library().len(), 1);
    }
}
