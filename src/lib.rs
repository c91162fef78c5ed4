//! facelink - Real-time facial motion-capture streaming.
//!
//! A capture side encodes face tracking samples (blend-shape weights, head
//! and camera pose) into fixed-size binary frames and streams them over TCP.
//! A receive side decodes them into shared live state for renderers, can
//! record takes, replay them through the same decode path, and bake them
//! into fixed-rate keyframe curves.
//!
//! # Architecture
//!
//! - `schema`: Configuration, sample types and the wire layout
//! - `stream`: Frame codec, capture and receive loops, live state
//! - `animation`: Recorder, recording files, playback engine, baker
//! - `app`: The explicit application loop
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Instant;
//! use facelink::{App, FacelinkConfig};
//!
//! let mut app = App::new(FacelinkConfig::default()).unwrap();
//! let addr = app.listen().unwrap();
//! println!("Listening on {}", addr);
//!
//! app.add_renderer(Box::new(|snap: &facelink::stream::LiveSnapshot| {
//!     println!("{:?}", snap.blend_shapes.first());
//! }));
//! loop {
//!     app.tick(Instant::now());
//!     std::thread::sleep(std::time::Duration::from_millis(16));
//! }
//! ```

pub mod animation;
pub mod app;
pub mod schema;
pub mod stream;

// Re-export commonly used types
pub use animation::{AnimationClip, PlaybackEngine, RecordedStream, Recorder};
pub use app::{App, Mode, Renderer};
pub use schema::{FaceSample, FacelinkConfig, Pose, StreamLayout};
pub use stream::{CaptureLoop, LiveState, ReceiveLoop};
