//! Live streaming: the wire codec, the socket loops on both ends and the
//! decode stage that feeds renderers.

mod assembler;
mod capture;
pub mod codec;
mod events;
mod live;
mod receiver;
mod source;
mod stage;

pub use assembler::{Fill, FrameAssembler};
pub use capture::{CaptureLoop, CaptureState, SampleSlot};
pub use codec::CodecError;
pub use events::{LinkEvent, LinkStatus};
pub use live::{Feed, LiveSnapshot, LiveState, Publish};
pub use receiver::ReceiveLoop;
pub use source::{Advance, FrameSource, LiveSource};
pub use stage::{DecodeStage, PumpOutcome, StageStats};
