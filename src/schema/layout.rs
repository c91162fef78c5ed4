//! Byte layout of a streamed face frame.
//!
//! A frame is laid out as:
//!
//! ```text
//!   sentinel        u8
//!   blend shapes    blend_shape_count * f32
//!   head pose       7 * f32 (x, y, z, qx, qy, qz, qw)
//!   camera pose     7 * f32
//!   frame number    i32   (optional)
//!   frame time      f32   (optional)
//!   tracking flag   u8    (optional)
//! ```
//!
//! All multi-byte fields are little-endian. There is no header on the wire,
//! so both ends must agree on the [`LayoutParams`] out of band.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use super::sample::POSE_FLOATS;

/// Size of the leading sentinel byte.
pub const SENTINEL_SIZE: usize = 1;
/// Size of one encoded pose (7 floats).
pub const POSE_FIELD_SIZE: usize = POSE_FLOATS * 4;
/// Size of the optional frame number field (i32).
pub const FRAME_NUMBER_SIZE: usize = 4;
/// Size of the optional frame time field (f32).
pub const FRAME_TIME_SIZE: usize = 4;
/// Size of the optional trailing tracking flag.
pub const ACTIVE_FLAG_SIZE: usize = 1;

/// Default sentinel written at offset 0 of every frame.
pub const DEFAULT_ERROR_CHECK_BYTE: u8 = 42;
/// Largest frame the transport accepts by default.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 65_535;
/// ARKit reports 52 blend shapes.
pub const DEFAULT_BLEND_SHAPE_COUNT: usize = 52;

fn default_error_check_byte() -> u8 {
    DEFAULT_ERROR_CHECK_BYTE
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

/// Parameters a [`StreamLayout`] is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutParams {
    /// Number of blend-shape weights per frame.
    pub blend_shape_count: usize,
    /// Carry an i32 frame counter.
    pub include_frame_number: bool,
    /// Carry an f32 timestamp (required for playback and baking).
    pub include_frame_time: bool,
    /// Carry a trailing tracking-active byte.
    pub include_active_flag: bool,
    /// Sentinel expected at offset 0.
    #[serde(default = "default_error_check_byte")]
    pub error_check_byte: u8,
    /// Largest frame the transport allows.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for LayoutParams {
    fn default() -> Self {
        Self {
            blend_shape_count: DEFAULT_BLEND_SHAPE_COUNT,
            include_frame_number: true,
            include_frame_time: true,
            include_active_flag: true,
            error_check_byte: DEFAULT_ERROR_CHECK_BYTE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Layout construction errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("Blend-shape count must be non-zero")]
    NoBlendShapes,
    #[error("Frame size {size} exceeds transport maximum {max}")]
    FrameTooLarge { size: usize, max: usize },
}

/// A contiguous field inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpan {
    pub offset: usize,
    pub size: usize,
}

impl FieldSpan {
    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.size
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Computed offsets and sizes of one frame. Immutable; rebuild it when any
/// parameter changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLayout {
    pub error_check_byte: u8,
    pub blend_shape_count: usize,
    pub blend_shape_field_size: usize,
    pub pose_field_size: usize,
    pub blend_shape_offset: usize,
    pub head_pose_offset: usize,
    pub camera_pose_offset: usize,
    pub frame_number: Option<FieldSpan>,
    pub frame_time: Option<FieldSpan>,
    pub active_flag_offset: Option<usize>,
    pub total_frame_size: usize,
}

impl StreamLayout {
    /// Compute the layout for `params`, rejecting configurations the
    /// transport cannot carry.
    pub fn new(params: &LayoutParams) -> Result<Self, LayoutError> {
        if params.blend_shape_count == 0 {
            return Err(LayoutError::NoBlendShapes);
        }

        // Sizes past usize::MAX are reported as usize::MAX.
        let oversized = || LayoutError::FrameTooLarge {
            size: usize::MAX,
            max: params.max_frame_size,
        };
        let optional_size = [
            (params.include_frame_number, FRAME_NUMBER_SIZE),
            (params.include_frame_time, FRAME_TIME_SIZE),
            (params.include_active_flag, ACTIVE_FLAG_SIZE),
        ]
        .iter()
        .filter(|(on, _)| *on)
        .map(|(_, size)| size)
        .sum::<usize>();
        let blend_shape_field_size = params
            .blend_shape_count
            .checked_mul(4)
            .ok_or_else(oversized)?;
        blend_shape_field_size
            .checked_add(SENTINEL_SIZE + 2 * POSE_FIELD_SIZE + optional_size)
            .ok_or_else(oversized)?;

        // The total fits in usize from here on.
        let blend_shape_offset = SENTINEL_SIZE;
        let head_pose_offset = blend_shape_offset + blend_shape_field_size;
        let camera_pose_offset = head_pose_offset + POSE_FIELD_SIZE;
        let mut cursor = camera_pose_offset + POSE_FIELD_SIZE;

        let frame_number = params.include_frame_number.then(|| {
            let span = FieldSpan {
                offset: cursor,
                size: FRAME_NUMBER_SIZE,
            };
            cursor += FRAME_NUMBER_SIZE;
            span
        });
        let frame_time = params.include_frame_time.then(|| {
            let span = FieldSpan {
                offset: cursor,
                size: FRAME_TIME_SIZE,
            };
            cursor += FRAME_TIME_SIZE;
            span
        });
        let active_flag_offset = params.include_active_flag.then(|| {
            let offset = cursor;
            cursor += ACTIVE_FLAG_SIZE;
            offset
        });

        let total_frame_size = cursor;
        if total_frame_size > params.max_frame_size {
            return Err(LayoutError::FrameTooLarge {
                size: total_frame_size,
                max: params.max_frame_size,
            });
        }

        Ok(Self {
            error_check_byte: params.error_check_byte,
            blend_shape_count: params.blend_shape_count,
            blend_shape_field_size,
            pose_field_size: POSE_FIELD_SIZE,
            blend_shape_offset,
            head_pose_offset,
            camera_pose_offset,
            frame_number,
            frame_time,
            active_flag_offset,
            total_frame_size,
        })
    }

    /// Parameters that reproduce this layout (with the default transport maximum).
    pub fn params(&self) -> LayoutParams {
        LayoutParams {
            blend_shape_count: self.blend_shape_count,
            include_frame_number: self.frame_number.is_some(),
            include_frame_time: self.frame_time.is_some(),
            include_active_flag: self.active_flag_offset.is_some(),
            error_check_byte: self.error_check_byte,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE.max(self.total_frame_size),
        }
    }

    #[inline]
    pub fn has_frame_number(&self) -> bool {
        self.frame_number.is_some()
    }

    #[inline]
    pub fn has_frame_time(&self) -> bool {
        self.frame_time.is_some()
    }

    #[inline]
    pub fn has_active_flag(&self) -> bool {
        self.active_flag_offset.is_some()
    }

    /// Every present field in wire order, sentinel first.
    pub fn fields(&self) -> Vec<(&'static str, FieldSpan)> {
        let mut fields = vec![
            (
                "sentinel",
                FieldSpan {
                    offset: 0,
                    size: SENTINEL_SIZE,
                },
            ),
            (
                "blend_shapes",
                FieldSpan {
                    offset: self.blend_shape_offset,
                    size: self.blend_shape_field_size,
                },
            ),
            (
                "head_pose",
                FieldSpan {
                    offset: self.head_pose_offset,
                    size: self.pose_field_size,
                },
            ),
            (
                "camera_pose",
                FieldSpan {
                    offset: self.camera_pose_offset,
                    size: self.pose_field_size,
                },
            ),
        ];
        if let Some(span) = self.frame_number {
            fields.push(("frame_number", span));
        }
        if let Some(span) = self.frame_time {
            fields.push(("frame_time", span));
        }
        if let Some(offset) = self.active_flag_offset {
            fields.push((
                "active_flag",
                FieldSpan {
                    offset,
                    size: ACTIVE_FLAG_SIZE,
                },
            ));
        }
        fields
    }

    /// Number of whole frames in `len` bytes, or `None` if `len` is not a
    /// multiple of the frame size.
    pub fn frame_count_for(&self, len: usize) -> Option<usize> {
        (len % self.total_frame_size == 0).then(|| len / self.total_frame_size)
    }
}

/// Layout shared between the foreground and the socket loops.
///
/// Every replacement bumps a generation counter so loops can notice the
/// change cheaply and re-derive their buffers before the next I/O.
#[derive(Debug)]
pub struct SharedLayout {
    current: RwLock<Arc<StreamLayout>>,
    generation: AtomicU64,
}

impl SharedLayout {
    pub fn new(layout: StreamLayout) -> Arc<Self> {
        Arc::new(Self {
            current: RwLock::new(Arc::new(layout)),
            generation: AtomicU64::new(0),
        })
    }

    /// Current generation; changes whenever the layout is replaced.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn get(&self) -> Arc<StreamLayout> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install a new layout.
    pub fn replace(&self, layout: StreamLayout) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Arc::new(layout);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Rebuild from `params` and install it.
    pub fn reconfigure(&self, params: &LayoutParams) -> Result<Arc<StreamLayout>, LayoutError> {
        let layout = StreamLayout::new(params)?;
        self.replace(layout);
        Ok(self.get())
    }
}

/// A loop-local view of a [`SharedLayout`].
#[derive(Debug, Clone)]
pub struct LayoutCursor {
    shared: Arc<SharedLayout>,
    generation: u64,
    layout: Arc<StreamLayout>,
}

impl LayoutCursor {
    pub fn new(shared: Arc<SharedLayout>) -> Self {
        let generation = shared.generation();
        let layout = shared.get();
        Self {
            shared,
            generation,
            layout,
        }
    }

    #[inline]
    pub fn layout(&self) -> &StreamLayout {
        &self.layout
    }

    /// Pick up a replaced layout. Returns true if it changed.
    pub fn refresh(&mut self) -> bool {
        let generation = self.shared.generation();
        if generation == self.generation {
            return false;
        }
        self.generation = generation;
        self.layout = self.shared.get();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn params(count: usize, number: bool, time: bool, active: bool) -> LayoutParams {
        LayoutParams {
            blend_shape_count: count,
            include_frame_number: number,
            include_frame_time: time,
            include_active_flag: active,
            ..Default::default()
        }
    }

    #[test]
    fn test_full_layout_offsets() {
        let layout = StreamLayout::new(&params(52, true, true, true)).unwrap();
        assert_eq!(layout.blend_shape_offset, 1);
        assert_eq!(layout.head_pose_offset, 1 + 52 * 4);
        assert_eq!(layout.camera_pose_offset, 1 + 52 * 4 + 28);
        assert_eq!(layout.frame_number.unwrap().offset, 1 + 52 * 4 + 56);
        assert_eq!(layout.frame_time.unwrap().offset, 1 + 52 * 4 + 60);
        assert_eq!(layout.active_flag_offset, Some(1 + 52 * 4 + 64));
        assert_eq!(layout.total_frame_size, 1 + 52 * 4 + 65);
    }

    #[test]
    fn test_absent_fields_take_no_space() {
        let layout = StreamLayout::new(&params(4, false, true, false)).unwrap();
        assert!(layout.frame_number.is_none());
        assert!(layout.active_flag_offset.is_none());
        assert_eq!(layout.frame_time.unwrap().offset, 1 + 16 + 56);
        assert_eq!(layout.total_frame_size, 1 + 16 + 56 + 4);
    }

    #[test]
    fn test_rejects_zero_blend_shapes() {
        assert_eq!(
            StreamLayout::new(&params(0, true, true, true)),
            Err(LayoutError::NoBlendShapes)
        );
    }

    #[test]
    fn test_rejects_oversized_frame() {
        let mut p = params(100, true, true, true);
        p.max_frame_size = 128;
        assert!(matches!(
            StreamLayout::new(&p),
            Err(LayoutError::FrameTooLarge { max: 128, .. })
        ));
    }

    #[test]
    fn test_rejects_blend_shape_count_that_overflows() {
        for count in [usize::MAX / 4 + 1, usize::MAX / 4, usize::MAX] {
            let result = StreamLayout::new(&params(count, true, true, true));
            assert!(
                matches!(result, Err(LayoutError::FrameTooLarge { .. })),
                "count {} gave {:?}",
                count,
                result
            );
        }
    }

    #[test]
    fn test_params_roundtrip() {
        let p = params(10, true, false, true);
        let layout = StreamLayout::new(&p).unwrap();
        assert_eq!(layout.params(), p);
    }

    #[test]
    fn test_frame_count_for() {
        let layout = StreamLayout::new(&params(2, false, false, false)).unwrap();
        let size = layout.total_frame_size;
        assert_eq!(layout.frame_count_for(size * 3), Some(3));
        assert_eq!(layout.frame_count_for(size * 3 + 1), None);
        assert_eq!(layout.frame_count_for(0), Some(0));
    }

    #[test]
    fn test_cursor_sees_replacement() {
        let shared = SharedLayout::new(StreamLayout::new(&params(2, true, true, true)).unwrap());
        let mut cursor = LayoutCursor::new(shared.clone());
        assert!(!cursor.refresh());

        shared.reconfigure(&params(8, true, true, true)).unwrap();
        assert!(cursor.refresh());
        assert_eq!(cursor.layout().blend_shape_count, 8);
        assert!(!cursor.refresh());
    }

    proptest! {
        #[test]
        fn prop_offsets_increase_and_sum(
            count in 1usize..512,
            number: bool,
            time: bool,
            active: bool
        ) {
            let layout = StreamLayout::new(&params(count, number, time, active)).unwrap();
            let fields = layout.fields();

            let mut expected_offset = 0;
            for (_, span) in &fields {
                prop_assert_eq!(span.offset, expected_offset);
                prop_assert!(span.size > 0);
                expected_offset = span.end();
            }
            prop_assert_eq!(expected_offset, layout.total_frame_size);

            let sum: usize = fields.iter().map(|(_, span)| span.size).sum();
            prop_assert_eq!(sum, layout.total_frame_size);
        }
    }
}
