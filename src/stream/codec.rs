//! Frame encoding and decoding.
//!
//! Fields are packed one by one as little-endian values at the offsets the
//! [`StreamLayout`] computes; nothing is reinterpreted in place.

use crate::schema::{FaceSample, POSE_FLOATS, Pose, StreamLayout};

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The sentinel byte did not match. The frame is dropped; callers keep
    /// their previous state.
    #[error("Malformed frame: expected sentinel {expected:#04x}, found {found:#04x}")]
    MalformedFrame { expected: u8, found: u8 },
    #[error("Frame buffer holds {len} bytes, layout needs {needed}")]
    FrameTooShort { len: usize, needed: usize },
    #[error("Sample carries {actual} blend shapes, layout expects {expected}")]
    BlendShapeCountMismatch { expected: usize, actual: usize },
}

#[inline]
fn put_f32(out: &mut [u8], at: usize, v: f32) {
    out[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

#[inline]
fn get_f32(buf: &[u8], at: usize) -> f32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    f32::from_le_bytes(raw)
}

#[inline]
fn get_i32(buf: &[u8], at: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    i32::from_le_bytes(raw)
}

fn put_pose(out: &mut [u8], at: usize, pose: &Pose) {
    for (i, v) in pose.to_floats().into_iter().enumerate() {
        put_f32(out, at + i * 4, v);
    }
}

fn get_pose(buf: &[u8], at: usize) -> Pose {
    let mut floats = [0.0f32; POSE_FLOATS];
    for (i, v) in floats.iter_mut().enumerate() {
        *v = get_f32(buf, at + i * 4);
    }
    Pose::from_floats(floats)
}

/// Encode `sample` into the first `layout.total_frame_size` bytes of `out`.
pub fn encode(sample: &FaceSample, layout: &StreamLayout, out: &mut [u8]) -> Result<(), CodecError> {
    if out.len() < layout.total_frame_size {
        return Err(CodecError::FrameTooShort {
            len: out.len(),
            needed: layout.total_frame_size,
        });
    }
    if sample.blend_shapes.len() != layout.blend_shape_count {
        return Err(CodecError::BlendShapeCountMismatch {
            expected: layout.blend_shape_count,
            actual: sample.blend_shapes.len(),
        });
    }

    out[0] = layout.error_check_byte;
    for (i, &w) in sample.blend_shapes.iter().enumerate() {
        put_f32(out, layout.blend_shape_offset + i * 4, w);
    }
    put_pose(out, layout.head_pose_offset, &sample.head);
    put_pose(out, layout.camera_pose_offset, &sample.camera);
    if let Some(span) = layout.frame_number {
        out[span.range()].copy_from_slice(&sample.frame_number.to_le_bytes());
    }
    if let Some(span) = layout.frame_time {
        put_f32(out, span.offset, sample.frame_time);
    }
    if let Some(offset) = layout.active_flag_offset {
        out[offset] = u8::from(sample.tracking_active);
    }
    Ok(())
}

/// Check that `input` is a whole frame with a valid sentinel.
pub fn validate(input: &[u8], layout: &StreamLayout) -> Result<(), CodecError> {
    if input.len() < layout.total_frame_size {
        return Err(CodecError::FrameTooShort {
            len: input.len(),
            needed: layout.total_frame_size,
        });
    }
    if input[0] != layout.error_check_byte {
        return Err(CodecError::MalformedFrame {
            expected: layout.error_check_byte,
            found: input[0],
        });
    }
    Ok(())
}

/// Decode a frame into `out`.
///
/// The frame is validated before anything is written, so on error `out` is
/// unchanged. Fields the layout does not carry keep their previous values.
pub fn decode(input: &[u8], layout: &StreamLayout, out: &mut FaceSample) -> Result<(), CodecError> {
    validate(input, layout)?;

    out.blend_shapes.resize(layout.blend_shape_count, 0.0);
    for (i, w) in out.blend_shapes.iter_mut().enumerate() {
        *w = get_f32(input, layout.blend_shape_offset + i * 4);
    }
    out.head = get_pose(input, layout.head_pose_offset);
    out.camera = get_pose(input, layout.camera_pose_offset);
    if let Some(span) = layout.frame_number {
        out.frame_number = get_i32(input, span.offset);
    }
    if let Some(span) = layout.frame_time {
        out.frame_time = get_f32(input, span.offset);
    }
    if let Some(offset) = layout.active_flag_offset {
        out.tracking_active = input[offset] != 0;
    }
    Ok(())
}

/// Read just the frame time of an encoded frame.
pub fn read_frame_time(input: &[u8], layout: &StreamLayout) -> Option<f32> {
    let span = layout.frame_time?;
    (input.len() >= span.end()).then(|| get_f32(input, span.offset))
}

/// Read just the frame number of an encoded frame.
pub fn read_frame_number(input: &[u8], layout: &StreamLayout) -> Option<i32> {
    let span = layout.frame_number?;
    (input.len() >= span.end()).then(|| get_i32(input, span.offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::LayoutParams;
    use proptest::prelude::*;

    fn layout(count: usize, number: bool, time: bool, active: bool) -> StreamLayout {
        StreamLayout::new(&LayoutParams {
            blend_shape_count: count,
            include_frame_number: number,
            include_frame_time: time,
            include_active_flag: active,
            ..Default::default()
        })
        .unwrap()
    }

    fn sample(count: usize) -> FaceSample {
        FaceSample {
            blend_shapes: (0..count).map(|i| i as f32 / count as f32).collect(),
            head: Pose::new([0.1, -0.2, 0.3], [0.0, 0.70710677, 0.0, 0.70710677]),
            camera: Pose::new([1.0, 2.0, 3.0], [0.0, 0.0, 0.0, 1.0]),
            frame_number: 1234,
            frame_time: 12.5,
            tracking_active: true,
        }
    }

    #[test]
    fn test_wire_bytes() {
        let layout = layout(1, true, true, true);
        let mut s = sample(1);
        s.blend_shapes[0] = 1.0;
        let mut buf = vec![0u8; layout.total_frame_size];
        encode(&s, &layout, &mut buf).unwrap();

        assert_eq!(buf[0], 42);
        assert_eq!(&buf[1..5], &1.0f32.to_le_bytes());
        assert_eq!(&buf[5..9], &0.1f32.to_le_bytes());
        assert_eq!(&buf[33..37], &1.0f32.to_le_bytes());
        assert_eq!(&buf[61..65], &1234i32.to_le_bytes());
        assert_eq!(&buf[65..69], &12.5f32.to_le_bytes());
        assert_eq!(buf[69], 1);
        assert_eq!(buf.len(), 70);
    }

    #[test]
    fn test_bad_sentinel_leaves_target_unchanged() {
        let layout = layout(4, true, true, true);
        let mut buf = vec![0u8; layout.total_frame_size];
        encode(&sample(4), &layout, &mut buf).unwrap();
        buf[0] = 0x00;

        let mut target = FaceSample::new(2);
        target.frame_number = 99;
        let before = target.clone();

        let err = decode(&buf, &layout, &mut target).unwrap_err();
        assert_eq!(
            err,
            CodecError::MalformedFrame {
                expected: 42,
                found: 0
            }
        );
        assert_eq!(target, before);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let layout = layout(4, true, true, true);
        let mut short = vec![0u8; layout.total_frame_size - 1];
        assert!(matches!(
            encode(&sample(4), &layout, &mut short),
            Err(CodecError::FrameTooShort { .. })
        ));
        short[0] = layout.error_check_byte;
        let mut target = FaceSample::new(4);
        assert!(matches!(
            decode(&short, &layout, &mut target),
            Err(CodecError::FrameTooShort { .. })
        ));
    }

    #[test]
    fn test_blend_shape_count_mismatch() {
        let layout = layout(4, false, false, false);
        let mut buf = vec![0u8; layout.total_frame_size];
        assert_eq!(
            encode(&sample(3), &layout, &mut buf),
            Err(CodecError::BlendShapeCountMismatch {
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_absent_fields_untouched() {
        let layout = layout(2, false, false, false);
        let mut buf = vec![0u8; layout.total_frame_size];
        encode(&sample(2), &layout, &mut buf).unwrap();

        let mut target = FaceSample::new(2);
        target.frame_number = -5;
        target.frame_time = 3.0;
        target.tracking_active = true;
        decode(&buf, &layout, &mut target).unwrap();
        assert_eq!(target.frame_number, -5);
        assert_eq!(target.frame_time, 3.0);
        assert!(target.tracking_active);
        assert_eq!(read_frame_time(&buf, &layout), None);
        assert_eq!(read_frame_number(&buf, &layout), None);
    }

    #[test]
    fn test_metadata_peek() {
        let layout = layout(3, true, true, false);
        let mut buf = vec![0u8; layout.total_frame_size];
        encode(&sample(3), &layout, &mut buf).unwrap();
        assert_eq!(read_frame_time(&buf, &layout), Some(12.5));
        assert_eq!(read_frame_number(&buf, &layout), Some(1234));
    }

    fn unit_quat() -> impl Strategy<Value = [f32; 4]> {
        prop::array::uniform4(-1.0f32..1.0).prop_filter_map("non-zero quaternion", |q| {
            let n = q.iter().map(|c| c * c).sum::<f32>().sqrt();
            (n > 1e-3).then(|| [q[0] / n, q[1] / n, q[2] / n, q[3] / n])
        })
    }

    fn pose() -> impl Strategy<Value = Pose> {
        (prop::array::uniform3(-1.0e3f32..1.0e3), unit_quat())
            .prop_map(|(position, rotation)| Pose::new(position, rotation))
    }

    proptest! {
        #[test]
        fn prop_roundtrip_is_bit_exact(
            weights in prop::collection::vec(0.0f32..=1.0, 1..80),
            head in pose(),
            camera in pose(),
            frame_number: i32,
            frame_time in 0.0f32..1.0e5,
            tracking_active: bool,
            number: bool,
            time: bool,
            active: bool
        ) {
            let layout = layout(weights.len(), number, time, active);
            let original = FaceSample {
                blend_shapes: weights,
                head,
                camera,
                frame_number,
                frame_time,
                tracking_active,
            };
            let mut buf = vec![0u8; layout.total_frame_size];
            encode(&original, &layout, &mut buf).unwrap();

            let mut decoded = FaceSample::new(0);
            decode(&buf, &layout, &mut decoded).unwrap();

            let bits = |v: &[f32]| v.iter().map(|f| f.to_bits()).collect::<Vec<_>>();
            prop_assert_eq!(bits(&decoded.blend_shapes), bits(&original.blend_shapes));
            prop_assert_eq!(bits(&decoded.head.to_floats()), bits(&original.head.to_floats()));
            prop_assert_eq!(bits(&decoded.camera.to_floats()), bits(&original.camera.to_floats()));
            if number {
                prop_assert_eq!(decoded.frame_number, original.frame_number);
            }
            if time {
                prop_assert_eq!(decoded.frame_time.to_bits(), original.frame_time.to_bits());
            }
            if active {
                prop_assert_eq!(decoded.tracking_active, original.tracking_active);
            }
        }
    }
}
