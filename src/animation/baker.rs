//! Resampling a recorded take into fixed-rate keyframe curves.
//!
//! Source frames arrive at irregular times. The baker walks them in order
//! and emits keys on a fixed output clock `n / rate`, interpolating between
//! the two source frames that bracket each output time: weights and
//! positions linearly, rotations by spherical interpolation. The first frame
//! is emitted as-is at time zero.

use log::{debug, info};
use nalgebra::Vector3;

use super::curve::{ClipSink, Curve};
use super::recorder::RecordedStream;
use crate::schema::{FaceSample, Pose};
use crate::stream::codec;

/// Slack when comparing the output clock against a source time.
const TIME_EPSILON: f64 = 1e-6;

/// Supported bake rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRate {
    Hz24,
    Hz25,
    Hz30,
    Hz50,
    Hz60,
}

impl SampleRate {
    pub fn hz(self) -> u32 {
        match self {
            SampleRate::Hz24 => 24,
            SampleRate::Hz25 => 25,
            SampleRate::Hz30 => 30,
            SampleRate::Hz50 => 50,
            SampleRate::Hz60 => 60,
        }
    }

    /// Output time of keyframe `n`.
    #[inline]
    fn time_of(self, n: u64) -> f64 {
        n as f64 / f64::from(self.hz())
    }
}

impl TryFrom<u32> for SampleRate {
    type Error = BakeError;

    fn try_from(hz: u32) -> Result<Self, BakeError> {
        Ok(match hz {
            24 => SampleRate::Hz24,
            25 => SampleRate::Hz25,
            30 => SampleRate::Hz30,
            50 => SampleRate::Hz50,
            60 => SampleRate::Hz60,
            _ => return Err(BakeError::UnsupportedSampleRate(hz)),
        })
    }
}

impl std::fmt::Display for SampleRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} Hz", self.hz())
    }
}

/// Baking errors. All of them abort the bake before anything is committed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BakeError {
    #[error("Unsupported sample rate {0} Hz, expected 24, 25, 30, 50 or 60")]
    UnsupportedSampleRate(u32),
    #[error("Recording '{name}' cannot be baked: {reason}")]
    InvalidRecordedStream { name: String, reason: &'static str },
    #[error("Got {actual} blend shape names for {expected} blend shapes")]
    BlendShapeNameCount { expected: usize, actual: usize },
}

#[derive(Debug, Clone)]
pub struct BakeOptions {
    pub rate: SampleRate,
    /// Curve names for the blend shapes. Empty means `blendShape<i>`.
    pub blend_shape_names: Vec<String>,
}

impl BakeOptions {
    pub fn new(rate: SampleRate) -> Self {
        Self {
            rate,
            blend_shape_names: Vec::new(),
        }
    }
}

/// Summary of one bake.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BakeReport {
    /// Keys per curve.
    pub keyframes: usize,
    /// Source intervals with zero or negative duration that were skipped.
    pub degenerate_intervals: usize,
    /// Source frames with a bad sentinel that were skipped.
    pub malformed_frames: usize,
    pub source_frames: usize,
    /// Time of the last key in seconds.
    pub duration: f32,
}

/// Curves being filled, one per channel.
struct Tracks {
    blend_shapes: Vec<Curve<f32>>,
    head_position: Curve<[f32; 3]>,
    head_rotation: Curve<[f32; 4]>,
    camera_position: Curve<[f32; 3]>,
    camera_rotation: Curve<[f32; 4]>,
    tracking: Option<Curve<bool>>,
}

impl Tracks {
    fn new(names: &[String], count: usize, with_tracking: bool) -> Self {
        let blend_shapes = (0..count)
            .map(|i| match names.get(i) {
                Some(name) => Curve::new(format!("blendShapes.{}", name)),
                None => Curve::new(format!("blendShapes.blendShape{}", i)),
            })
            .collect();
        Self {
            blend_shapes,
            head_position: Curve::new("head.position"),
            head_rotation: Curve::new("head.rotation"),
            camera_position: Curve::new("camera.position"),
            camera_rotation: Curve::new("camera.rotation"),
            tracking: with_tracking.then(|| Curve::new("tracking.active")),
        }
    }

    fn push(&mut self, time: f32, sample: &FaceSample) {
        for (curve, &w) in self.blend_shapes.iter_mut().zip(&sample.blend_shapes) {
            curve.push(time, w);
        }
        self.head_position.push(time, sample.head.position);
        self.head_rotation.push(time, sample.head.rotation);
        self.camera_position.push(time, sample.camera.position);
        self.camera_rotation.push(time, sample.camera.rotation);
        if let Some(curve) = &mut self.tracking {
            curve.push(time, sample.tracking_active);
        }
    }

    fn commit(self, sink: &mut dyn ClipSink) {
        for curve in self.blend_shapes {
            sink.add_float_curve(curve);
        }
        sink.add_vec3_curve(self.head_position);
        sink.add_quat_curve(self.head_rotation);
        sink.add_vec3_curve(self.camera_position);
        sink.add_quat_curve(self.camera_rotation);
        if let Some(curve) = self.tracking {
            sink.add_bool_curve(curve);
        }
    }
}

fn lerp(a: f32, b: f32, u: f32) -> f32 {
    a + (b - a) * u
}

fn interpolate_pose(a: &Pose, b: &Pose, u: f32) -> Pose {
    let position: Vector3<f32> = a.translation().lerp(&b.translation(), u);
    let qa = a.orientation();
    let qb = b.orientation();
    // try_slerp only fails for opposite rotations; fall back to the nearer end
    let rotation = qa
        .try_slerp(&qb, u, 1.0e-6)
        .unwrap_or(if u < 0.5 { qa } else { qb });
    Pose::from_parts(position, rotation)
}

/// Blend `prev` toward `next` by `u` into `out`.
fn interpolate(prev: &FaceSample, next: &FaceSample, u: f32, out: &mut FaceSample) {
    out.blend_shapes.clear();
    out.blend_shapes.extend(
        prev.blend_shapes
            .iter()
            .zip(&next.blend_shapes)
            .map(|(&a, &b)| lerp(a, b, u)),
    );
    out.head = interpolate_pose(&prev.head, &next.head, u);
    out.camera = interpolate_pose(&prev.camera, &next.camera, u);
    out.tracking_active = if u >= 1.0 {
        next.tracking_active
    } else {
        prev.tracking_active
    };
}

/// Bake `stream` into `sink` at `options.rate`.
///
/// Nothing is committed unless the bake succeeds.
pub fn bake(
    stream: &RecordedStream,
    options: &BakeOptions,
    sink: &mut dyn ClipSink,
) -> Result<BakeReport, BakeError> {
    let layout = stream.layout();
    let invalid = |reason| BakeError::InvalidRecordedStream {
        name: stream.name().to_owned(),
        reason,
    };
    if !layout.has_frame_time() {
        return Err(invalid("frames carry no frame time"));
    }
    if stream.is_empty() {
        return Err(invalid("no frames recorded"));
    }
    let names = &options.blend_shape_names;
    if !names.is_empty() && names.len() != layout.blend_shape_count {
        return Err(BakeError::BlendShapeNameCount {
            expected: layout.blend_shape_count,
            actual: names.len(),
        });
    }

    let mut report = BakeReport {
        source_frames: stream.frame_count(),
        ..Default::default()
    };
    let mut tracks = Tracks::new(names, layout.blend_shape_count, layout.has_active_flag());
    let mut prev = FaceSample::new(layout.blend_shape_count);
    let mut next = FaceSample::new(layout.blend_shape_count);
    let mut blended = FaceSample::new(layout.blend_shape_count);

    let mut frames = stream.frames();
    let mut origin = None;
    for frame in frames.by_ref() {
        if codec::decode(frame, layout, &mut prev).is_ok() {
            origin = Some(f64::from(prev.frame_time));
            break;
        }
        report.malformed_frames += 1;
    }
    let Some(origin) = origin else {
        return Err(invalid("every frame is malformed"));
    };

    tracks.push(0.0, &prev);
    let mut last_time = 0.0f64;
    let mut prev_time = 0.0f64;
    let mut n: u64 = 1;

    for frame in frames {
        if codec::decode(frame, layout, &mut next).is_err() {
            report.malformed_frames += 1;
            continue;
        }
        let next_time = f64::from(next.frame_time) - origin;
        let interval = next_time - prev_time;
        if interval <= 0.0 {
            debug!(
                "Skipping degenerate interval at frame {} ({:.6}s)",
                next.frame_number, interval
            );
            report.degenerate_intervals += 1;
        } else {
            loop {
                let t = options.rate.time_of(n);
                if t > next_time + TIME_EPSILON {
                    break;
                }
                let u = ((t - prev_time) / interval).clamp(0.0, 1.0) as f32;
                interpolate(&prev, &next, u, &mut blended);
                tracks.push(t as f32, &blended);
                last_time = t;
                n += 1;
            }
        }
        std::mem::swap(&mut prev, &mut next);
        prev_time = next_time;
    }

    report.keyframes = n as usize;
    report.duration = last_time as f32;
    sink.set_frame_rate(options.rate.hz() as f32);
    tracks.commit(sink);
    info!(
        "Baked '{}' at {}: {} keys over {:.2}s ({} degenerate, {} malformed)",
        stream.name(),
        options.rate,
        report.keyframes,
        report.duration,
        report.degenerate_intervals,
        report.malformed_frames
    );
    Ok(report)
}
