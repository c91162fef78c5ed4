//! Keyframe curves and the clip sink baked curves are committed to.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keyframe<T> {
    pub time: f32,
    pub value: T,
}

/// A named channel of keyframes with strictly increasing times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curve<T> {
    pub name: String,
    pub keys: Vec<Keyframe<T>>,
}

impl<T> Curve<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: Vec::new(),
        }
    }

    /// Append a key. A key at the same time as the last one replaces it;
    /// an earlier key is ignored. Returns true if a key was appended.
    pub fn push(&mut self, time: f32, value: T) -> bool {
        if let Some(last) = self.keys.last_mut() {
            if time == last.time {
                last.value = value;
                return false;
            }
            if time < last.time {
                return false;
            }
        }
        self.keys.push(Keyframe { time, value });
        true
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn duration(&self) -> f32 {
        match (self.keys.first(), self.keys.last()) {
            (Some(first), Some(last)) => last.time - first.time,
            _ => 0.0,
        }
    }
}

/// Destination for baked curves.
pub trait ClipSink {
    fn set_frame_rate(&mut self, hz: f32);
    fn add_float_curve(&mut self, curve: Curve<f32>);
    fn add_vec3_curve(&mut self, curve: Curve<[f32; 3]>);
    /// Rotations as `[x, y, z, w]`.
    fn add_quat_curve(&mut self, curve: Curve<[f32; 4]>);
    fn add_bool_curve(&mut self, curve: Curve<bool>);
}

/// In-memory clip, serializable to JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnimationClip {
    pub name: String,
    pub frame_rate: f32,
    pub float_curves: Vec<Curve<f32>>,
    pub vec3_curves: Vec<Curve<[f32; 3]>>,
    pub quat_curves: Vec<Curve<[f32; 4]>>,
    pub bool_curves: Vec<Curve<bool>>,
}

impl AnimationClip {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn float_curve(&self, name: &str) -> Option<&Curve<f32>> {
        self.float_curves.iter().find(|c| c.name == name)
    }

    pub fn vec3_curve(&self, name: &str) -> Option<&Curve<[f32; 3]>> {
        self.vec3_curves.iter().find(|c| c.name == name)
    }

    pub fn quat_curve(&self, name: &str) -> Option<&Curve<[f32; 4]>> {
        self.quat_curves.iter().find(|c| c.name == name)
    }

    pub fn bool_curve(&self, name: &str) -> Option<&Curve<bool>> {
        self.bool_curves.iter().find(|c| c.name == name)
    }

    /// Longest curve duration.
    pub fn duration(&self) -> f32 {
        let floats = self.float_curves.iter().map(Curve::duration);
        let vec3s = self.vec3_curves.iter().map(Curve::duration);
        let quats = self.quat_curves.iter().map(Curve::duration);
        let bools = self.bool_curves.iter().map(Curve::duration);
        floats.chain(vec3s).chain(quats).chain(bools).fold(0.0, f32::max)
    }
}

impl ClipSink for AnimationClip {
    fn set_frame_rate(&mut self, hz: f32) {
        self.frame_rate = hz;
    }

    fn add_float_curve(&mut self, curve: Curve<f32>) {
        self.float_curves.push(curve);
    }

    fn add_vec3_curve(&mut self, curve: Curve<[f32; 3]>) {
        self.vec3_curves.push(curve);
    }

    fn add_quat_curve(&mut self, curve: Curve<[f32; 4]>) {
        self.quat_curves.push(curve);
    }

    fn add_bool_curve(&mut self, curve: Curve<bool>) {
        self.bool_curves.push(curve);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_stay_strictly_increasing() {
        let mut curve = Curve::new("jawOpen");
        assert!(curve.push(0.0, 0.1));
        assert!(curve.push(0.5, 0.2));
        assert!(!curve.push(0.5, 0.3));
        assert!(!curve.push(0.25, 0.9));
        assert_eq!(curve.len(), 2);
        assert_eq!(curve.keys[1].value, 0.3);
        assert_eq!(curve.duration(), 0.5);
    }

    #[test]
    fn test_clip_json() {
        let mut clip = AnimationClip::new("take");
        clip.set_frame_rate(30.0);
        let mut curve = Curve::new("tracking.active");
        curve.push(0.0, true);
        curve.push(2.0, false);
        clip.add_bool_curve(curve);

        let json = serde_json::to_string(&clip).unwrap();
        let back: AnimationClip = serde_json::from_str(&json).unwrap();
        assert_eq!(back, clip);
        assert_eq!(back.duration(), 2.0);
        assert!(back.bool_curve("tracking.active").is_some());
    }
}
