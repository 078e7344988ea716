//! Key frames, segments and frame baking.
//!
//! A [`Segment`] is a timeline of `duration_ms` split by relative cue
//! points.  Each cue point carries one [`KeyFrame`] per animation target.
//! Baking turns a segment into a flat list of frames, one value per target
//! per frame period:
//!
//! ```text
//!  cue:    0.0            0.5             1.0
//!  kf:     0 ────ease────▶ 1 ────ease────▶ 0
//!  frame:  ▲ ▲ ▲ ▲ ... ▲   ▲ ▲ ▲ ... ▲     ▲
//!          │ └ t = period, 2·period, … < interval
//!          └ first key-frame row
//! ```
//!
//! Every cue interval ends exactly on its key-frame value, so easing
//! rounding never accumulates across intervals.

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::easing::Easing;
use crate::config::MAX_BAKED_FRAMES;
use crate::error::ConfigError;

// ── Key frames ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyFrame {
    pub value: f32,
    /// Offset from the previous key frame of the same target; overrides
    /// `value` when set.
    pub delta: Option<f32>,
    /// `false` holds the previous key frame's value.
    pub change: bool,
    /// Easing for the interval that starts at this key frame.
    pub easing: Option<Easing>,
}

impl Default for KeyFrame {
    fn default() -> Self {
        Self {
            value: 0.0,
            delta: None,
            change: true,
            easing: None,
        }
    }
}

impl KeyFrame {
    pub fn new(value: f32) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    pub fn delta(delta: f32) -> Self {
        Self {
            delta: Some(delta),
            ..Self::default()
        }
    }

    pub fn hold() -> Self {
        Self {
            change: false,
            ..Self::default()
        }
    }

    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = Some(easing);
        self
    }

    /// One row of plain-value key frames per cue point.
    pub fn from_values(rows: &[&[f32]]) -> Vec<Vec<KeyFrame>> {
        rows.iter()
            .map(|row| row.iter().copied().map(Self::new).collect())
            .collect()
    }

    fn resolve(&self, previous: Option<f32>) -> f32 {
        match (previous, self.change, self.delta) {
            (Some(prev), false, _) => prev,
            (Some(prev), true, Some(delta)) => prev + delta,
            _ => self.value,
        }
    }
}

// ── Segment ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub duration_ms: u32,
    pub cue_points: Vec<f32>,
    /// `key_frames[cue][target]`.
    pub key_frames: Vec<Vec<KeyFrame>>,
}

impl Segment {
    pub fn new(duration_ms: u32, cue_points: Vec<f32>, key_frames: Vec<Vec<KeyFrame>>) -> Self {
        Self {
            duration_ms,
            cue_points,
            key_frames,
        }
    }

    pub fn from_values(duration_ms: u32, cue_points: &[f32], rows: &[&[f32]]) -> Self {
        Self::new(duration_ms, cue_points.to_vec(), KeyFrame::from_values(rows))
    }

    pub fn validate(&self, targets: usize) -> Result<(), ConfigError> {
        if self.duration_ms == 0 {
            return Err(ConfigError::ZeroDuration);
        }
        if self.cue_points.len() < 2 {
            return Err(ConfigError::TooFewCuePoints {
                count: self.cue_points.len(),
            });
        }
        for (index, &value) in self.cue_points.iter().enumerate() {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::CuePointOutOfRange { index, value });
            }
            if index > 0 && value <= self.cue_points[index - 1] {
                return Err(ConfigError::CuePointsNotIncreasing { index });
            }
        }
        if self.key_frames.len() != self.cue_points.len() {
            return Err(ConfigError::KeyFrameCountMismatch {
                cue_points: self.cue_points.len(),
                key_frames: self.key_frames.len(),
            });
        }
        if let Some(row) = self.key_frames.iter().find(|row| row.len() != targets) {
            return Err(ConfigError::TargetCountMismatch {
                expected: targets,
                actual: row.len(),
            });
        }
        Ok(())
    }

    /// Absolute key-frame values after applying `delta` and `change`.
    fn resolved_values(&self) -> Vec<Vec<f32>> {
        let mut resolved: Vec<Vec<f32>> = Vec::with_capacity(self.key_frames.len());
        for row in &self.key_frames {
            let values = row
                .iter()
                .enumerate()
                .map(|(tgt, kf)| kf.resolve(resolved.last().map(|prev| prev[tgt])))
                .collect();
            resolved.push(values);
        }
        resolved
    }

    /// Upper bound on the frames [`bake`](Self::bake) produces at
    /// `period_ms`: every key-frame row plus one frame per whole period.
    pub fn frame_bound(&self, period_ms: u32) -> u64 {
        self.cue_points.len() as u64 + u64::from(self.duration_ms) / u64::from(period_ms.max(1))
    }

    /// Bake into frames of `targets` values each, sampled every
    /// `period_ms`.  Intervals without their own easing use
    /// `default_easing`.
    pub fn bake(
        &self,
        targets: usize,
        period_ms: u32,
        default_easing: Easing,
    ) -> Result<Vec<Vec<f32>>, ConfigError> {
        self.validate(targets)?;
        if period_ms == 0 {
            return Err(ConfigError::ZeroInterval("period_ms"));
        }
        let bound = self.frame_bound(period_ms);
        if bound > MAX_BAKED_FRAMES {
            return Err(ConfigError::TooManyFrames {
                frames: bound,
                max: MAX_BAKED_FRAMES,
            });
        }

        let values = self.resolved_values();
        let cue_ms: Vec<u32> = self
            .cue_points
            .iter()
            .map(|cue| (cue * self.duration_ms as f32).round() as u32)
            .collect();

        let mut frames = vec![values[0].clone()];
        for interval in 1..values.len() {
            let begin = &values[interval - 1];
            let end = &values[interval];
            let span = cue_ms[interval].saturating_sub(cue_ms[interval - 1]);

            let mut t = period_ms;
            while t < span {
                let frame = (0..targets)
                    .map(|tgt| {
                        let easing = self.key_frames[interval - 1][tgt]
                            .easing
                            .unwrap_or(default_easing);
                        easing.ease(t as f32, begin[tgt], end[tgt] - begin[tgt], span as f32)
                    })
                    .collect();
                frames.push(frame);
                t += period_ms;
            }
            frames.push(end.clone());
        }
        Ok(frames)
    }
}

// ── Instance ──────────────────────────────────────────────────

/// An ordered list of segments played back to back.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnimationInstance {
    pub segments: Vec<Segment>,
}

impl AnimationInstance {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn single(segment: Segment) -> Self {
        Self::new(vec![segment])
    }

    /// Parse an instance from JSON, e.g.
    /// `{"segments":[{"duration_ms":500,"cue_points":[0,1],"key_frames":[[{"value":0}],[{"value":1}]]}]}`.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid animation instance JSON")
    }

    pub fn validate(&self, targets: usize) -> Result<(), ConfigError> {
        if self.segments.is_empty() {
            return Err(ConfigError::NoSegments);
        }
        self.segments.iter().try_for_each(|s| s.validate(targets))
    }

    pub fn bake(
        &self,
        targets: usize,
        period_ms: u32,
        default_easing: Easing,
    ) -> Result<BakedInstance, ConfigError> {
        if self.segments.is_empty() {
            return Err(ConfigError::NoSegments);
        }
        let bound: u64 = self
            .segments
            .iter()
            .map(|s| s.frame_bound(period_ms))
            .fold(0, u64::saturating_add);
        if bound > MAX_BAKED_FRAMES {
            return Err(ConfigError::TooManyFrames {
                frames: bound,
                max: MAX_BAKED_FRAMES,
            });
        }
        let segments = self
            .segments
            .iter()
            .map(|s| s.bake(targets, period_ms, default_easing))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BakedInstance { segments })
    }
}

/// Pre-computed frames of one instance, ready for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct BakedInstance {
    segments: Vec<Vec<Vec<f32>>>,
}

impl BakedInstance {
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Frames of one segment; each frame holds one value per target.
    pub fn frames(&self, segment: usize) -> &[Vec<f32>] {
        self.segments.get(segment).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn frame_count(&self) -> usize {
        self.segments.iter().map(Vec::len).sum()
    }

    /// Every frame in playback order.
    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        self.segments.iter().flatten().map(Vec::as_slice)
    }
}
