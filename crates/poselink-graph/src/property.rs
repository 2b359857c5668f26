//! Position/orientation properties: constant values overwritten wholesale,
//! or bounded rings of (time, value) samples with interpolation and a
//! forward-hold extrapolation window.

use std::collections::VecDeque;

use glam::{DQuat, DVec3};

use poselink_core::types::FrameRef;

/// Default retention cap for sampled properties.
pub const DEFAULT_SAMPLE_CAP: usize = 20;
/// Default forward-hold window in seconds: queries this far past the newest
/// sample still return it; beyond that the value is undefined.
pub const DEFAULT_FORWARD_HOLD: f64 = 5.0;

// ─── Interpolation ────────────────────────────────────────────────

/// Blend between two samples. Linear for vectors, spherical for rotations.
pub trait Interpolate: Copy {
    fn interpolate(a: Self, b: Self, t: f64) -> Self;
}

impl Interpolate for DVec3 {
    fn interpolate(a: Self, b: Self, t: f64) -> Self {
        a.lerp(b, t)
    }
}

impl Interpolate for DQuat {
    fn interpolate(a: Self, b: Self, t: f64) -> Self {
        a.slerp(b, t)
    }
}

// ─── Sample Ring ──────────────────────────────────────────────────

/// Bounded, time-ordered ring of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRing<T> {
    samples: VecDeque<(f64, T)>,
    cap: usize,
    forward_hold: f64,
}

impl<T: Interpolate> SampleRing<T> {
    pub fn new(cap: usize, forward_hold: f64) -> Self {
        Self {
            samples: VecDeque::with_capacity(cap.min(64)),
            cap: cap.max(1),
            forward_hold,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<(f64, T)> {
        self.samples.back().copied()
    }

    /// Insert a sample, keeping the ring time-ordered. A sample at an
    /// existing time replaces it. The oldest sample is evicted past the cap.
    pub fn push(&mut self, time: f64, value: T) {
        match self.samples.iter().position(|(t, _)| *t >= time) {
            Some(at) if self.samples[at].0 == time => self.samples[at] = (time, value),
            Some(at) => self.samples.insert(at, (time, value)),
            None => self.samples.push_back((time, value)),
        }
        while self.samples.len() > self.cap {
            self.samples.pop_front();
        }
    }

    /// Value at `time`: interpolated between bracketing samples, held for
    /// `forward_hold` seconds past the newest sample, undefined otherwise.
    /// No backward extrapolation.
    pub fn resolve(&self, time: f64) -> Option<T> {
        let (first_t, _) = *self.samples.front()?;
        let (last_t, last_v) = *self.samples.back()?;

        if time < first_t {
            return None;
        }
        if time >= last_t {
            return (time - last_t <= self.forward_hold).then_some(last_v);
        }

        // Bracketing pair; the ring is small and ordered.
        let upper = self.samples.iter().position(|(t, _)| *t >= time)?;
        let (t1, v1) = self.samples[upper];
        if t1 == time || upper == 0 {
            return Some(v1);
        }
        let (t0, v0) = self.samples[upper - 1];
        let alpha = (time - t0) / (t1 - t0);
        Some(T::interpolate(v0, v1, alpha))
    }
}

// ─── Property Value ───────────────────────────────────────────────

/// Tagged value variant: unset, constant, or time-sampled.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PropertyValue<T> {
    #[default]
    Undefined,
    /// Overwritten wholesale on each update.
    Constant(T),
    Sampled(SampleRing<T>),
}

impl<T: Interpolate> PropertyValue<T> {
    pub fn resolve(&self, time: f64) -> Option<T> {
        match self {
            Self::Undefined => None,
            Self::Constant(value) => Some(*value),
            Self::Sampled(ring) => ring.resolve(time),
        }
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, Self::Undefined)
    }
}

// ─── Frame Property ───────────────────────────────────────────────

/// A value expressed relative to a reference frame.
///
/// The frame may change only by replacing the property (or re-homing it
/// explicitly); samples recorded against a previous frame are never mixed
/// with samples in a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameProperty<T> {
    pub frame: FrameRef,
    pub value: PropertyValue<T>,
}

impl<T: Interpolate> FrameProperty<T> {
    pub fn undefined() -> Self {
        Self {
            frame: FrameRef::Fixed,
            value: PropertyValue::Undefined,
        }
    }

    pub fn constant(frame: FrameRef, value: T) -> Self {
        Self {
            frame,
            value: PropertyValue::Constant(value),
        }
    }

    pub fn sampled(frame: FrameRef, cap: usize, forward_hold: f64) -> Self {
        Self {
            frame,
            value: PropertyValue::Sampled(SampleRing::new(cap, forward_hold)),
        }
    }

    pub fn resolve(&self, time: f64) -> Option<T> {
        self.value.resolve(time)
    }
}

impl<T: Interpolate> Default for FrameProperty<T> {
    fn default() -> Self {
        Self::undefined()
    }
}

// ─── Tests ────────────────────────────────────────────────────────
