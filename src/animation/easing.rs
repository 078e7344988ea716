//! Easing curves for key-frame interpolation.
//!
//! Each curve maps normalised time `0..=1` to normalised progress.  `Back`
//! and `Elastic` overshoot, so progress may leave `0..=1` between the
//! endpoints.  Curves are named `"<family>-<in|out|in-out>"` in config
//! and JSON (`"sine-in-out"`, `"bounce-out"`, `"linear"`).

use core::f32::consts::PI;
use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EasingType {
    In,
    Out,
    InOut,
}

impl EasingType {
    fn suffix(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
            Self::InOut => "in-out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Easing {
    #[default]
    Linear,
    Quad(EasingType),
    Cubic(EasingType),
    Quart(EasingType),
    Quint(EasingType),
    Sine(EasingType),
    Expo(EasingType),
    Circ(EasingType),
    Back(EasingType),
    Bounce(EasingType),
    Elastic(EasingType),
}

impl Easing {
    /// Penner form: value at time `t` of a tween from `begin` by `change`
    /// over `duration`.
    pub fn ease(self, t: f32, begin: f32, change: f32, duration: f32) -> f32 {
        if duration <= 0.0 {
            return begin + change;
        }
        begin + change * self.at_normalized((t / duration).clamp(0.0, 1.0))
    }

    pub fn at_normalized(self, x: f32) -> f32 {
        match self {
            Self::Linear => x,
            Self::Quad(t) => poly(t, x, 2),
            Self::Cubic(t) => poly(t, x, 3),
            Self::Quart(t) => poly(t, x, 4),
            Self::Quint(t) => poly(t, x, 5),
            Self::Sine(t) => match t {
                EasingType::In => 1.0 - (x * PI / 2.0).cos(),
                EasingType::Out => (x * PI / 2.0).sin(),
                EasingType::InOut => -((PI * x).cos() - 1.0) / 2.0,
            },
            Self::Expo(t) => expo(t, x),
            Self::Circ(t) => match t {
                EasingType::In => 1.0 - (1.0 - x * x).max(0.0).sqrt(),
                EasingType::Out => (1.0 - (x - 1.0) * (x - 1.0)).max(0.0).sqrt(),
                EasingType::InOut if x < 0.5 => {
                    (1.0 - (1.0 - (2.0 * x).powi(2)).max(0.0).sqrt()) / 2.0
                }
                EasingType::InOut => ((1.0 - (-2.0 * x + 2.0).powi(2)).max(0.0).sqrt() + 1.0) / 2.0,
            },
            Self::Back(t) => back(t, x),
            Self::Bounce(t) => match t {
                EasingType::In => 1.0 - bounce_out(1.0 - x),
                EasingType::Out => bounce_out(x),
                EasingType::InOut if x < 0.5 => (1.0 - bounce_out(1.0 - 2.0 * x)) / 2.0,
                EasingType::InOut => (1.0 + bounce_out(2.0 * x - 1.0)) / 2.0,
            },
            Self::Elastic(t) => elastic(t, x),
        }
    }

    fn family(self) -> (&'static str, Option<EasingType>) {
        match self {
            Self::Linear => ("linear", None),
            Self::Quad(t) => ("quad", Some(t)),
            Self::Cubic(t) => ("cubic", Some(t)),
            Self::Quart(t) => ("quart", Some(t)),
            Self::Quint(t) => ("quint", Some(t)),
            Self::Sine(t) => ("sine", Some(t)),
            Self::Expo(t) => ("expo", Some(t)),
            Self::Circ(t) => ("circ", Some(t)),
            Self::Back(t) => ("back", Some(t)),
            Self::Bounce(t) => ("bounce", Some(t)),
            Self::Elastic(t) => ("elastic", Some(t)),
        }
    }
}

// ── Curve helpers ─────────────────────────────────────────────

fn poly(t: EasingType, x: f32, n: i32) -> f32 {
    match t {
        EasingType::In => x.powi(n),
        EasingType::Out => 1.0 - (1.0 - x).powi(n),
        EasingType::InOut if x < 0.5 => 2f32.powi(n - 1) * x.powi(n),
        EasingType::InOut => 1.0 - (-2.0 * x + 2.0).powi(n) / 2.0,
    }
}

fn expo(t: EasingType, x: f32) -> f32 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    match t {
        EasingType::In => 2f32.powf(10.0 * x - 10.0),
        EasingType::Out => 1.0 - 2f32.powf(-10.0 * x),
        EasingType::InOut if x < 0.5 => 2f32.powf(20.0 * x - 10.0) / 2.0,
        EasingType::InOut => (2.0 - 2f32.powf(-20.0 * x + 10.0)) / 2.0,
    }
}

fn back(t: EasingType, x: f32) -> f32 {
    const C1: f32 = 1.701_58;
    const C2: f32 = C1 * 1.525;
    const C3: f32 = C1 + 1.0;
    match t {
        EasingType::In => C3 * x.powi(3) - C1 * x.powi(2),
        EasingType::Out => 1.0 + C3 * (x - 1.0).powi(3) + C1 * (x - 1.0).powi(2),
        EasingType::InOut if x < 0.5 => ((2.0 * x).powi(2) * ((C2 + 1.0) * 2.0 * x - C2)) / 2.0,
        EasingType::InOut => {
            ((2.0 * x - 2.0).powi(2) * ((C2 + 1.0) * (2.0 * x - 2.0) + C2) + 2.0) / 2.0
        }
    }
}

fn bounce_out(x: f32) -> f32 {
    const N1: f32 = 7.5625;
    const D1: f32 = 2.75;
    if x < 1.0 / D1 {
        N1 * x * x
    } else if x < 2.0 / D1 {
        let x = x - 1.5 / D1;
        N1 * x * x + 0.75
    } else if x < 2.5 / D1 {
        let x = x - 2.25 / D1;
        N1 * x * x + 0.9375
    } else {
        let x = x - 2.625 / D1;
        N1 * x * x + 0.984_375
    }
}

fn elastic(t: EasingType, x: f32) -> f32 {
    const C4: f32 = 2.0 * PI / 3.0;
    const C5: f32 = 2.0 * PI / 4.5;
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    match t {
        EasingType::In => -(2f32.powf(10.0 * x - 10.0)) * ((10.0 * x - 10.75) * C4).sin(),
        EasingType::Out => 2f32.powf(-10.0 * x) * ((10.0 * x - 0.75) * C4).sin() + 1.0,
        EasingType::InOut if x < 0.5 => {
            -(2f32.powf(20.0 * x - 10.0) * ((20.0 * x - 11.125) * C5).sin()) / 2.0
        }
        EasingType::InOut => {
            2f32.powf(-20.0 * x + 10.0) * ((20.0 * x - 11.125) * C5).sin() / 2.0 + 1.0
        }
    }
}

// ── Names ─────────────────────────────────────────────────────

impl fmt::Display for Easing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family() {
            (name, None) => f.write_str(name),
            (name, Some(t)) => write!(f, "{name}-{}", t.suffix()),
        }
    }
}

impl FromStr for Easing {
    type Err = ConfigError;

    /// Accepts `"sine-in-out"`, `"sine_in_out"` and `"sineInOut"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if key == "linear" {
            return Ok(Self::Linear);
        }

        let families: [(&str, fn(EasingType) -> Easing); 10] = [
            ("quad", Self::Quad),
            ("cubic", Self::Cubic),
            ("quart", Self::Quart),
            ("quint", Self::Quint),
            ("sine", Self::Sine),
            ("expo", Self::Expo),
            ("circ", Self::Circ),
            ("back", Self::Back),
            ("bounce", Self::Bounce),
            ("elastic", Self::Elastic),
        ];
        for (name, make) in families {
            if let Some(rest) = key.strip_prefix(name) {
                let kind = match rest {
                    "in" => EasingType::In,
                    "out" => EasingType::Out,
                    "inout" => EasingType::InOut,
                    _ => return Err(ConfigError::UnknownEasing),
                };
                return Ok(make(kind));
            }
        }
        Err(ConfigError::UnknownEasing)
    }
}

impl TryFrom<String> for Easing {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Easing> for String {
    fn from(e: Easing) -> Self {
        e.to_string()
    }
}
