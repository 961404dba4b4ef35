//! Rectangle primitive and numeric coercion helpers over `glam::Vec2`

use glam::Vec2;

/// Threshold below which a length or delta is treated as zero
pub const EPSILON: f32 = 1e-4;

/// Angle of `v`, or `fallback` when it is too short to have one
pub fn heading_or(v: Vec2, fallback: f32) -> f32 {
    if v.length() > EPSILON {
        v.y.atan2(v.x)
    } else {
        fallback
    }
}

/// Axis-aligned rectangle given by its edges
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

impl Rect {
    /// Build from edges in any order
    pub fn from_edges(left: f32, right: f32, top: f32, bottom: f32) -> Self {
        Self {
            left: left.min(right),
            right: left.max(right),
            top: top.min(bottom),
            bottom: top.max(bottom),
        }
    }

    /// Build from a top-left corner and a size
    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::from_edges(x, x + width, y, y + height)
    }

    /// Grow every edge outward by `margin`
    pub fn expand(&self, margin: f32) -> Self {
        Self::from_edges(
            self.left - margin,
            self.right + margin,
            self.top - margin,
            self.bottom + margin,
        )
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.left && p.x <= self.right && p.y >= self.top && p.y <= self.bottom
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new((self.left + self.right) * 0.5, (self.top + self.bottom) * 0.5)
    }

    pub fn is_finite(&self) -> bool {
        self.left.is_finite() && self.right.is_finite() && self.top.is_finite() && self.bottom.is_finite()
    }
}

/// Return `value` if it is finite, otherwise `fallback`
pub fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Coerce an optional wire number, keeping `current` when missing or non-finite
pub fn coerce_or(value: Option<f32>, current: f32) -> f32 {
    match value {
        Some(v) if v.is_finite() => v,
        _ => current,
    }
}

/// Sign of `value` as +1/-1, or `fallback` when too close to zero to tell
pub fn sign_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() && value.abs() > 0.001 {
        if value >= 0.0 {
            1.0
        } else {
            -1.0
        }
    } else {
        fallback
    }
}

/// Exponential smoothing factor `1 - e^(-rate*dt)`, clamped to 0..=1
pub fn smoothing_alpha(rate: f32, dt: f32) -> f32 {
    let rate = finite_or(rate, 0.0).max(0.0);
    let dt = finite_or(dt, 0.0).max(0.0);
    (1.0 - (-rate * dt).exp()).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_normalizes_edges() {
        let r = Rect::from_edges(10.0, 0.0, 5.0, -5.0);
        assert_eq!(r.left, 0.0);
        assert_eq!(r.right, 10.0);
        assert_eq!(r.top, -5.0);
        assert_eq!(r.bottom, 5.0);
        assert!(r.contains(Vec2::new(5.0, 0.0)));
    }

    #[test]
    fn smoothing_alpha_stays_in_unit_range() {
        assert_eq!(smoothing_alpha(12.0, 0.0), 0.0);
        let a = smoothing_alpha(12.0, 1.0 / 60.0);
        assert!(a > 0.0 && a < 1.0);
        assert_eq!(smoothing_alpha(f32::NAN, 0.1), 0.0);
        assert!(smoothing_alpha(12.0, 1000.0) <= 1.0);
    }

    #[test]
    fn heading_falls_back_for_short_vectors() {
        assert_eq!(heading_or(Vec2::ZERO, 0.5), 0.5);
        assert_eq!(heading_or(Vec2::new(0.0, 3.0), 0.0), std::f32::consts::FRAC_PI_2);
    }

    #[test]
    fn sign_falls_back_near_zero() {
        assert_eq!(sign_or(0.0005, -1.0), -1.0);
        assert_eq!(sign_or(-3.0, 1.0), -1.0);
        assert_eq!(sign_or(f32::INFINITY, 1.0), 1.0);
    }
}
