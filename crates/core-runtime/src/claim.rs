//! Claims: how much space a node asks its layout for.
//!
//! A Claim is one `Stretch` per axis. Stretch setters maintain the ordering
//! invariant `0 <= min <= preferred <= max`; writing one bound drags the
//! others along rather than rejecting the write, so a claim is always
//! consistent. Claims convert to and from Values with a fixed schema, which
//! is how they travel through the `widget.claim` interop.

use core_value::{Denotable, Value, ValueError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stretch {
    preferred: f64,
    min: f64,
    max: f64,
    scale_factor: f64,
    priority: f64,
}

impl Default for Stretch {
    fn default() -> Self {
        Self {
            preferred: 0.0,
            min: 0.0,
            max: f64::INFINITY,
            scale_factor: 1.0,
            priority: 0.0,
        }
    }
}

impl Stretch {
    pub fn new(preferred: f64, min: f64, max: f64, scale_factor: f64, priority: f64) -> Self {
        let mut stretch = Stretch {
            priority,
            ..Stretch::default()
        };
        // order matters: bounds first, then preferred pulls them apart
        stretch.set_min(min);
        stretch.set_max(max);
        stretch.set_preferred(preferred);
        stretch.set_scale_factor(scale_factor);
        stretch
    }

    /// A fixed-size stretch: min = preferred = max.
    pub fn fixed(size: f64) -> Self {
        Self::new(size, size, size, 1.0, 0.0)
    }

    pub fn preferred(&self) -> f64 {
        self.preferred
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn set_preferred(&mut self, value: f64) {
        self.preferred = value.max(0.0);
        self.min = self.min.min(self.preferred);
        self.max = self.max.max(self.preferred);
    }

    pub fn set_min(&mut self, value: f64) {
        self.min = value.max(0.0);
        self.preferred = self.preferred.max(self.min);
        self.max = self.max.max(self.min);
    }

    pub fn set_max(&mut self, value: f64) {
        self.max = value.max(0.0);
        self.preferred = self.preferred.min(self.max);
        self.min = self.min.min(self.max);
    }

    pub fn set_scale_factor(&mut self, value: f64) {
        self.scale_factor = value.max(0.0);
    }

    fn to_denotable(self) -> Denotable {
        Denotable::Record(vec![
            ("preferred".to_string(), Denotable::Number(self.preferred)),
            ("min".to_string(), Denotable::Number(self.min)),
            ("max".to_string(), Denotable::Number(self.max)),
            (
                "scale_factor".to_string(),
                Denotable::Number(self.scale_factor),
            ),
            ("priority".to_string(), Denotable::Number(self.priority)),
        ])
    }

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        Ok(Stretch::new(
            value.index("preferred")?.as_f64()?,
            value.index("min")?.as_f64()?,
            value.index("max")?.as_f64()?,
            value.index("scale_factor")?.as_f64()?,
            value.index("priority")?.as_f64()?,
        ))
    }
}

/// A node's space request: one stretch per axis.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Claim {
    pub horizontal: Stretch,
    pub vertical: Stretch,
}

impl Claim {
    pub fn fixed(width: f64, height: f64) -> Self {
        Self {
            horizontal: Stretch::fixed(width),
            vertical: Stretch::fixed(height),
        }
    }

    pub fn to_value(self) -> Value {
        Value::from_denotable(Denotable::Record(vec![
            ("horizontal".to_string(), self.horizontal.to_denotable()),
            ("vertical".to_string(), self.vertical.to_denotable()),
        ]))
        .expect("claim layout is a valid denotable")
    }

    pub fn from_value(value: &Value) -> Result<Self, ValueError> {
        Ok(Claim {
            horizontal: Stretch::from_value(&value.index("horizontal")?)?,
            vertical: Stretch::from_value(&value.index("vertical")?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stretch_keeps_bounds_ordered() {
        let stretch = Stretch::new(5.0, 10.0, 3.0, 1.0, 0.0);
        assert!(stretch.min() <= stretch.preferred());
        assert!(stretch.preferred() <= stretch.max());

        let mut stretch = Stretch::default();
        stretch.set_preferred(20.0);
        assert_eq!(stretch.preferred(), 20.0);
        assert_eq!(stretch.min(), 0.0);
        assert!(stretch.max() >= 20.0);

        stretch.set_max(5.0);
        assert_eq!(stretch.max(), 5.0);
        assert_eq!(stretch.preferred(), 5.0);
    }

    #[test]
    fn negative_sizes_clamp_to_zero() {
        let stretch = Stretch::new(-5.0, -1.0, -2.0, -3.0, 0.0);
        assert_eq!(stretch.min(), 0.0);
        assert_eq!(stretch.preferred(), 0.0);
        assert_eq!(stretch.scale_factor(), 0.0);
    }

    #[test]
    fn claim_round_trips_through_value() {
        let claim = Claim {
            horizontal: Stretch::new(100.0, 50.0, 200.0, 2.0, 1.0),
            vertical: Stretch::fixed(40.0),
        };
        let round_tripped = Claim::from_value(&claim.to_value()).unwrap();
        assert_eq!(round_tripped, claim);
        // infinity survives the trip
        assert_eq!(
            Claim::from_value(&Claim::default().to_value()).unwrap(),
            Claim::default()
        );
    }
}
