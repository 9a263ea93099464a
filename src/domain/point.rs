// Point and sample domain models

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// "End of time" sentinel used for the right non-stop point. Kept finite
/// (01/01/2038) so 32 bit consumers can still handle it.
pub const END_OF_TIME: Timestamp = 2_145_916_800_000;

/// X position of the left non-stop point.
pub const START_OF_TIME: Timestamp = 0;

/// One rendered point of a series. Range series carry `low`/`high`,
/// plain series only `y`. A `None` value renders as a gap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: Timestamp,
    pub y: Option<f64>,
    pub low: Option<f64>,
    pub high: Option<f64>,
}

impl Point {
    pub fn new(x: Timestamp, y: Option<f64>) -> Self {
        Self {
            x,
            y,
            low: None,
            high: None,
        }
    }

    pub fn value(x: Timestamp, y: f64) -> Self {
        Self::new(x, Some(y))
    }

    pub fn gap(x: Timestamp) -> Self {
        Self::new(x, None)
    }

    pub fn range(x: Timestamp, low: f64, high: f64) -> Self {
        Self {
            x,
            y: Some(low),
            low: Some(low),
            high: Some(high),
        }
    }

    /// Same values, different position. Used to build the non-stop points.
    pub fn moved_to(&self, x: Timestamp) -> Self {
        Self { x, ..*self }
    }

    /// Smallest and largest value this point contributes to its axis.
    pub fn extent(&self) -> Option<(f64, f64)> {
        let values = [self.y, self.low, self.high];
        let mut iter = values.iter().flatten().copied().filter(|v| v.is_finite());
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }
}

/// Raw sample as delivered by a source channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub t: Timestamp,
    pub v: Option<f64>,
}

impl Sample {
    pub fn new(t: Timestamp, v: f64) -> Self {
        Self { t, v: Some(v) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_covers_range_values() {
        assert_eq!(Point::range(10, 2.0, 7.5).extent(), Some((2.0, 7.5)));
        assert_eq!(Point::value(10, -3.0).extent(), Some((-3.0, -3.0)));
        assert_eq!(Point::gap(10).extent(), None);
    }

    #[test]
    fn test_moved_to_keeps_values() {
        let p = Point::range(10, 1.0, 2.0).moved_to(END_OF_TIME);
        assert_eq!(p.x, END_OF_TIME);
        assert_eq!(p.low, Some(1.0));
        assert_eq!(p.high, Some(2.0));
    }
}
