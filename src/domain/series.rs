// Series domain models: kinds, aggregates and the ordered point buffer
use super::error::TrendError;
use super::point::{Point, Timestamp};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub type SeriesId = String;
pub type AxisId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SeriesKind {
    #[default]
    Line,
    Spline,
    Area,
    AreaSpline,
    Column,
    Scatter,
    Step,
    AreaRange,
    AreaSplineRange,
    ColumnRange,
}

impl SeriesKind {
    /// Range kinds need a low and a high value per point and bind a second
    /// channel for the high value.
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            SeriesKind::AreaRange | SeriesKind::AreaSplineRange | SeriesKind::ColumnRange
        )
    }
}

impl FromStr for SeriesKind {
    type Err = TrendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "line" => SeriesKind::Line,
            "spline" => SeriesKind::Spline,
            "area" => SeriesKind::Area,
            "areaspline" => SeriesKind::AreaSpline,
            "column" => SeriesKind::Column,
            "scatter" => SeriesKind::Scatter,
            "step" => SeriesKind::Step,
            "arearange" => SeriesKind::AreaRange,
            "areasplinerange" => SeriesKind::AreaSplineRange,
            "columnrange" => SeriesKind::ColumnRange,
            other => return Err(TrendError::UnsupportedSeriesType(other.to_string())),
        };
        Ok(kind)
    }
}

/// Server side aggregation of a channel. Two aggregate configurations are
/// equal only when every field matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AggregateOptions {
    #[serde(default)]
    pub aggregate: Option<String>,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

const AGGREGATE_UNITS: [&str; 5] = ["s", "m", "h", "d", "M"];

impl AggregateOptions {
    /// True for a real aggregate (not `Sampled`, with interval and a valid
    /// unit). Aggregated channels can only be loaded as history.
    pub fn is_aggregate(&self) -> bool {
        let aggregated = matches!(self.aggregate.as_deref(), Some(a) if !a.is_empty() && a != "Sampled");
        let has_interval = self.interval.as_deref().is_some_and(|i| !i.is_empty());
        let has_unit = self
            .unit
            .as_deref()
            .is_some_and(|u| AGGREGATE_UNITS.contains(&u));
        aggregated && has_interval && has_unit
    }
}

/// Ordered point buffer of one series.
///
/// Real points are strictly ascending by `x`. The non-stop sentinels are
/// kept outside the real points so at most one of each can exist.
#[derive(Debug, Clone, Default)]
pub struct SeriesBuffer {
    pub(crate) points: Vec<Point>,
    pub(crate) left_non_stop: Option<Point>,
    pub(crate) right_non_stop: Option<Point>,
    pub(crate) history_loading: bool,
    /// Live points that arrived while a history load held the buffer.
    pub(crate) side_queue: Vec<Point>,
}

impl SeriesBuffer {
    pub fn from_points(points: Vec<Point>) -> Self {
        Self {
            points,
            ..Default::default()
        }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&Point> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&Point> {
        self.points.last()
    }

    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.points.last().map(|p| p.x)
    }

    pub fn left_non_stop(&self) -> Option<&Point> {
        self.left_non_stop.as_ref()
    }

    pub fn right_non_stop(&self) -> Option<&Point> {
        self.right_non_stop.as_ref()
    }

    pub fn is_history_loading(&self) -> bool {
        self.history_loading
    }

    pub fn side_queue_len(&self) -> usize {
        self.side_queue.len()
    }

    /// Everything a surface draws, sentinels included, in x order.
    pub fn rendered(&self) -> impl Iterator<Item = &Point> {
        self.left_non_stop
            .iter()
            .chain(self.points.iter())
            .chain(self.right_non_stop.iter())
    }

    /// Smallest and largest value over the real points.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.points
            .iter()
            .filter_map(Point::extent)
            .reduce(|(lo, hi), (l, h)| (lo.min(l), hi.max(h)))
    }

    pub fn is_strictly_ascending(&self) -> bool {
        self.points.windows(2).all(|w| w[0].x < w[1].x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::point::END_OF_TIME;

    #[test]
    fn test_is_aggregate() {
        let sampled = AggregateOptions {
            aggregate: Some("Sampled".into()),
            interval: Some("1".into()),
            unit: Some("m".into()),
        };
        assert!(!sampled.is_aggregate());

        let average = AggregateOptions {
            aggregate: Some("Average".into()),
            interval: Some("1".into()),
            unit: Some("h".into()),
        };
        assert!(average.is_aggregate());

        let bad_unit = AggregateOptions {
            unit: Some("w".into()),
            ..average.clone()
        };
        assert!(!bad_unit.is_aggregate());
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!("areasplinerange".parse::<SeriesKind>(), Ok(SeriesKind::AreaSplineRange));
        assert!(SeriesKind::ColumnRange.is_range());
        assert_eq!(
            "pie".parse::<SeriesKind>(),
            Err(TrendError::UnsupportedSeriesType("pie".into()))
        );
    }

    #[test]
    fn test_aggregate_equality_requires_all_fields() {
        let a = AggregateOptions {
            aggregate: Some("Average".into()),
            interval: Some("1".into()),
            unit: Some("h".into()),
        };
        let b = AggregateOptions {
            aggregate: Some("Average".into()),
            interval: Some("5".into()),
            unit: Some("h".into()),
        };
        assert_ne!(a, b);
    }

    #[test]
    fn test_rendered_includes_sentinels_in_order() {
        let mut buffer = SeriesBuffer::from_points(vec![Point::value(10, 1.0), Point::value(20, 2.0)]);
        buffer.left_non_stop = Some(Point::value(0, 1.0));
        buffer.right_non_stop = Some(Point::value(END_OF_TIME, 2.0));

        let xs: Vec<_> = buffer.rendered().map(|p| p.x).collect();
        assert_eq!(xs, vec![0, 10, 20, END_OF_TIME]);
        assert_eq!(buffer.value_range(), Some((1.0, 2.0)));
    }
}
