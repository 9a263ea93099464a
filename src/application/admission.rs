// Point admission: ordered insert, update in place, pruning and non-stop points
use super::search::{count_below, locate, Slot};
use crate::domain::point::{Point, Sample, Timestamp, END_OF_TIME, START_OF_TIME};
use crate::domain::series::SeriesBuffer;
use std::collections::BTreeMap;

/// Buffer mutation to forward to the render surface.
#[derive(Debug, Clone, PartialEq)]
pub enum PointChange {
    Added(Point),
    Updated(Point),
    Removed(Timestamp),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AdmissionPolicy {
    /// Points older than this are dropped on arrival.
    pub floor: Option<Timestamp>,
    /// Range series only accept points that carry a high value.
    pub is_range: bool,
}

impl AdmissionPolicy {
    fn accepts(&self, point: &Point) -> bool {
        if self.is_range && point.high.is_none() && point.y.is_some() {
            return false;
        }
        // x == 0 is the left non-stop position, never subject to the floor.
        !matches!(self.floor, Some(floor) if point.x > 0 && point.x < floor)
    }
}

/// Admits `points` into `buffer`, keeping it strictly ascending by x.
///
/// While a history load holds the buffer, points go to its side queue and
/// no change is reported.
pub fn admit(
    buffer: &mut SeriesBuffer,
    points: impl IntoIterator<Item = Point>,
    policy: &AdmissionPolicy,
) -> Vec<PointChange> {
    let mut changes = Vec::new();

    for point in points {
        if !policy.accepts(&point) {
            continue;
        }
        if buffer.history_loading {
            buffer.side_queue.push(point);
            continue;
        }

        if buffer.last().is_none_or(|last| point.x > last.x) {
            buffer.points.push(point);
            changes.push(PointChange::Added(point));
            continue;
        }

        match locate(&buffer.points, &point.x, |p| p.x) {
            Slot::Found(index) => {
                if buffer.points[index] != point {
                    buffer.points[index] = point;
                    changes.push(PointChange::Updated(point));
                }
            }
            Slot::Insert(index) => {
                buffer.points.insert(index, point);
                changes.push(PointChange::Added(point));
            }
        }
    }

    changes
}

/// Drops points older than `from`, keeping the last one before it so the
/// line still enters the visible area.
pub fn prune_old(buffer: &mut SeriesBuffer, from: Timestamp) -> Vec<PointChange> {
    let below = count_below(&buffer.points, &from, |p| p.x);
    if below <= 1 {
        return Vec::new();
    }
    buffer
        .points
        .drain(..below - 1)
        .map(|p| PointChange::Removed(p.x))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum NonStopOutcome {
    Applied(Vec<PointChange>),
    /// A history load holds the buffer; retry later.
    Deferred,
}

/// Recomputes the sentinels from the current first and last real point.
pub fn apply_non_stop_points(buffer: &mut SeriesBuffer, enabled: bool) -> NonStopOutcome {
    if buffer.history_loading {
        return NonStopOutcome::Deferred;
    }

    let (left, right) = match (enabled, buffer.first(), buffer.last()) {
        (true, Some(first), Some(last)) => (
            Some(first.moved_to(START_OF_TIME)),
            Some(last.moved_to(END_OF_TIME)),
        ),
        _ => (None, None),
    };

    let mut changes = Vec::new();
    replace_sentinel(&mut buffer.left_non_stop, left, START_OF_TIME, &mut changes);
    replace_sentinel(&mut buffer.right_non_stop, right, END_OF_TIME, &mut changes);
    NonStopOutcome::Applied(changes)
}

fn replace_sentinel(
    slot: &mut Option<Point>,
    next: Option<Point>,
    x: Timestamp,
    changes: &mut Vec<PointChange>,
) {
    match (slot.as_ref(), next) {
        (None, None) => {}
        (Some(_), None) => changes.push(PointChange::Removed(x)),
        (None, Some(point)) => changes.push(PointChange::Added(point)),
        (Some(current), Some(point)) if *current != point => changes.push(PointChange::Updated(point)),
        (Some(_), Some(_)) => {}
    }
    *slot = next;
}

/// Joins the low and high channels of a range series by timestamp.
#[derive(Debug, Clone, Default)]
pub struct RangeJoiner {
    pending: BTreeMap<Timestamp, (Option<Option<f64>>, Option<Option<f64>>)>,
}

impl RangeJoiner {
    /// Feeds samples of both channels and returns the points that are now
    /// complete, ascending.
    pub fn join(&mut self, low: &[Sample], high: &[Sample]) -> Vec<Point> {
        for sample in low {
            self.pending.entry(sample.t).or_default().0 = Some(sample.v);
        }
        for sample in high {
            self.pending.entry(sample.t).or_default().1 = Some(sample.v);
        }

        let complete: Vec<Timestamp> = self
            .pending
            .iter()
            .filter(|(_, (l, h))| l.is_some() && h.is_some())
            .map(|(t, _)| *t)
            .collect();

        let mut points = Vec::with_capacity(complete.len());
        for t in &complete {
            if let Some((Some(low), Some(high))) = self.pending.remove(t) {
                points.push(match (low, high) {
                    (Some(low), Some(high)) => Point::range(*t, low, high),
                    (None, None) => Point::gap(*t),
                    (low, high) => Point {
                        x: *t,
                        y: low,
                        low,
                        high,
                    },
                });
            }
        }

        // Channels stream in ascending order, so anything older than the
        // newest joined point can no longer find its partner.
        if let Some(newest) = complete.last() {
            self.pending = self.pending.split_off(newest);
        }
        points
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn xs(buffer: &SeriesBuffer) -> Vec<Timestamp> {
        buffer.points().iter().map(|p| p.x).collect()
    }

    #[test]
    fn test_append_insert_and_update() {
        let mut buffer = SeriesBuffer::default();
        let policy = AdmissionPolicy::default();

        let changes = admit(
            &mut buffer,
            [Point::value(10, 1.0), Point::value(30, 3.0), Point::value(20, 2.0)],
            &policy,
        );
        assert_eq!(xs(&buffer), vec![10, 20, 30]);
        assert_eq!(changes.len(), 3);

        let changes = admit(&mut buffer, [Point::value(20, 5.0)], &policy);
        assert_eq!(changes, vec![PointChange::Updated(Point::value(20, 5.0))]);
        assert_eq!(buffer.len(), 3);

        let unchanged = admit(&mut buffer, [Point::value(20, 5.0)], &policy);
        assert!(unchanged.is_empty());
    }

    #[test]
    fn test_floor_and_range_filter() {
        let mut buffer = SeriesBuffer::default();
        let policy = AdmissionPolicy {
            floor: Some(100),
            is_range: true,
        };

        admit(
            &mut buffer,
            [
                Point::range(50, 1.0, 2.0),
                Point::value(150, 1.0),
                Point::range(200, 1.0, 2.0),
                Point::gap(250),
            ],
            &policy,
        );
        assert_eq!(xs(&buffer), vec![200, 250]);
    }

    #[test]
    fn test_loading_buffer_collects_side_queue() {
        let mut buffer = SeriesBuffer::default();
        buffer.history_loading = true;

        let changes = admit(&mut buffer, [Point::value(10, 1.0)], &AdmissionPolicy::default());
        assert!(changes.is_empty());
        assert!(buffer.is_empty());
        assert_eq!(buffer.side_queue_len(), 1);
        assert_eq!(apply_non_stop_points(&mut buffer, true), NonStopOutcome::Deferred);
    }

    #[test]
    fn test_prune_keeps_one_point_before_boundary() {
        let mut buffer = SeriesBuffer::from_points((0..10).map(|i| Point::value(i * 10, 0.0)).collect());

        let removed = prune_old(&mut buffer, 45);
        assert_eq!(removed.len(), 4);
        assert_eq!(xs(&buffer), vec![40, 50, 60, 70, 80, 90]);

        assert!(prune_old(&mut buffer, 45).is_empty());
    }

    #[test]
    fn test_non_stop_disabled_removes_sentinels() {
        let mut buffer = SeriesBuffer::from_points(vec![Point::value(10, 1.0)]);
        apply_non_stop_points(&mut buffer, true);
        assert!(buffer.left_non_stop().is_some());

        let outcome = apply_non_stop_points(&mut buffer, false);
        assert_eq!(
            outcome,
            NonStopOutcome::Applied(vec![
                PointChange::Removed(START_OF_TIME),
                PointChange::Removed(END_OF_TIME)
            ])
        );
        assert!(buffer.left_non_stop().is_none() && buffer.right_non_stop().is_none());
    }

    #[test]
    fn test_range_joiner_waits_for_both_channels() {
        let mut joiner = RangeJoiner::default();

        let points = joiner.join(&[Sample::new(10, 1.0), Sample::new(20, 2.0)], &[Sample::new(10, 5.0)]);
        assert_eq!(points, vec![Point::range(10, 1.0, 5.0)]);
        assert_eq!(joiner.pending_len(), 1);

        let points = joiner.join(&[], &[Sample::new(20, 6.0)]);
        assert_eq!(points, vec![Point::range(20, 2.0, 6.0)]);
        assert_eq!(joiner.pending_len(), 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Admit(Vec<(i64, f64)>),
        Prune(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => prop::collection::vec((1i64..500, -100.0f64..100.0), 0..20).prop_map(Op::Admit),
            1 => (1i64..500).prop_map(Op::Prune),
        ]
    }

    proptest! {
        #[test]
        fn prop_admission_keeps_buffer_strictly_ascending(
            batches in prop::collection::vec(prop::collection::vec((0i64..1_000, -1e3f64..1e3), 0..30), 1..10)
        ) {
            let mut buffer = SeriesBuffer::default();
            let mut expected = BTreeMap::new();
            for batch in &batches {
                admit(&mut buffer, batch.iter().map(|(x, y)| Point::value(*x, *y)), &AdmissionPolicy::default());
                for (x, y) in batch {
                    expected.insert(*x, *y);
                }
            }

            prop_assert!(buffer.is_strictly_ascending());
            let actual: Vec<(i64, f64)> = buffer.points().iter().map(|p| (p.x, p.y.unwrap())).collect();
            let expected: Vec<(i64, f64)> = expected.into_iter().collect();
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn prop_non_stop_points_track_first_and_last(ops in prop::collection::vec(op(), 1..30)) {
            let mut buffer = SeriesBuffer::default();
            for op in ops {
                match op {
                    Op::Admit(points) => {
                        admit(&mut buffer, points.into_iter().map(|(x, y)| Point::value(x, y)), &AdmissionPolicy::default());
                    }
                    Op::Prune(from) => {
                        prune_old(&mut buffer, from);
                    }
                }
                apply_non_stop_points(&mut buffer, true);

                match (buffer.first(), buffer.last()) {
                    (Some(first), Some(last)) => {
                        let left = buffer.left_non_stop().unwrap();
                        let right = buffer.right_non_stop().unwrap();
                        prop_assert_eq!(left.x, START_OF_TIME);
                        prop_assert_eq!(right.x, END_OF_TIME);
                        prop_assert_eq!(left.y, first.y);
                        prop_assert_eq!(right.y, last.y);
                        prop_assert_eq!(buffer.rendered().filter(|p| p.x == END_OF_TIME).count(), 1);
                    }
                    _ => {
                        prop_assert!(buffer.left_non_stop().is_none());
                        prop_assert!(buffer.right_non_stop().is_none());
                    }
                }
            }
        }
    }
}
