use crate::model::*;

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted by start, `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < b.end {
            result.push(Span::new(current_start, b.end));
        }
    }

    result
}

/// Free sub-windows of `query` on a spot.
pub fn free_windows(sched: &SpotSchedule, query: &Span) -> Vec<Span> {
    let booked: Vec<Span> = sched.overlapping(query).map(|i| i.span).collect();
    // Intervals are already sorted by start.
    subtract_intervals(&[*query], &merge_overlapping(&booked))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn schedule(spans: &[(Ms, Ms)]) -> SpotSchedule {
        let mut sched = SpotSchedule::new("A-1".into());
        for &(s, e) in spans {
            sched.insert_interval(Interval {
                reservation_id: Ulid::new(),
                span: Span::new(s, e),
            });
        }
        sched
    }

    #[test]
    fn subtract_middle_punch() {
        let result = subtract_intervals(&[Span::new(100, 300)], &[Span::new(150, 200)]);
        assert_eq!(result, vec![Span::new(100, 150), Span::new(200, 300)]);
    }

    #[test]
    fn subtract_full_overlap() {
        assert!(subtract_intervals(&[Span::new(100, 200)], &[Span::new(50, 250)]).is_empty());
    }

    #[test]
    fn merge_adjacent() {
        let merged = merge_overlapping(&[Span::new(100, 200), Span::new(200, 300), Span::new(400, 500)]);
        assert_eq!(merged, vec![Span::new(100, 300), Span::new(400, 500)]);
    }

    #[test]
    fn free_windows_around_bookings() {
        let h = HOUR_MS;
        let sched = schedule(&[(9 * h, 10 * h), (10 * h, 11 * h), (14 * h, 15 * h)]);
        let free = free_windows(&sched, &Span::new(8 * h, 16 * h));
        assert_eq!(
            free,
            vec![Span::new(8 * h, 9 * h), Span::new(11 * h, 14 * h), Span::new(15 * h, 16 * h)]
        );
    }

    #[test]
    fn free_windows_empty_spot() {
        let sched = schedule(&[]);
        let q = Span::new(0, HOUR_MS);
        assert_eq!(free_windows(&sched, &q), vec![q]);
    }

    #[test]
    fn free_windows_fully_booked() {
        let sched = schedule(&[(0, 10 * HOUR_MS)]);
        assert!(free_windows(&sched, &Span::new(HOUR_MS, 2 * HOUR_MS)).is_empty());
    }
}
