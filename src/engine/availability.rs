use chrono::NaiveDate;

use crate::model::*;

// ── Overlap check ────────────────────────────────────────────────

/// Inclusive on both ends: a rental ending on day D conflicts with one
/// starting on day D.
pub fn overlaps(a: &Interval, b: &Interval) -> bool {
    a.overlaps(b)
}

/// True iff `candidate` overlaps none of `existing`. Stops at the first
/// conflict; `existing` may be in any order.
pub fn is_available<'a>(
    existing: impl IntoIterator<Item = &'a Interval>,
    candidate: &Interval,
) -> bool {
    existing.into_iter().all(|booked| !overlaps(booked, candidate))
}

/// Every reservation that blocks `candidate`, in the car's append order.
pub fn conflicts(existing: &[Reservation], candidate: &Interval) -> Vec<Reservation> {
    existing
        .iter()
        .filter(|r| overlaps(&r.interval, candidate))
        .cloned()
        .collect()
}

// ── Calendar view ────────────────────────────────────────────────

/// Whether any reservation covers `date`, endpoints included. Agrees with
/// `is_available`: a booking containing a taken date is always rejected.
pub fn is_date_taken<'a>(existing: impl IntoIterator<Item = &'a Interval>, date: NaiveDate) -> bool {
    existing.into_iter().any(|booked| booked.contains_date(date))
}

/// Merge day runs sorted by `first` whose days overlap or touch.
pub fn merge_day_spans(sorted: &[DateSpan]) -> Vec<DateSpan> {
    let mut merged: Vec<DateSpan> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && last.last.succ_opt().is_none_or(|next| span.first <= next) {
                last.last = last.last.max(span.last);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// Maximal runs of untaken days inside `window` (inclusive), ascending.
pub fn free_windows<'a>(
    existing: impl IntoIterator<Item = &'a Interval>,
    window: DateSpan,
) -> Vec<DateSpan> {
    let mut taken: Vec<DateSpan> = existing
        .into_iter()
        .filter(|booked| booked.from_date() <= window.last && booked.to_date() >= window.first)
        .map(|booked| {
            DateSpan::new(
                booked.from_date().max(window.first),
                booked.to_date().min(window.last),
            )
        })
        .collect();
    taken.sort_by_key(|s| s.first);
    let taken = merge_day_spans(&taken);

    let mut free = Vec::new();
    let mut cursor = Some(window.first);
    for span in &taken {
        let Some(start) = cursor else { break };
        if span.first > start
            && let Some(end) = span.first.pred_opt() {
                free.push(DateSpan::new(start, end));
            }
        cursor = span.last.succ_opt();
    }
    if let Some(start) = cursor
        && start <= window.last {
            free.push(DateSpan::new(start, window.last));
        }
    free
}
