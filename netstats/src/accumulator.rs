//! Cumulative accumulation over a bucketed counter source
//!
//! Callers want network counters "since boot". The [`Source`] can only answer
//! for a retention-limited window and rounds partially covered buckets down,
//! so asking it for `[0, now)` on every pull is both expensive and, once the
//! retention horizon passes, wrong. The [`Accumulator`] keeps a snapshot of
//! everything up to a watermark and only asks the source about what came
//! after.
//!
//! # Semantics
//!
//! An [`Accumulator`] holds a snapshot `S` covering `[0, E)`, where `E` is the
//! snapshot end. Let `B` be the bucket duration and `Q(a, b)` the source
//! query over `[a, b)`. A call at time `N` does:
//!
//! * Answer: `A = S + Q(E, N + B)`. The end is padded by a bucket so the
//!   bucket still in progress is counted whole. `A` is returned.
//! * Compaction: let `C = N - B`, the latest instant behind a closed bucket.
//!   If `C - E > B`, fold `Q(E, C)` into `S` and move `E` to `C`.
//!
//! Splitting `Q(E, N + B)` at `C` can lose counts: the bucket holding `C` is
//! rounded down on each side. The loss is measured and kept,
//!
//! ```text
//! L = A - (S + Q(E, C) + Q(C, N + B))
//! S' = S + Q(E, C) + L
//! E' = C
//! ```
//!
//! so that `S' + Q(C, N + B) == A`. A later call sees every count `A` saw.
//!
//! As an example with `B = 1000` and a source holding 100 bytes in the
//! bucket `[0, 1000)`:
//!
//! ```text
//!  N=500:  A = {} + Q(0, 1500)              => 100, C=-500 no compaction
//!  N=2500: A = {} + Q(0, 3500)              => 100, C=1500 1500 > 1000
//!          S' = {} + Q(0, 1500) + L         => 100, L = 100 - (100 + 0) = 0
//!          E' = 1500
//! ```
//!
//! `N` must not decrease between calls on one instance. This is not checked.
//! The accumulator is not thread-safe. Callers serialize access to it.
//!
//! # Failure
//!
//! Source errors are returned as-is. The snapshot and its end change only
//! after every query of a call has succeeded, so a failed call leaves the
//! accumulator as it found it.

use std::num::NonZeroU32;

use tracing::{debug, trace};

use crate::{counters::CounterSet, source::Source, template::Template};

/// Rolling cumulative snapshot for one template and tag slicing.
#[derive(Debug, Clone)]
pub struct Accumulator {
    template: Template,
    include_tags: bool,
    bucket_duration: i64,
    snapshot: CounterSet,
    snapshot_end: i64,
}

impl Accumulator {
    /// Create a new `Accumulator` with an empty snapshot ending at `start`.
    ///
    /// `bucket_duration` is in milliseconds and must match the bucket
    /// duration of the sources this accumulator will be queried against.
    #[must_use]
    pub fn new(
        template: Template,
        include_tags: bool,
        bucket_duration: NonZeroU32,
        start: i64,
    ) -> Self {
        Self {
            template,
            include_tags,
            bucket_duration: i64::from(bucket_duration.get()),
            snapshot: CounterSet::new(),
            snapshot_end: start,
        }
    }

    /// The template this accumulator filters by.
    #[must_use]
    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Whether tagged entries are included.
    #[must_use]
    pub fn include_tags(&self) -> bool {
        self.include_tags
    }

    /// Bucket duration in milliseconds.
    #[must_use]
    pub fn bucket_duration(&self) -> i64 {
        self.bucket_duration
    }

    /// End of the range covered by the snapshot, milliseconds.
    #[must_use]
    pub fn snapshot_end(&self) -> i64 {
        self.snapshot_end
    }

    /// Whether this accumulator answers for `template` and `include_tags`.
    #[must_use]
    pub fn has_same_slicing(&self, template: &Template, include_tags: bool) -> bool {
        self.template == *template && self.include_tags == include_tags
    }

    /// Cumulative counters for `[0, now)`.
    ///
    /// May advance the snapshot. `now` must be no less than the `now` of any
    /// previous call on this instance.
    ///
    /// # Errors
    ///
    /// Returns any error of `source`. On error the accumulator is unchanged.
    pub fn query_cumulative<S>(&mut self, now: i64, source: &mut S) -> Result<CounterSet, S::Error>
    where
        S: Source + ?Sized,
    {
        let padded_end = now.saturating_add(self.bucket_duration);
        let recent = source.query(
            &self.template,
            self.include_tags,
            self.snapshot_end,
            padded_end,
        )?;
        let answer = &self.snapshot + &recent;

        self.maybe_compact(now, &answer, source)?;
        Ok(answer)
    }

    fn maybe_compact<S>(
        &mut self,
        now: i64,
        answer: &CounterSet,
        source: &mut S,
    ) -> Result<(), S::Error>
    where
        S: Source + ?Sized,
    {
        let boundary = now.saturating_sub(self.bucket_duration);
        if boundary.saturating_sub(self.snapshot_end) <= self.bucket_duration {
            return Ok(());
        }

        let delta = source.query(
            &self.template,
            self.include_tags,
            self.snapshot_end,
            boundary,
        )?;
        let snapshot = &self.snapshot + &delta;

        let remainder = source.query(
            &self.template,
            self.include_tags,
            boundary,
            now.saturating_add(self.bucket_duration),
        )?;
        let loss = answer - &(&snapshot + &remainder);
        if loss.iter().any(|(_, value)| !value.is_zero()) {
            trace!(?loss, boundary, "correcting interpolation loss after compaction");
        }

        debug!(
            previous_end = self.snapshot_end,
            snapshot_end = boundary,
            entries = snapshot.len(),
            "compacted snapshot"
        );
        self.snapshot = &snapshot + &loss;
        self.snapshot_end = boundary;
        Ok(())
    }
}
