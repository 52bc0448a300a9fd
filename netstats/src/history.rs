//! Bucketed counter history
//!
//! The [`Recorder`] is a retention-limited [`Source`]. Deltas are recorded
//! into fixed-duration buckets. A recorded delta spanning several buckets is
//! spread across them in proportion to overlap, with the integer remainder
//! carried forward so that recording loses nothing.
//!
//! Queries are where counts go missing. A bucket only partially covered by
//! the queried range contributes `value * overlap / bucket_duration`,
//! rounded toward zero. Query `[t0, t2)` once and you get the bucket holding
//! `t1` whole; query `[t0, t1)` and `[t1, t2)` and each half is rounded down
//! on its own. Splitting a range can lose counts, never gain them.
//!
//! Buckets that end before `now - retention` are evicted by
//! [`Recorder::trim`]; data there is gone for good.

use std::{
    collections::BTreeMap,
    num::{NonZeroU32, NonZeroU64},
};

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::{
    counters::{CounterSet, Counters, Key, TAG_NONE},
    source::Source,
    template::{Template, Transport},
};

/// Errors produced by [`Recorder`]
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The range ends before it starts.
    #[error("Invalid range: start {start} is after end {end}")]
    InvalidRange {
        /// Range start, milliseconds
        start: i64,
        /// Range end, milliseconds
        end: i64,
    },
}

/// Buckets of a single key, indexed by bucket start time.
#[derive(Debug, Default)]
struct History {
    buckets: BTreeMap<i64, Counters>,
}

impl History {
    fn record(&mut self, bucket_duration: i64, start: i64, end: i64, mut value: Counters) {
        if start == end {
            *self
                .buckets
                .entry(bucket_start(start, bucket_duration))
                .or_default() += value;
            return;
        }

        let mut remaining = end - start;
        let mut cur_start = bucket_start(start, bucket_duration);
        while cur_start < end {
            let cur_end = cur_start + bucket_duration;
            let overlap = cur_end.min(end) - cur_start.max(start);
            let portion = value.scale(overlap, remaining);
            value -= portion;
            remaining -= overlap;
            *self.buckets.entry(cur_start).or_default() += portion;
            cur_start = cur_end;
        }
    }

    fn values(&self, bucket_duration: i64, start: i64, end: i64) -> Counters {
        let mut total = Counters::ZERO;
        for (&cur_start, value) in self.buckets.range(bucket_start(start, bucket_duration)..end) {
            let cur_end = cur_start + bucket_duration;
            let overlap = cur_end.min(end) - cur_start.max(start);
            if overlap <= 0 {
                continue;
            }
            if overlap == bucket_duration {
                total += *value;
            } else {
                total += value.scale(overlap, bucket_duration);
            }
        }
        total
    }

    fn evict_before(&mut self, bucket_duration: i64, cutoff: i64) {
        // keep buckets with start + bucket_duration > cutoff
        let first_kept = cutoff.saturating_sub(bucket_duration).saturating_add(1);
        self.buckets = self.buckets.split_off(&first_kept);
    }
}

fn bucket_start(time: i64, bucket_duration: i64) -> i64 {
    time.div_euclid(bucket_duration) * bucket_duration
}

/// Bucketed, retention-limited store of network counters.
#[derive(Debug)]
pub struct Recorder {
    bucket_duration: i64,
    retention: i64,
    transports: FxHashMap<String, Transport>,
    histories: FxHashMap<Key, History>,
    last_snapshot: Option<(i64, CounterSet)>,
}

impl Recorder {
    /// Create a new `Recorder` with buckets of `bucket_duration` milliseconds
    /// keeping roughly `retention` milliseconds of history.
    #[must_use]
    pub fn new(bucket_duration: NonZeroU32, retention: NonZeroU64) -> Self {
        Self {
            bucket_duration: i64::from(bucket_duration.get()),
            retention: i64::try_from(retention.get()).unwrap_or(i64::MAX),
            transports: FxHashMap::default(),
            histories: FxHashMap::default(),
            last_snapshot: None,
        }
    }

    /// Bucket duration in milliseconds.
    #[must_use]
    pub fn bucket_duration(&self) -> i64 {
        self.bucket_duration
    }

    /// Declare the transport of `iface`. Interfaces without a declared
    /// transport are only visible to templates matching every transport.
    pub fn set_transport(&mut self, iface: impl Into<String>, transport: Transport) {
        self.transports.insert(iface.into(), transport);
    }

    /// The declared transport of `iface`.
    #[must_use]
    pub fn transport(&self, iface: &str) -> Option<Transport> {
        self.transports.get(iface).copied()
    }

    /// Record `value` as counted over `[start, end)` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `start > end`.
    pub fn record(
        &mut self,
        key: Key,
        start: i64,
        end: i64,
        value: Counters,
    ) -> Result<(), Error> {
        if start > end {
            return Err(Error::InvalidRange { start, end });
        }
        self.histories
            .entry(key)
            .or_default()
            .record(self.bucket_duration, start, end, value);
        Ok(())
    }

    /// Record the difference between `snapshot`, a since-boot cumulative
    /// reading taken at `now`, and the previous reading.
    ///
    /// The first reading only establishes the baseline. A key whose counters
    /// went backwards, a counter reset, contributes zero for that field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `now` is before the previous
    /// reading. The reading becomes the new baseline regardless.
    pub fn record_snapshot(&mut self, now: i64, snapshot: &CounterSet) -> Result<(), Error> {
        let Some((previous, baseline)) = self.last_snapshot.replace((now, snapshot.clone())) else {
            debug!(now, entries = snapshot.len(), "recorded baseline snapshot");
            return Ok(());
        };
        if now < previous {
            return Err(Error::InvalidRange {
                start: previous,
                end: now,
            });
        }

        let delta = snapshot - &baseline;
        for (key, value) in delta.iter() {
            if value.any_negative() {
                warn!(
                    iface = %key.iface,
                    uid = key.uid,
                    ?value,
                    "counters went backwards, clamping delta"
                );
            }
            let value = value.clamp_negative();
            if value.is_zero() {
                continue;
            }
            self.record(key.clone(), previous, now, value)?;
        }
        Ok(())
    }

    /// Evict buckets ending before `now - retention`.
    pub fn trim(&mut self, now: i64) {
        let cutoff = now.saturating_sub(self.retention);
        let bucket_duration = self.bucket_duration;
        for history in self.histories.values_mut() {
            history.evict_before(bucket_duration, cutoff);
        }
        self.histories.retain(|_, history| !history.buckets.is_empty());
    }
}

impl Source for Recorder {
    type Error = Error;

    fn query(
        &mut self,
        template: &Template,
        include_tags: bool,
        start: i64,
        end: i64,
    ) -> Result<CounterSet, Error> {
        if start > end {
            return Err(Error::InvalidRange { start, end });
        }

        let mut ret = CounterSet::new();
        for (key, history) in &self.histories {
            if !include_tags && key.tag != TAG_NONE {
                continue;
            }
            if !template.matches(key, self.transports.get(&key.iface).copied()) {
                continue;
            }
            let value = history.values(self.bucket_duration, start, end);
            if !value.is_zero() {
                ret.combine(key.clone(), value);
            }
        }
        Ok(ret)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::template::MatchRule;
    use proptest::prelude::*;

    const BUCKET: u32 = 1_000;

    fn recorder() -> Recorder {
        let mut recorder = Recorder::new(
            NonZeroU32::new(BUCKET).expect("non-zero"),
            NonZeroU64::new(3_600_000).expect("non-zero"),
        );
        recorder.set_transport("wlan0", Transport::Wifi);
        recorder.set_transport("rmnet0", Transport::Mobile);
        recorder
    }

    fn rx(bytes: i64) -> Counters {
        Counters::new(bytes, 0, 0, 0)
    }

    fn query_rx(recorder: &mut Recorder, start: i64, end: i64) -> i64 {
        recorder
            .query(&Template::default(), true, start, end)
            .expect("valid range")
            .total()
            .rx_bytes
    }

    #[test]
    fn recording_spreads_across_buckets_without_loss() {
        let mut recorder = recorder();
        // 2500ms over three buckets: 500 + 1000 + 1000
        recorder
            .record(Key::new("wlan0", 1), 500, 3_000, rx(1_001))
            .expect("valid range");

        assert_eq!(query_rx(&mut recorder, 0, 1_000), 200);
        assert_eq!(query_rx(&mut recorder, 1_000, 2_000), 400);
        assert_eq!(query_rx(&mut recorder, 2_000, 3_000), 401);
        assert_eq!(query_rx(&mut recorder, 0, 3_000), 1_001);
    }

    #[test]
    fn partial_bucket_is_interpolated_rounding_down() {
        let mut recorder = recorder();
        recorder
            .record(Key::new("wlan0", 1), 0, 1_000, rx(999))
            .expect("valid range");

        assert_eq!(query_rx(&mut recorder, 0, 500), 499);
        assert_eq!(query_rx(&mut recorder, 500, 1_000), 499);
        assert_eq!(query_rx(&mut recorder, 0, 1_000), 999);
        assert_eq!(query_rx(&mut recorder, 0, 5_000), 999);
    }

    #[test]
    fn instant_record_lands_in_containing_bucket() {
        let mut recorder = recorder();
        recorder
            .record(Key::new("wlan0", 1), 1_500, 1_500, rx(10))
            .expect("valid range");
        assert_eq!(query_rx(&mut recorder, 1_000, 2_000), 10);
        assert_eq!(query_rx(&mut recorder, 0, 1_000), 0);
    }

    #[test]
    fn invalid_range_is_an_error() {
        let mut recorder = recorder();
        assert_eq!(
            recorder.query(&Template::default(), true, 10, 5),
            Err(Error::InvalidRange { start: 10, end: 5 })
        );
        assert!(recorder.record(Key::new("wlan0", 1), 10, 5, rx(1)).is_err());
    }

    #[test]
    fn template_and_tags_filter_entries() {
        let mut recorder = recorder();
        recorder
            .record(Key::new("wlan0", 1), 0, 1_000, rx(10))
            .expect("valid range");
        recorder
            .record(Key::new("wlan0", 1).with_tag(7), 0, 1_000, rx(4))
            .expect("valid range");
        recorder
            .record(Key::new("rmnet0", 1), 0, 1_000, rx(20))
            .expect("valid range");
        recorder
            .record(Key::new("tun0", 1), 0, 1_000, rx(40))
            .expect("valid range");

        let wifi = recorder
            .query(&Template::wifi(), false, 0, 1_000)
            .expect("valid range");
        assert_eq!(wifi.total().rx_bytes, 10);

        let wifi_tagged = recorder
            .query(&Template::wifi(), true, 0, 1_000)
            .expect("valid range");
        assert_eq!(wifi_tagged.len(), 2);

        let mobile = recorder
            .query(&Template::new(MatchRule::Mobile), false, 0, 1_000)
            .expect("valid range");
        assert_eq!(mobile.total().rx_bytes, 20);

        let all = recorder
            .query(&Template::default(), false, 0, 1_000)
            .expect("valid range");
        assert_eq!(all.total().rx_bytes, 70);
    }

    #[test]
    fn snapshots_record_deltas_and_clamp_resets() {
        let mut recorder = recorder();
        let key = Key::new("wlan0", -1);
        let at = |bytes: i64| -> CounterSet { [(key.clone(), rx(bytes))].into_iter().collect() };

        recorder.record_snapshot(0, &at(5_000)).expect("ordered");
        assert_eq!(query_rx(&mut recorder, 0, 10_000), 0, "baseline only");

        recorder.record_snapshot(1_000, &at(5_300)).expect("ordered");
        assert_eq!(query_rx(&mut recorder, 0, 10_000), 300);

        // counter reset: interface went away and came back
        recorder.record_snapshot(2_000, &at(100)).expect("ordered");
        assert_eq!(query_rx(&mut recorder, 0, 10_000), 300);

        recorder.record_snapshot(3_000, &at(150)).expect("ordered");
        assert_eq!(query_rx(&mut recorder, 0, 10_000), 350);

        assert!(recorder.record_snapshot(2_500, &at(200)).is_err());
    }

    #[test]
    fn trim_evicts_buckets_behind_retention() {
        let mut recorder = Recorder::new(
            NonZeroU32::new(BUCKET).expect("non-zero"),
            NonZeroU64::new(2_000).expect("non-zero"),
        );
        recorder
            .record(Key::new("wlan0", 1), 0, 4_000, rx(400))
            .expect("valid range");

        recorder.trim(4_000);
        // cutoff 2000: buckets [0,1000) and [1000,2000) are gone
        assert_eq!(query_rx(&mut recorder, 0, 4_000), 200);

        recorder.trim(100_000);
        assert!(recorder.histories.is_empty());
    }

    #[test]
    fn trim_with_unbounded_retention_keeps_everything() {
        let mut recorder = Recorder::new(
            NonZeroU32::new(BUCKET).expect("non-zero"),
            NonZeroU64::new(u64::MAX).expect("non-zero"),
        );
        recorder
            .record(Key::new("wlan0", 1), 0, 500, rx(10))
            .expect("valid range");

        recorder.trim(500);
        assert_eq!(query_rx(&mut recorder, 0, 1_000), 10);
        recorder.trim(i64::MAX);
        assert_eq!(query_rx(&mut recorder, 0, 1_000), 10);
    }

    proptest! {
        #[test]
        fn splitting_a_query_never_gains(
            records in prop::collection::vec((0i64..20_000, 0i64..5_000, 0i64..1_000_000), 1..20),
            a in 0i64..30_000,
            b in 0i64..30_000,
            c in 0i64..30_000,
        ) {
            let mut recorder = recorder();
            for (start, len, bytes) in records {
                recorder.record(Key::new("wlan0", 1), start, start + len, rx(bytes)).expect("valid range");
            }
            let mut points = [a, b, c];
            points.sort_unstable();
            let [t0, t1, t2] = points;

            let whole = query_rx(&mut recorder, t0, t2);
            let split = query_rx(&mut recorder, t0, t1) + query_rx(&mut recorder, t1, t2);
            prop_assert!(split <= whole, "split {split} exceeded whole {whole}");
        }

        #[test]
        fn recording_is_lossless(
            records in prop::collection::vec((0i64..20_000, 0i64..5_000, 0i64..1_000_000), 1..20),
        ) {
            let mut recorder = recorder();
            let mut expected = 0;
            for (start, len, bytes) in records {
                expected += bytes;
                recorder.record(Key::new("wlan0", 1), start, start + len, rx(bytes)).expect("valid range");
            }
            prop_assert_eq!(query_rx(&mut recorder, 0, 26_000), expected);
        }
    }
}
