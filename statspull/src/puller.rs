//! Pulling atoms
//!
//! The [`Puller`] owns the counter source and one accumulator per slicing.
//! A pull that fails is skipped: the error is logged, counted and the caller
//! moves on to the next cycle. No accumulated state is lost by a skip.

use std::num::NonZeroU32;

use metrics::counter;
use netstats::{Recorder, Registry, Source, history};
use tracing::{debug, error};

use crate::{atom::Atom, atom::Row, netdev};

/// Outcome of a single pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullResult {
    /// The pull produced these rows.
    Success(Vec<Row>),
    /// The pull failed and should be skipped this cycle.
    Skip,
}

/// Pulls atoms out of cumulative accumulators over a counter source.
#[derive(Debug)]
pub struct Puller<S = Recorder> {
    source: S,
    registry: Registry,
    start: i64,
}

impl<S> Puller<S>
where
    S: Source,
{
    /// Create a new `Puller` over `source`. Accumulators start their
    /// snapshots at `start`, in milliseconds.
    #[must_use]
    pub fn new(source: S, bucket_duration: NonZeroU32, start: i64) -> Self {
        Self {
            source,
            registry: Registry::new(bucket_duration),
            start,
        }
    }

    /// The counter source.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Pull `atom` as of `now`, in milliseconds. `now` must not decrease
    /// across calls.
    pub fn pull(&mut self, atom: Atom, now: i64) -> PullResult {
        let accumulator = self
            .registry
            .accumulator(&atom.template(), atom.include_tags(), self.start);
        match accumulator.query_cumulative(now, &mut self.source) {
            Ok(stats) => {
                let rows = atom.rows(&stats);
                debug!(atom = atom.name(), rows = rows.len(), now, "pulled atom");
                counter!("statspull_pulls_total", "atom" => atom.name(), "result" => "success")
                    .increment(1);
                counter!("statspull_rows_total", "atom" => atom.name())
                    .increment(rows.len() as u64);
                PullResult::Success(rows)
            }
            Err(err) => {
                error!(atom = atom.name(), now, "Pulling netstats has error: {err}");
                counter!("statspull_pulls_total", "atom" => atom.name(), "result" => "skip")
                    .increment(1);
                PullResult::Skip
            }
        }
    }
}

impl Puller<Recorder> {
    /// Feed a reading of the interface counters taken at `now` into the
    /// recorder and evict history beyond retention.
    ///
    /// # Errors
    ///
    /// Returns an error if `now` is before the previous reading.
    pub fn sample(&mut self, now: i64, snapshot: &netdev::Snapshot) -> Result<(), history::Error> {
        for (iface, transport) in &snapshot.transports {
            self.source.set_transport(iface.clone(), *transport);
        }
        self.source.record_snapshot(now, &snapshot.counters)?;
        self.source.trim(now);
        Ok(())
    }
}
