//! Cumulative network statistics
//!
//! This library answers "how many bytes and packets since boot" for a
//! network template without keeping the whole history in memory. The counter
//! source it reads from is bucketed, retention limited and interpolates
//! partial buckets with integer arithmetic. The [`accumulator::Accumulator`]
//! folds finalized ranges of that source into a long-lived snapshot and
//! corrects for the counts lost when a query range is split.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::module_name_repetitions)]

pub mod accumulator;
pub mod counters;
pub mod history;
pub mod registry;
pub mod source;
pub mod template;

pub use accumulator::Accumulator;
pub use counters::{CounterSet, Counters, Key, Set, Tristate};
pub use history::Recorder;
pub use registry::Registry;
pub use source::{Source, source_fn};
pub use template::{MatchRule, Template, Transport};
