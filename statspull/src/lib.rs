//! The statspull pull framework
//!
//! This library wires the [`netstats`] accumulators into a periodic pull
//! loop: network counters are sampled from the kernel into a bucketed
//! recorder, and every pull turns the cumulative totals of each configured
//! atom into rows.

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

pub mod atom;
pub mod clock;
pub mod config;
pub mod netdev;
pub mod output;
pub mod puller;
