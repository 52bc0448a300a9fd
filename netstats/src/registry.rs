//! Accumulators keyed by slicing
//!
//! A process keeps one [`Accumulator`] per template and tag slicing for its
//! whole life. The [`Registry`] hands out the existing one when the slicing
//! matches and creates a fresh one otherwise.

use std::num::NonZeroU32;

use tracing::info;

use crate::{accumulator::Accumulator, template::Template};

/// A collection of [`Accumulator`]s, at most one per slicing.
#[derive(Debug)]
pub struct Registry {
    bucket_duration: NonZeroU32,
    accumulators: Vec<Accumulator>,
}

impl Registry {
    /// Create a new, empty `Registry`. Accumulators it creates use
    /// `bucket_duration`, in milliseconds.
    #[must_use]
    pub fn new(bucket_duration: NonZeroU32) -> Self {
        Self {
            bucket_duration,
            accumulators: Vec::new(),
        }
    }

    /// The accumulator for `template` and `include_tags`. If none exists one
    /// is created with its snapshot ending at `start`.
    pub fn accumulator(
        &mut self,
        template: &Template,
        include_tags: bool,
        start: i64,
    ) -> &mut Accumulator {
        let idx = if let Some(idx) = self
            .accumulators
            .iter()
            .position(|acc| acc.has_same_slicing(template, include_tags))
        {
            idx
        } else {
            info!(?template, include_tags, start, "creating accumulator");
            self.accumulators.push(Accumulator::new(
                *template,
                include_tags,
                self.bucket_duration,
                start,
            ));
            self.accumulators.len() - 1
        };
        &mut self.accumulators[idx]
    }

    /// Number of accumulators held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accumulators.len()
    }

    /// Whether no accumulator has been created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accumulators.is_empty()
    }
}
