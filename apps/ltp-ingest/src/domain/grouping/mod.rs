//! Venue Grouper
//!
//! Partitions tracked instruments by venue and splits each venue's
//! identifiers into chunks no larger than the upstream batch limit.
//!
//! Pure and deterministic: venues come out in lexical order and identifiers
//! keep their input order within a venue. Instruments without a venue are
//! never silently dropped; they are reported back as unfetchable.

use std::collections::BTreeMap;

use super::instrument::{Identifier, TrackedInstrument, Venue};

/// Default upstream batch-size limit for a single fetch/subscribe request.
pub const DEFAULT_MAX_BATCH: usize = 50;

/// A single request-sized group of identifiers on one venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueChunk {
    /// Venue shared by every identifier in the chunk.
    pub venue: Venue,
    /// Identifiers, at most `max_batch` of them.
    pub identifiers: Vec<Identifier>,
}

impl VenueChunk {
    /// Number of identifiers in the chunk.
    #[must_use]
    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    /// Whether the chunk is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }
}

/// Result of grouping a set of instruments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VenueGrouping {
    /// Chunks ordered by venue, then by input order.
    pub chunks: Vec<VenueChunk>,
    /// Identifiers excluded from requests because they have no venue.
    pub unfetchable: Vec<Identifier>,
}

impl VenueGrouping {
    /// Whether there is nothing to fetch.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total number of identifiers across all chunks.
    #[must_use]
    pub fn fetchable_count(&self) -> usize {
        self.chunks.iter().map(VenueChunk::len).sum()
    }
}

/// Group instruments by venue into chunks of at most `max_batch` identifiers.
///
/// A `max_batch` of zero is treated as one. Duplicate identifiers on the same
/// venue are collapsed to their first occurrence.
#[must_use]
pub fn group_by_venue<'a, I>(instruments: I, max_batch: usize) -> VenueGrouping
where
    I: IntoIterator<Item = &'a TrackedInstrument>,
{
    let max_batch = max_batch.max(1);
    let mut by_venue: BTreeMap<Venue, Vec<Identifier>> = BTreeMap::new();
    let mut unfetchable = Vec::new();

    for instrument in instruments {
        match &instrument.venue {
            Some(venue) => {
                let ids = by_venue.entry(venue.clone()).or_default();
                if !ids.contains(&instrument.identifier) {
                    ids.push(instrument.identifier.clone());
                }
            }
            None => unfetchable.push(instrument.identifier.clone()),
        }
    }

    let chunks = by_venue
        .into_iter()
        .flat_map(|(venue, ids)| {
            ids.chunks(max_batch)
                .map(|chunk| VenueChunk {
                    venue: venue.clone(),
                    identifiers: chunk.to_vec(),
                })
                .collect::<Vec<_>>()
        })
        .collect();

    VenueGrouping {
        chunks,
        unfetchable,
    }
}
