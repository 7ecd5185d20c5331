//! Symbol Resolver
//!
//! Process-local identifier to instrument cache in front of the instrument
//! directory. A miss falls through to the directory once and is cached.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::application::ports::{DirectoryError, InstrumentDirectory};
use crate::domain::instrument::{Identifier, PriceObservation, Symbol, TrackedInstrument, Venue};

/// Cached view of identifier metadata.
pub struct SymbolResolver {
    directory: Arc<dyn InstrumentDirectory>,
    known: RwLock<HashMap<Identifier, TrackedInstrument>>,
}

impl SymbolResolver {
    /// Create a resolver with an empty cache.
    #[must_use]
    pub fn new(directory: Arc<dyn InstrumentDirectory>) -> Self {
        Self {
            directory,
            known: RwLock::new(HashMap::new()),
        }
    }

    /// Prime the cache with instruments resolved elsewhere.
    pub fn remember<'a, I>(&self, instruments: I)
    where
        I: IntoIterator<Item = &'a TrackedInstrument>,
    {
        let mut known = self.known.write();
        for instrument in instruments {
            known.insert(instrument.identifier.clone(), instrument.clone());
        }
    }

    /// Cached instrument for `identifier`, without consulting the directory.
    #[must_use]
    pub fn cached(&self, identifier: &Identifier) -> Option<TrackedInstrument> {
        self.known.read().get(identifier).cloned()
    }

    /// Symbol and venue for an observation.
    ///
    /// Uses the symbol carried by the observation if present, then the cache,
    /// then the directory. `Ok(None)` means the identifier is unknown.
    ///
    /// # Errors
    ///
    /// Returns the directory error if the lookup itself fails.
    pub async fn resolve(
        &self,
        observation: &PriceObservation,
    ) -> Result<Option<(Symbol, Option<Venue>)>, DirectoryError> {
        if let Some(symbol) = &observation.symbol {
            return Ok(Some((symbol.clone(), observation.venue.clone())));
        }

        if let Some(instrument) = self.cached(&observation.identifier) {
            let venue = observation.venue.clone().or(instrument.venue);
            return Ok(Some((instrument.symbol, venue)));
        }

        let Some(instrument) = self.directory.resolve(&observation.identifier).await? else {
            return Ok(None);
        };
        self.remember([&instrument]);
        let venue = observation.venue.clone().or(instrument.venue);
        Ok(Some((instrument.symbol, venue)))
    }

    /// Number of cached identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.known.read().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.known.read().is_empty()
    }
}

impl std::fmt::Debug for SymbolResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolResolver")
            .field("cached", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::MockInstrumentDirectory;

    fn observation(id: &str) -> PriceObservation {
        PriceObservation::new(id.into(), None, Decimal::ONE, Utc::now())
    }

    #[tokio::test]
    async fn directory_hit_is_cached() {
        let mut directory = MockInstrumentDirectory::new();
        directory.expect_resolve().times(1).returning(|id| {
            Ok(Some(TrackedInstrument::new(
                id.clone(),
                Some("NSE".into()),
                "INFY-EQ".into(),
            )))
        });

        let resolver = SymbolResolver::new(Arc::new(directory));
        for _ in 0..3 {
            let (symbol, venue) = resolver.resolve(&observation("1594")).await.unwrap().unwrap();
            assert_eq!(symbol.as_str(), "INFY-EQ");
            assert_eq!(venue, Some(Venue::new("NSE")));
        }
        assert_eq!(resolver.len(), 1);
    }

    #[tokio::test]
    async fn observation_symbol_wins() {
        let mut directory = MockInstrumentDirectory::new();
        directory.expect_resolve().never();

        let resolver = SymbolResolver::new(Arc::new(directory));
        let obs = observation("1").with_symbol("X".into());
        let (symbol, _) = resolver.resolve(&obs).await.unwrap().unwrap();
        assert_eq!(symbol.as_str(), "X");
    }

    #[tokio::test]
    async fn unknown_identifier_resolves_to_none() {
        let mut directory = MockInstrumentDirectory::new();
        directory.expect_resolve().returning(|_| Ok(None));

        let resolver = SymbolResolver::new(Arc::new(directory));
        assert!(resolver.resolve(&observation("404")).await.unwrap().is_none());
        assert!(resolver.is_empty());
    }
}
