//! Market alias translation.
//!
//! Exchanges name markets their own way (`XBT/USD`, `btcusdt`). A
//! [`Translator`] maps a native name to the alias downstream consumers
//! expect; names without an alias are used unchanged.

use std::collections::HashMap;

/// Native market name to alias lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Translator {
    aliases: HashMap<String, String>,
}

impl Translator {
    /// Create a translator from an alias map.
    #[must_use]
    pub const fn new(aliases: HashMap<String, String>) -> Self {
        Self { aliases }
    }

    /// Alias for `market`, or `market` itself when none is configured.
    #[must_use]
    pub fn translate<'a>(&'a self, market: &'a str) -> &'a str {
        self.aliases.get(market).map_or(market, String::as_str)
    }

    /// Number of configured aliases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    /// Whether no aliases are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Translator {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(native, alias)| (native.into(), alias.into()))
                .collect(),
        )
    }
}
