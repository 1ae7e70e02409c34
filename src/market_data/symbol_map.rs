//! Symbol translation between the canonical pairs and venue-native symbols

use crate::exchanges::types::{CanonicalSymbol, Venue};
use dashmap::DashMap;

/// Translation table from canonical `BASE/QUOTE` pairs to each venue's
/// native symbol, kept separately for WebSocket subscriptions and REST
/// requests (Kraken spells the two differently).
///
/// Entries are restricted to the pairs a venue actually supports; a miss
/// means the adapter must not be instantiated for that pair.
pub struct SymbolMap {
    ws: DashMap<(CanonicalSymbol, Venue), &'static str>,
    rest: DashMap<(CanonicalSymbol, Venue), &'static str>,
}

impl SymbolMap {
    pub fn new() -> Self {
        let map = Self {
            ws: DashMap::new(),
            rest: DashMap::new(),
        };
        map.preload_mappings();
        map
    }

    fn preload_mappings(&self) {
        use CanonicalSymbol::*;
        use Venue::*;

        self.add(BtcUsdt, Binance, "BTCUSDT", "BTCUSDT");
        self.add(BtcUsdt, Okx, "BTC-USDT", "BTC-USDT");
        self.add(BtcUsdt, Bitget, "BTCUSDT", "BTCUSDT");

        self.add(BtcUsd, Coinbase, "BTC-USD", "BTC-USD");
        self.add(BtcUsd, Bitstamp, "btcusd", "btcusd");
        self.add(BtcUsd, Kraken, "XBT/USD", "XXBTZUSD");

        self.add(BtcEur, Kraken, "XBT/EUR", "XXBTZEUR");
        self.add(BtcEur, Bitvavo, "BTC-EUR", "BTC-EUR");
    }

    fn add(&self, symbol: CanonicalSymbol, venue: Venue, ws: &'static str, rest: &'static str) {
        self.ws.insert((symbol, venue), ws);
        self.rest.insert((symbol, venue), rest);
    }

    /// Native symbol used in WebSocket subscriptions.
    pub fn ws_symbol(&self, symbol: CanonicalSymbol, venue: Venue) -> Option<&'static str> {
        self.ws.get(&(symbol, venue)).map(|entry| *entry)
    }

    /// Native symbol used in REST requests.
    pub fn rest_symbol(&self, symbol: CanonicalSymbol, venue: Venue) -> Option<&'static str> {
        self.rest.get(&(symbol, venue)).map(|entry| *entry)
    }

    pub fn supports(&self, symbol: CanonicalSymbol, venue: Venue) -> bool {
        self.ws.contains_key(&(symbol, venue))
    }
}

impl Default for SymbolMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CanonicalSymbol::*;
    use Venue::*;

    #[test]
    fn test_supported_pairs_resolve() {
        let map = SymbolMap::new();
        assert_eq!(map.ws_symbol(BtcUsdt, Binance), Some("BTCUSDT"));
        assert_eq!(map.ws_symbol(BtcUsdt, Okx), Some("BTC-USDT"));
        assert_eq!(map.ws_symbol(BtcUsd, Bitstamp), Some("btcusd"));
        assert_eq!(map.ws_symbol(BtcEur, Bitvavo), Some("BTC-EUR"));
    }

    #[test]
    fn test_kraken_ws_and_rest_differ() {
        let map = SymbolMap::new();
        assert_eq!(map.ws_symbol(BtcUsd, Kraken), Some("XBT/USD"));
        assert_eq!(map.rest_symbol(BtcUsd, Kraken), Some("XXBTZUSD"));
        assert_eq!(map.ws_symbol(BtcEur, Kraken), Some("XBT/EUR"));
        assert_eq!(map.rest_symbol(BtcEur, Kraken), Some("XXBTZEUR"));
    }

    #[test]
    fn test_unsupported_pairs_yield_nothing() {
        let map = SymbolMap::new();
        assert_eq!(map.ws_symbol(BtcUsd, Binance), None);
        assert_eq!(map.ws_symbol(BtcEur, Coinbase), None);
        assert_eq!(map.ws_symbol(BtcUsdt, Kraken), None);
        assert!(!map.supports(BtcEur, Bitstamp));
    }
}
