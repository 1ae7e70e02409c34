//! Persisted chart selection
//!
//! Exactly one object is persisted: the last selected symbol and timeframe.
//! Writes go through a sibling `.tmp` file and an atomic rename so a crash
//! mid-write leaves either the previous file or none at all.

use crate::exchanges::types::{CanonicalSymbol, Timeframe};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const STATE_FILE: &str = "state.json";
const TMP_FILE: &str = "state.json.tmp";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSelection {
    last_symbol: String,
    last_timeframe: String,
}

pub struct StateStore {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            path: dir.join(STATE_FILE),
            tmp_path: dir.join(TMP_FILE),
        }
    }

    /// Load the persisted selection. An absent, unreadable or malformed file
    /// reads as no saved state; values outside the supported sets are
    /// discarded individually.
    pub fn load(&self) -> (Option<CanonicalSymbol>, Option<Timeframe>) {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(_) => return (None, None),
        };
        let selection: PersistedSelection = match serde_json::from_slice(&bytes) {
            Ok(selection) => selection,
            Err(_) => return (None, None),
        };
        (
            selection.last_symbol.parse().ok(),
            selection.last_timeframe.parse().ok(),
        )
    }

    /// Persist the selection atomically (tmp write + rename).
    pub fn save(&self, symbol: CanonicalSymbol, timeframe: Timeframe) -> io::Result<()> {
        let selection = PersistedSelection {
            last_symbol: symbol.as_str().to_string(),
            last_timeframe: timeframe.as_str().to_string(),
        };
        let body = serde_json::to_vec(&selection)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        fs::write(&self.tmp_path, body)?;
        fs::rename(&self.tmp_path, &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_absent_file_reads_as_no_state() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert_eq!(store.load(), (None, None));
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .save(CanonicalSymbol::BtcUsd, Timeframe::M5)
            .unwrap();

        // Simulate a crash-and-reopen with a fresh store instance.
        let reopened = StateStore::new(dir.path());
        assert_eq!(
            reopened.load(),
            (Some(CanonicalSymbol::BtcUsd), Some(Timeframe::M5))
        );
        // The tmp file does not linger after a successful save.
        assert!(!dir.path().join(TMP_FILE).exists());
    }

    #[test]
    fn test_malformed_file_reads_as_no_state() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(STATE_FILE), b"{not json").unwrap();
        let store = StateStore::new(dir.path());
        assert_eq!(store.load(), (None, None));
    }

    #[test]
    fn test_invalid_values_are_discarded_individually() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(STATE_FILE),
            br#"{"lastSymbol":"BTC/USD","lastTimeframe":"2m"}"#,
        )
        .unwrap();
        let store = StateStore::new(dir.path());
        assert_eq!(store.load(), (Some(CanonicalSymbol::BtcUsd), None));
    }

    #[test]
    fn test_crash_during_write_keeps_previous_state() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .save(CanonicalSymbol::BtcUsdt, Timeframe::M1)
            .unwrap();

        // A crash after writing the tmp file but before the rename leaves
        // the tmp file behind; the target still holds the previous state.
        fs::write(
            dir.path().join(TMP_FILE),
            br#"{"lastSymbol":"BTC/EUR","lastTimeframe":"1h"}"#,
        )
        .unwrap();
        assert_eq!(
            store.load(),
            (Some(CanonicalSymbol::BtcUsdt), Some(Timeframe::M1))
        );
    }

    #[test]
    fn test_crash_before_first_write_reads_as_no_state() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(TMP_FILE),
            br#"{"lastSymbol":"BTC/EUR","lastTimeframe":"1h"}"#,
        )
        .unwrap();
        let store = StateStore::new(dir.path());
        assert_eq!(store.load(), (None, None));
    }
}
