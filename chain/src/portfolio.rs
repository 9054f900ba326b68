// Copyright (c) 2024 Botho Foundation

//! Read-only view of the foreign assets a user holds.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::ledger::AccountState;

/// Balances of other issuers' assets held by `owner`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    owner: String,
    assets: BTreeMap<String, i64>,
}

impl Portfolio {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            assets: BTreeMap::new(),
        }
    }

    /// Portfolio derived from a chain's state.
    pub fn from_state(owner: impl Into<String>, state: &AccountState) -> Self {
        Self {
            owner: owner.into(),
            assets: state.assets.clone(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn balance(&self, issuer: &str) -> i64 {
        self.assets.get(issuer).copied().unwrap_or(0)
    }

    pub fn summary(&self) -> &BTreeMap<String, i64> {
        &self.assets
    }

    /// Overwrite holdings with balances reported by issuers.
    ///
    /// Zero reports are ignored, so a silent issuer never erases a holding.
    pub fn sync<I, S>(&mut self, reports: I)
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        for (issuer, balance) in reports {
            if balance != 0 {
                self.assets.insert(issuer.into(), balance);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_state_and_sync() {
        let mut state = AccountState::default();
        state.assets.insert("carol".to_string(), 12);

        let mut portfolio = Portfolio::from_state("alice", &state);
        assert_eq!(portfolio.owner(), "alice");
        assert_eq!(portfolio.balance("carol"), 12);
        assert_eq!(portfolio.balance("dave"), 0);

        portfolio.sync([("carol", 0), ("dave", 7)]);
        assert_eq!(portfolio.balance("carol"), 12);
        assert_eq!(portfolio.balance("dave"), 7);
        assert_eq!(portfolio.summary().len(), 2);
    }
}
