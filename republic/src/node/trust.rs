// Copyright (c) 2024 Botho Foundation

use parking_lot::RwLock;
use rp_chain::normalize_user_id;
use std::collections::BTreeSet;

use crate::storage::TrustDocument;

/// Senders whose value is accepted automatically.
///
/// An empty set trusts everyone.
#[derive(Debug, Default)]
pub struct TrustLines {
    lines: RwLock<BTreeSet<String>>,
}

impl TrustLines {
    pub fn from_document(doc: TrustDocument) -> Self {
        Self {
            lines: RwLock::new(doc.lines.iter().map(|l| normalize_user_id(l)).collect()),
        }
    }

    pub fn is_trusted(&self, user_id: &str) -> bool {
        let lines = self.lines.read();
        lines.is_empty() || lines.contains(&normalize_user_id(user_id))
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.read().iter().cloned().collect()
    }

    /// The document that would result from adding or removing `user_id`.
    pub fn document_with(&self, user_id: &str, trusted: bool) -> TrustDocument {
        let mut lines = self.lines.read().clone();
        let user_id = normalize_user_id(user_id);
        if trusted {
            lines.insert(user_id);
        } else {
            lines.remove(&user_id);
        }
        TrustDocument {
            lines: lines.into_iter().collect(),
        }
    }

    pub fn replace(&self, doc: &TrustDocument) {
        *self.lines.write() = doc.lines.iter().cloned().collect();
    }
}
