// Copyright (c) 2024 Botho Foundation

use async_trait::async_trait;
use lmdb::{Cursor, Database, DatabaseFlags, Environment, EnvironmentFlags, Transaction, WriteFlags};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use super::{merge_documents, DocumentStore, StoreError};

impl From<lmdb::Error> for StoreError {
    fn from(e: lmdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// LMDB-backed document store.
///
/// All collections share one database; keys are `collection/id` and values
/// are compact JSON.
pub struct LmdbStore {
    env: Environment,
    documents_db: Database,
}

fn document_key(collection: &str, id: &str) -> String {
    format!("{collection}/{id}")
}

impl LmdbStore {
    /// Open or create a store in `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(path).map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let env = Environment::new()
            .set_flags(EnvironmentFlags::NO_SUB_DIR)
            .set_max_dbs(1)
            .set_map_size(256 * 1024 * 1024)
            .open(path.join("documents.mdb").as_ref())?;
        let documents_db = env.create_db(Some("documents"), DatabaseFlags::empty())?;

        info!(path = %path.display(), "opened document store");
        Ok(Self { env, documents_db })
    }

    fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let txn = self.env.begin_ro_txn()?;
        match txn.get(self.documents_db, &key) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, document: Value, merge: bool) -> Result<(), StoreError> {
        let mut txn = self.env.begin_rw_txn()?;
        let existing = match txn.get(self.documents_db, &key) {
            Ok(bytes) => Some(serde_json::from_slice(bytes)?),
            Err(lmdb::Error::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        let bytes = serde_json::to_vec(&merge_documents(existing, document, merge))?;
        txn.put(self.documents_db, &key, &bytes, WriteFlags::empty())?;
        txn.commit()?;
        debug!(%key, len = bytes.len(), "stored document");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut txn = self.env.begin_rw_txn()?;
        match txn.del(self.documents_db, &key, None) {
            Ok(()) | Err(lmdb::Error::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        txn.commit()?;
        Ok(())
    }

    fn scan(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let prefix = document_key(collection, "");
        let txn = self.env.begin_ro_txn()?;
        let mut cursor = txn.open_ro_cursor(self.documents_db)?;
        let mut documents = Vec::new();

        for result in cursor.iter_from(prefix.as_bytes()) {
            let (key, value) = result?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            documents.push(serde_json::from_slice(value)?);
        }
        Ok(documents)
    }
}

#[async_trait]
impl DocumentStore for LmdbStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        self.read(&document_key(collection, id))
    }

    async fn put(
        &self,
        collection: &str,
        id: &str,
        document: Value,
        merge: bool,
    ) -> Result<(), StoreError> {
        self.write(&document_key(collection, id), document, merge)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.remove(&document_key(collection, id))
    }

    async fn list_all(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        self.scan(collection)
    }
}
