//! App-state sync keys, collection versions, and mutation MACs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use wacore::appstate::hash::HashState;
use wacore::appstate::processor::AppStateMutationMAC;
use wacore::store::error::{db_err, StoreError};
use wacore::store::traits::{AppStateSyncKey, AppSyncStore};

use super::SessionStore;

type Result<T> = wacore::store::error::Result<T>;

const SYNC_KEY: &str = "sync_key";
const APP_VERSION: &str = "app_version";

fn mac_scope(collection: &str) -> String {
    format!("mutation_mac:{collection}")
}

#[derive(Serialize, Deserialize)]
struct StoredSyncKey {
    key_data: Vec<u8>,
    timestamp: i64,
    fingerprint: Vec<u8>,
}

#[async_trait]
impl AppSyncStore for SessionStore {
    async fn get_sync_key(&self, key_id: &[u8]) -> Result<Option<AppStateSyncKey>> {
        let Some(data) = self.get(SYNC_KEY, key_id).await.map_err(db_err)? else {
            return Ok(None);
        };
        let stored: StoredSyncKey =
            serde_json::from_slice(&data).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Some(AppStateSyncKey {
            key_data: stored.key_data,
            timestamp: stored.timestamp,
            fingerprint: stored.fingerprint,
        }))
    }

    async fn set_sync_key(&self, key_id: &[u8], key: AppStateSyncKey) -> Result<()> {
        let stored = StoredSyncKey {
            key_data: key.key_data,
            timestamp: key.timestamp,
            fingerprint: key.fingerprint,
        };
        let data =
            serde_json::to_vec(&stored).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.put(SYNC_KEY, key_id, &data).await.map_err(db_err)
    }

    async fn get_version(&self, name: &str) -> Result<HashState> {
        match self.get(APP_VERSION, name.as_bytes()).await.map_err(db_err)? {
            Some(data) => serde_json::from_slice(&data)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            None => Ok(HashState::default()),
        }
    }

    async fn set_version(&self, name: &str, state: HashState) -> Result<()> {
        let data =
            serde_json::to_vec(&state).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.put(APP_VERSION, name.as_bytes(), &data)
            .await
            .map_err(db_err)
    }

    async fn put_mutation_macs(
        &self,
        name: &str,
        _version: u64,
        mutations: &[AppStateMutationMAC],
    ) -> Result<()> {
        let entries: Vec<(&[u8], &[u8])> = mutations
            .iter()
            .map(|m| (m.index_mac.as_slice(), m.value_mac.as_slice()))
            .collect();
        self.put_many(&mac_scope(name), &entries)
            .await
            .map_err(db_err)
    }

    async fn get_mutation_mac(&self, name: &str, index_mac: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get(&mac_scope(name), index_mac).await.map_err(db_err)
    }

    async fn delete_mutation_macs(&self, name: &str, index_macs: &[Vec<u8>]) -> Result<()> {
        let keys: Vec<&[u8]> = index_macs.iter().map(Vec::as_slice).collect();
        self.remove_many(&mac_scope(name), &keys)
            .await
            .map_err(db_err)
    }
}
