//! Protocol bookkeeping: SKDM recipients, LID/PN mappings, base keys,
//! device lists, and forget-sender-key marks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use wacore::store::error::{db_err, StoreError};
use wacore::store::traits::{DeviceListRecord, LidPnMappingEntry, ProtocolStore};

use super::{key_string, pair_key, SessionStore};

type Result<T> = wacore::store::error::Result<T>;

const LID: &str = "lid";
const PN: &str = "pn";
const BASE_KEY: &str = "base_key";
const DEVICE_LIST: &str = "device_list";

fn skdm_scope(group_jid: &str) -> String {
    format!("skdm:{group_jid}")
}

fn forget_scope(group_jid: &str) -> String {
    format!("forget:{group_jid}")
}

/// Stored form of a LID/PN mapping, indexed under both ids.
#[derive(Serialize, Deserialize)]
struct StoredMapping {
    lid: String,
    phone_number: String,
    created_at: i64,
    updated_at: i64,
    learning_source: String,
}

impl From<&LidPnMappingEntry> for StoredMapping {
    fn from(e: &LidPnMappingEntry) -> Self {
        Self {
            lid: e.lid.clone(),
            phone_number: e.phone_number.clone(),
            created_at: e.created_at,
            updated_at: e.updated_at,
            learning_source: e.learning_source.clone(),
        }
    }
}

impl From<StoredMapping> for LidPnMappingEntry {
    fn from(m: StoredMapping) -> Self {
        Self {
            lid: m.lid,
            phone_number: m.phone_number,
            created_at: m.created_at,
            updated_at: m.updated_at,
            learning_source: m.learning_source,
        }
    }
}

fn decode_mapping(data: &[u8]) -> Result<LidPnMappingEntry> {
    serde_json::from_slice::<StoredMapping>(data)
        .map(Into::into)
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait]
impl ProtocolStore for SessionStore {
    async fn get_skdm_recipients(&self, group_jid: &str) -> Result<Vec<String>> {
        let rows = self.entries(&skdm_scope(group_jid)).await.map_err(db_err)?;
        Ok(rows.into_iter().filter_map(|(k, _)| key_string(k)).collect())
    }

    async fn add_skdm_recipients(&self, group_jid: &str, device_jids: &[String]) -> Result<()> {
        let entries: Vec<(&[u8], &[u8])> = device_jids
            .iter()
            .map(|d| (d.as_bytes(), &[][..]))
            .collect();
        self.put_many(&skdm_scope(group_jid), &entries)
            .await
            .map_err(db_err)
    }

    async fn clear_skdm_recipients(&self, group_jid: &str) -> Result<()> {
        self.clear_scope(&skdm_scope(group_jid))
            .await
            .map_err(db_err)
    }

    async fn get_lid_mapping(&self, lid: &str) -> Result<Option<LidPnMappingEntry>> {
        match self.get(LID, lid.as_bytes()).await.map_err(db_err)? {
            Some(data) => decode_mapping(&data).map(Some),
            None => Ok(None),
        }
    }

    async fn get_pn_mapping(&self, phone: &str) -> Result<Option<LidPnMappingEntry>> {
        match self.get(PN, phone.as_bytes()).await.map_err(db_err)? {
            Some(data) => decode_mapping(&data).map(Some),
            None => Ok(None),
        }
    }

    async fn put_lid_mapping(&self, entry: &LidPnMappingEntry) -> Result<()> {
        let data = serde_json::to_vec(&StoredMapping::from(entry))
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.put(LID, entry.lid.as_bytes(), &data)
            .await
            .map_err(db_err)?;
        self.put(PN, entry.phone_number.as_bytes(), &data)
            .await
            .map_err(db_err)
    }

    async fn get_all_lid_mappings(&self) -> Result<Vec<LidPnMappingEntry>> {
        self.entries(LID)
            .await
            .map_err(db_err)?
            .iter()
            .map(|(_, data)| decode_mapping(data))
            .collect()
    }

    async fn save_base_key(&self, address: &str, message_id: &str, base_key: &[u8]) -> Result<()> {
        self.put(BASE_KEY, &pair_key(address, message_id), base_key)
            .await
            .map_err(db_err)
    }

    async fn has_same_base_key(
        &self,
        address: &str,
        message_id: &str,
        current_base_key: &[u8],
    ) -> Result<bool> {
        let stored = self
            .get(BASE_KEY, &pair_key(address, message_id))
            .await
            .map_err(db_err)?;
        Ok(stored.is_some_and(|k| k == current_base_key))
    }

    async fn delete_base_key(&self, address: &str, message_id: &str) -> Result<()> {
        self.remove(BASE_KEY, &pair_key(address, message_id))
            .await
            .map_err(db_err)
    }

    async fn update_device_list(&self, record: DeviceListRecord) -> Result<()> {
        let data =
            serde_json::to_vec(&record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.put(DEVICE_LIST, record.user.as_bytes(), &data)
            .await
            .map_err(db_err)
    }

    async fn get_devices(&self, user: &str) -> Result<Option<DeviceListRecord>> {
        let Some(data) = self.get(DEVICE_LIST, user.as_bytes()).await.map_err(db_err)? else {
            return Ok(None);
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn mark_forget_sender_key(&self, group_jid: &str, participant: &str) -> Result<()> {
        self.put(&forget_scope(group_jid), participant.as_bytes(), &[])
            .await
            .map_err(db_err)
    }

    async fn consume_forget_marks(&self, group_jid: &str) -> Result<Vec<String>> {
        let keys = self
            .take_keys(&forget_scope(group_jid))
            .await
            .map_err(db_err)?;
        Ok(keys.into_iter().filter_map(key_string).collect())
    }
}
