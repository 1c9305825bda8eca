//! Signal protocol state: identities, sessions, prekeys, sender keys.

use async_trait::async_trait;
use wacore::store::error::db_err;
use wacore::store::traits::SignalStore;

use super::SessionStore;

type Result<T> = wacore::store::error::Result<T>;

const IDENTITY: &str = "identity";
const SESSION: &str = "session";
const PREKEY: &str = "prekey";
const SIGNED_PREKEY: &str = "signed_prekey";
const SENDER_KEY: &str = "sender_key";

fn id_key(id: u32) -> [u8; 4] {
    id.to_be_bytes()
}

#[async_trait]
impl SignalStore for SessionStore {
    async fn put_identity(&self, address: &str, key: [u8; 32]) -> Result<()> {
        self.put(IDENTITY, address.as_bytes(), &key)
            .await
            .map_err(db_err)
    }

    async fn load_identity(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.get(IDENTITY, address.as_bytes()).await.map_err(db_err)
    }

    async fn delete_identity(&self, address: &str) -> Result<()> {
        self.remove(IDENTITY, address.as_bytes())
            .await
            .map_err(db_err)
    }

    async fn get_session(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.get(SESSION, address.as_bytes()).await.map_err(db_err)
    }

    async fn put_session(&self, address: &str, session: &[u8]) -> Result<()> {
        self.put(SESSION, address.as_bytes(), session)
            .await
            .map_err(db_err)
    }

    async fn delete_session(&self, address: &str) -> Result<()> {
        self.remove(SESSION, address.as_bytes())
            .await
            .map_err(db_err)
    }

    async fn store_prekey(&self, id: u32, record: &[u8], _uploaded: bool) -> Result<()> {
        self.put(PREKEY, &id_key(id), record).await.map_err(db_err)
    }

    async fn load_prekey(&self, id: u32) -> Result<Option<Vec<u8>>> {
        self.get(PREKEY, &id_key(id)).await.map_err(db_err)
    }

    async fn remove_prekey(&self, id: u32) -> Result<()> {
        self.remove(PREKEY, &id_key(id)).await.map_err(db_err)
    }

    async fn store_signed_prekey(&self, id: u32, record: &[u8]) -> Result<()> {
        self.put(SIGNED_PREKEY, &id_key(id), record)
            .await
            .map_err(db_err)
    }

    async fn load_signed_prekey(&self, id: u32) -> Result<Option<Vec<u8>>> {
        self.get(SIGNED_PREKEY, &id_key(id)).await.map_err(db_err)
    }

    async fn load_all_signed_prekeys(&self) -> Result<Vec<(u32, Vec<u8>)>> {
        let rows = self.entries(SIGNED_PREKEY).await.map_err(db_err)?;
        Ok(rows
            .into_iter()
            .filter_map(|(key, record)| {
                let id: [u8; 4] = key.try_into().ok()?;
                Some((u32::from_be_bytes(id), record))
            })
            .collect())
    }

    async fn remove_signed_prekey(&self, id: u32) -> Result<()> {
        self.remove(SIGNED_PREKEY, &id_key(id))
            .await
            .map_err(db_err)
    }

    async fn put_sender_key(&self, address: &str, record: &[u8]) -> Result<()> {
        self.put(SENDER_KEY, address.as_bytes(), record)
            .await
            .map_err(db_err)
    }

    async fn get_sender_key(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.get(SENDER_KEY, address.as_bytes()).await.map_err(db_err)
    }

    async fn delete_sender_key(&self, address: &str) -> Result<()> {
        self.remove(SENDER_KEY, address.as_bytes())
            .await
            .map_err(db_err)
    }
}
