//! Device identity persistence.

use async_trait::async_trait;
use wacore::store::error::{db_err, StoreError};
use wacore::store::traits::DeviceStore;
use wacore::store::Device;

use super::{SessionStore, DEVICE_KEY, DEVICE_SCOPE};

type Result<T> = wacore::store::error::Result<T>;

#[async_trait]
impl DeviceStore for SessionStore {
    async fn save(&self, device: &Device) -> Result<()> {
        // Device keys use binary-only serde helpers, so JSON is not an option.
        let data =
            bincode::serialize(device).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.put(DEVICE_SCOPE, DEVICE_KEY, &data)
            .await
            .map_err(db_err)
    }

    async fn load(&self) -> Result<Option<Device>> {
        let Some(data) = self.get(DEVICE_SCOPE, DEVICE_KEY).await.map_err(db_err)? else {
            return Ok(None);
        };
        bincode::deserialize(&data)
            .map(Some)
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self
            .get(DEVICE_SCOPE, DEVICE_KEY)
            .await
            .map_err(db_err)?
            .is_some())
    }

    async fn create(&self) -> Result<i32> {
        // Single-device store; the identity itself arrives through `save`.
        Ok(1)
    }
}
