//! Typed field accessors.
//!
//! Direct writes go through [`Store::set`], which serializes the value and
//! routes it to [`Store::set_item`] with `save` decided by the store's
//! [`Autosave`](crate::Autosave) policy.  Writes the policy does not cover
//! only update memory and observers; persist them later with
//! [`Store::save`] or [`Store::save_all`].

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use crate::error::MirrorResult;
use crate::options::SetOptions;
use crate::store::Store;

impl Store {
    /// Assign `value` to `key`, persisting it only if autosave covers the
    /// key.
    pub async fn set<T>(&self, key: &str, value: T) -> MirrorResult<()>
    where
        T: Serialize,
    {
        let value = serde_json::to_value(value)?;
        let save = self.options().autosave.covers(key);
        trace!(key, save, "direct write");
        self.set_item(key, Some(value), SetOptions::default().with_save(save))
            .await
    }

    /// Deserialize the in-memory value of `key`.  `None` if it is `null`.
    pub fn get_as<T>(&self, key: &str) -> MirrorResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.get(key) {
            Value::Null => Ok(None),
            value => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    /// Delete `key`.  Same as [`Store::remove_item`], so the stored copy
    /// goes too.
    pub async fn delete(&self, key: &str) -> MirrorResult<()> {
        self.remove_item(key).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
