//! Key directory: registration, prekey supply and key fetch.

use sealpost_core::Environment;
use sealpost_crypto::PublicKey;
use sealpost_proto::{
    IdentityKeysResponse, PreKeyWire, RegisterKeysRequest, ReplenishPreKeysRequest,
    SignedPreKeyWire, UserId, UserSettings, b64,
};

use crate::{
    driver::{Outcome, ServerDriver},
    error::ServerError,
    storage::{Storage, StoredIdentity, StoredPreKey, StoredSignedPreKey},
};

impl<E: Environment, S: Storage> ServerDriver<E, S> {
    /// Publish `caller`'s identity key, signed prekey and initial prekeys.
    ///
    /// Re-registration replaces the identity and signed prekey and keeps the
    /// caller's settings. Prekey ids stay reserved across registrations.
    ///
    /// # Errors
    ///
    /// - `Protocol` for a malformed key
    /// - `InvalidRequest` if the signed prekey's signature does not verify
    /// - `Storage(Conflict)` if a prekey id is already taken
    pub fn register_keys(
        &mut self,
        caller: UserId,
        request: &RegisterKeysRequest,
    ) -> Result<Outcome<()>, ServerError> {
        let identity_key =
            b64::decode_public_key("identityPublicKey", &request.identity_public_key)?;
        let signed_pre_key = request
            .signed_pre_key
            .as_ref()
            .map(|signed| decode_signed_pre_key(&identity_key, signed))
            .transpose()?;
        let pre_keys = decode_pre_keys(&request.pre_keys)?;

        let existing = self.storage.load_identity(caller)?;
        let identity = StoredIdentity {
            user_id: caller,
            identity_public_key: identity_key.to_bytes(),
            signed_pre_key,
            settings: existing.as_ref().map(|i| i.settings).unwrap_or_default(),
            registered_at: existing.map_or_else(|| self.env.now(), |i| i.registered_at),
        };
        self.storage.register(&identity, &pre_keys)?;

        tracing::info!(user = %caller, pre_keys = pre_keys.len(), "registered keys");
        Ok(Outcome::new(()))
    }

    /// Upload more one-time prekeys.
    ///
    /// # Errors
    ///
    /// - `NotFound` if `caller` never registered
    /// - `Protocol` for a malformed key
    /// - `Storage(Conflict)` if a prekey id is already taken
    pub fn replenish_pre_keys(
        &mut self,
        caller: UserId,
        request: &ReplenishPreKeysRequest,
    ) -> Result<Outcome<usize>, ServerError> {
        self.require_identity(caller)?;

        let pre_keys = decode_pre_keys(&request.pre_keys)?;
        self.storage.add_pre_keys(caller, &pre_keys)?;

        let unused = self.storage.count_unused_pre_keys(caller)?;
        tracing::debug!(user = %caller, added = pre_keys.len(), unused, "replenished prekeys");
        Ok(Outcome::new(unused))
    }

    /// Number of `caller`'s prekeys not yet handed out.
    ///
    /// # Errors
    ///
    /// - `NotFound` if `caller` never registered
    pub fn pre_key_count(&self, caller: UserId) -> Result<Outcome<usize>, ServerError> {
        self.require_identity(caller)?;
        Ok(Outcome::new(self.storage.count_unused_pre_keys(caller)?))
    }

    /// Fetch `target`'s keys for first contact.
    ///
    /// At most one unused one-time prekey is handed out and marked used in
    /// the same storage step, so two concurrent fetches never receive the
    /// same prekey. An empty supply yields `one_time_pre_key: None`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if `target` never registered
    pub fn fetch_keys(
        &mut self,
        caller: UserId,
        target: UserId,
    ) -> Result<Outcome<IdentityKeysResponse>, ServerError> {
        let identity = self.require_identity(target)?;
        let one_time = self.storage.take_pre_key(target)?;

        let unused = self.storage.count_unused_pre_keys(target)?;
        if unused < self.config.pre_key_low_watermark {
            tracing::warn!(user = %target, unused, "prekey supply low, owner should replenish");
        }
        tracing::debug!(
            caller = %caller,
            target = %target,
            key_id = one_time.as_ref().map(|k| k.key_id),
            "handed out keys"
        );

        Ok(Outcome::new(IdentityKeysResponse {
            identity_public_key: b64::encode(&identity.identity_public_key),
            signed_pre_key: identity.signed_pre_key.map(|signed| SignedPreKeyWire {
                key_id: signed.key_id,
                public_key: b64::encode(&signed.public_key),
                signature: signed.signature.as_deref().map(b64::encode),
            }),
            one_time_pre_key: one_time.map(|k| PreKeyWire {
                key_id: k.key_id,
                public_key: b64::encode(&k.public_key),
            }),
        }))
    }

    /// `caller`'s settings.
    ///
    /// # Errors
    ///
    /// - `NotFound` if `caller` never registered
    pub fn settings(&self, caller: UserId) -> Result<Outcome<UserSettings>, ServerError> {
        Ok(Outcome::new(self.require_identity(caller)?.settings))
    }

    /// Replace `caller`'s settings.
    ///
    /// # Errors
    ///
    /// - `NotFound` if `caller` never registered
    pub fn update_settings(
        &mut self,
        caller: UserId,
        settings: UserSettings,
    ) -> Result<Outcome<UserSettings>, ServerError> {
        let mut identity = self.require_identity(caller)?;
        identity.settings = settings;
        self.storage.store_identity(&identity)?;
        Ok(Outcome::new(settings))
    }
}

fn decode_signed_pre_key(
    identity_key: &PublicKey,
    signed: &SignedPreKeyWire,
) -> Result<StoredSignedPreKey, ServerError> {
    let public_key = b64::decode_public_key("signedPreKey", &signed.public_key)?;

    let signature = match &signed.signature {
        Some(signature) => {
            let signature = b64::decode("signature", signature)?;
            identity_key
                .verify(&public_key.to_bytes(), &signature)
                .map_err(|_| ServerError::invalid("signed prekey signature does not verify"))?;
            Some(signature)
        },
        None => None,
    };

    Ok(StoredSignedPreKey { key_id: signed.key_id, public_key: public_key.to_bytes(), signature })
}

fn decode_pre_keys(pre_keys: &[PreKeyWire]) -> Result<Vec<StoredPreKey>, ServerError> {
    pre_keys
        .iter()
        .map(|wire| -> Result<StoredPreKey, ServerError> {
            Ok(StoredPreKey { key_id: wire.key_id, public_key: wire.decode()?.to_bytes(), used: false })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use sealpost_core::replenish;

    use super::*;
    use crate::{
        driver::test_support::{driver, registered},
        storage::StorageError,
    };

    #[test]
    fn fetch_hands_out_each_pre_key_once() {
        let mut driver = driver();
        registered(&mut driver, 1, 2);

        let first = driver.fetch_keys(UserId(2), UserId(1)).unwrap().value;
        let second = driver.fetch_keys(UserId(3), UserId(1)).unwrap().value;
        let third = driver.fetch_keys(UserId(3), UserId(1)).unwrap().value;

        let first_id = first.one_time_pre_key.unwrap().key_id;
        let second_id = second.one_time_pre_key.unwrap().key_id;
        assert_ne!(first_id, second_id);
        assert!(third.one_time_pre_key.is_none());
        assert_eq!(third.identity_public_key, first.identity_public_key);
        assert_eq!(third.signed_pre_key, first.signed_pre_key);
    }

    #[test]
    fn replenish_restores_supply() {
        let mut driver = driver();
        let mut store = registered(&mut driver, 1, 1);
        driver.fetch_keys(UserId(2), UserId(1)).unwrap();
        assert_eq!(driver.pre_key_count(UserId(1)).unwrap().value, 0);

        let request = replenish(&mut store, driver.env(), 3).unwrap();
        assert_eq!(driver.replenish_pre_keys(UserId(1), &request).unwrap().value, 3);

        // Replaying the same batch collides with the stored ids
        let err = driver.replenish_pre_keys(UserId(1), &request).unwrap_err();
        assert!(matches!(err, ServerError::Storage(StorageError::Conflict { .. })));
    }

    #[test]
    fn forged_signed_pre_key_is_rejected() {
        let mut driver = driver();
        let (_, mut request) = sealpost_core::register(UserId(1), driver.env(), 1).unwrap();
        let (_, other) = sealpost_core::register(UserId(2), driver.env(), 1).unwrap();
        request.signed_pre_key = other.signed_pre_key;

        let err = driver.register_keys(UserId(1), &request).unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest { .. }));
        assert!(driver.storage().load_identity(UserId(1)).unwrap().is_none());
    }

    #[test]
    fn colliding_re_registration_keeps_previous_identity() {
        let mut driver = driver();
        let store = registered(&mut driver, 1, 2);
        let before = driver.storage().load_identity(UserId(1)).unwrap().unwrap();

        // A fresh device numbers its prekeys from the start again
        let (_, request) = sealpost_core::register(UserId(1), driver.env(), 2).unwrap();
        let err = driver.register_keys(UserId(1), &request).unwrap_err();
        assert!(matches!(err, ServerError::Storage(StorageError::Conflict { .. })));

        let after = driver.storage().load_identity(UserId(1)).unwrap().unwrap();
        assert_eq!(after, before);
        assert_eq!(after.identity_public_key, store.identity_public_key().unwrap().to_bytes());
        assert_eq!(driver.pre_key_count(UserId(1)).unwrap().value, 2);
    }

    #[test]
    fn unknown_target_is_not_found() {
        let mut driver = driver();
        let err = driver.fetch_keys(UserId(1), UserId(9)).unwrap_err();
        assert_eq!(err, ServerError::NotFound { resource: "user" });
    }

    #[test]
    fn re_registration_keeps_settings() {
        let mut driver = driver();
        registered(&mut driver, 1, 1);
        let quiet = UserSettings { read_receipts_enabled: false, typing_indicators_enabled: false };
        driver.update_settings(UserId(1), quiet).unwrap();

        let (_, request) = sealpost_core::register(UserId(1), driver.env(), 0).unwrap();
        driver.register_keys(UserId(1), &request).unwrap();

        assert_eq!(driver.settings(UserId(1)).unwrap().value, quiet);
    }
}
