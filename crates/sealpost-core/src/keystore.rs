//! Client-held secret key store.
//!
//! A [`KeyStore`] is an explicit capability scoped to one identity: it is
//! created at registration, passed to every decrypt operation, and moved
//! between devices only through [`KeyStore::export`] / [`KeyStore::import`].
//! There is no ambient global key state.
//!
//! # Security
//!
//! - Secrets never appear in `Debug` output
//! - Exported bytes are wrapped in [`Zeroizing`] and wiped on drop
//! - Prekey ids come from a monotonic counter that survives export/import, so
//!   ids never collide within one identity's prekey set

use std::{collections::BTreeMap, fmt};

use sealpost_crypto::{CryptoError, KeyPair, PreKeyPair, PublicKey, SecretKey, generate_pre_keys};
use sealpost_proto::{PreKeyWire, SignedPreKeyWire, UserId, b64};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{env::Environment, error::CoreError};

/// Secret key material for one identity on one device.
#[derive(Clone)]
pub struct KeyStore {
    owner: UserId,
    identity: Option<KeyPair>,
    signed_pre_key: Option<PreKeyPair>,
    pre_keys: BTreeMap<u64, SecretKey>,
    next_pre_key_id: u64,
}

/// CBOR layout of an exported store. Secrets are PKCS#8 DER.
#[derive(Serialize, Deserialize)]
struct ExportedKeys {
    owner: UserId,
    identity: Option<Vec<u8>>,
    signed_pre_key: Option<(u64, Vec<u8>)>,
    pre_keys: Vec<(u64, Vec<u8>)>,
    next_pre_key_id: u64,
}

impl Drop for ExportedKeys {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(der) = self.identity.as_mut() {
            der.zeroize();
        }
        if let Some((_, der)) = self.signed_pre_key.as_mut() {
            der.zeroize();
        }
        for (_, der) in &mut self.pre_keys {
            der.zeroize();
        }
    }
}

impl KeyStore {
    /// An empty store, as on a fresh device before sync.
    pub fn empty(owner: UserId) -> Self {
        Self {
            owner,
            identity: None,
            signed_pre_key: None,
            pre_keys: BTreeMap::new(),
            next_pre_key_id: 1,
        }
    }

    /// Generate a new long-lived identity key pair.
    ///
    /// # Errors
    ///
    /// - `UnsupportedEnvironment`: no secure entropy
    pub fn generate<E: Environment>(owner: UserId, env: &E) -> Result<Self, CoreError> {
        let mut rng = env.crypto_rng()?;
        let identity = KeyPair::generate(&mut rng);

        tracing::debug!(%owner, "generated identity key pair");

        Ok(Self { identity: Some(identity), ..Self::empty(owner) })
    }

    /// Identity this store belongs to.
    pub fn owner(&self) -> UserId {
        self.owner
    }

    /// Whether the identity secret is present on this device.
    pub fn has_identity(&self) -> bool {
        self.identity.is_some()
    }

    /// Published half of the identity key.
    ///
    /// # Errors
    ///
    /// - `MissingKeyMaterial`: identity not present on this device
    pub fn identity_public_key(&self) -> Result<PublicKey, CoreError> {
        self.identity_pair().map(|pair| pair.public)
    }

    /// Identity secret for decryption.
    ///
    /// # Errors
    ///
    /// - `MissingKeyMaterial`: identity not present on this device
    pub fn identity_secret(&self) -> Result<&SecretKey, CoreError> {
        self.identity_pair().map(|pair| &pair.secret)
    }

    fn identity_pair(&self) -> Result<&KeyPair, CoreError> {
        self.identity.as_ref().ok_or(CoreError::MissingKeyMaterial { owner: self.owner })
    }

    /// Generate `count` one-time prekeys, keep their secrets and return the
    /// public halves for publication.
    ///
    /// # Errors
    ///
    /// - `UnsupportedEnvironment`: no secure entropy
    /// - `InvalidKeyMaterial`: prekey id space exhausted
    pub fn generate_pre_keys<E: Environment>(
        &mut self,
        env: &E,
        count: usize,
    ) -> Result<Vec<PreKeyWire>, CoreError> {
        let mut rng = env.crypto_rng()?;
        let batch = generate_pre_keys(&mut rng, self.next_pre_key_id, count)?;

        self.next_pre_key_id += count as u64;
        debug_assert!(batch.iter().all(|k| !self.pre_keys.contains_key(&k.key_id)));

        let published = batch.iter().map(|k| PreKeyWire::new(k.key_id, &k.pair.public)).collect();
        for pre_key in batch {
            self.pre_keys.insert(pre_key.key_id, pre_key.pair.secret);
        }

        tracing::debug!(owner = %self.owner, count, next = self.next_pre_key_id, "generated prekeys");

        Ok(published)
    }

    /// Generate a signed prekey, replacing any previous one. The signature is
    /// the identity key's ECDSA signature over the prekey's SEC1 bytes.
    ///
    /// # Errors
    ///
    /// - `MissingKeyMaterial`: identity not present on this device
    /// - `UnsupportedEnvironment`: no secure entropy
    pub fn generate_signed_pre_key<E: Environment>(
        &mut self,
        env: &E,
    ) -> Result<SignedPreKeyWire, CoreError> {
        let identity = self.identity_pair()?;
        let mut rng = env.crypto_rng()?;

        let key_id = self.next_pre_key_id;
        let pair = KeyPair::generate(&mut rng);
        let public_bytes = pair.public.to_bytes();
        let signature = identity.secret.sign(&public_bytes);

        self.next_pre_key_id += 1;
        self.signed_pre_key = Some(PreKeyPair { key_id, pair });

        Ok(SignedPreKeyWire {
            key_id,
            public_key: b64::encode(&public_bytes),
            signature: Some(b64::encode(&signature)),
        })
    }

    /// Secret half of a one-time prekey, if still held.
    pub fn pre_key_secret(&self, key_id: u64) -> Option<&SecretKey> {
        self.pre_keys.get(&key_id)
    }

    /// Number of one-time prekey secrets held.
    pub fn pre_key_count(&self) -> usize {
        self.pre_keys.len()
    }

    /// Id the next generated prekey will receive.
    pub fn next_pre_key_id(&self) -> u64 {
        self.next_pre_key_id
    }

    /// Serialize all secrets for device sync or backup.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyMaterial`: a secret could not be encoded
    pub fn export(&self) -> Result<Zeroizing<Vec<u8>>, CoreError> {
        let der = |secret: &SecretKey| secret.to_pkcs8_der().map(|d| d.to_vec());

        let exported = ExportedKeys {
            owner: self.owner,
            identity: self.identity.as_ref().map(|pair| der(&pair.secret)).transpose()?,
            signed_pre_key: self
                .signed_pre_key
                .as_ref()
                .map(|k| der(&k.pair.secret).map(|d| (k.key_id, d)))
                .transpose()?,
            pre_keys: self
                .pre_keys
                .iter()
                .map(|(id, secret)| der(secret).map(|d| (*id, d)))
                .collect::<Result<_, CryptoError>>()?,
            next_pre_key_id: self.next_pre_key_id,
        };

        let mut bytes = Zeroizing::new(Vec::new());
        ciborium::into_writer(&exported, &mut *bytes)
            .map_err(|e| CoreError::InvalidKeyMaterial { reason: e.to_string() })?;

        Ok(bytes)
    }

    /// Restore a store produced by [`KeyStore::export`].
    ///
    /// # Errors
    ///
    /// - `InvalidKeyMaterial`: malformed export or unparsable secret
    pub fn import(bytes: &[u8]) -> Result<Self, CoreError> {
        let exported: ExportedKeys = ciborium::from_reader(bytes)
            .map_err(|e| CoreError::InvalidKeyMaterial { reason: e.to_string() })?;

        let identity = exported
            .identity
            .as_deref()
            .map(SecretKey::from_pkcs8_der)
            .transpose()?
            .map(KeyPair::from_secret);

        let signed_pre_key = match &exported.signed_pre_key {
            Some((key_id, der)) => Some(PreKeyPair {
                key_id: *key_id,
                pair: KeyPair::from_secret(SecretKey::from_pkcs8_der(der)?),
            }),
            None => None,
        };

        let mut pre_keys = BTreeMap::new();
        for (key_id, der) in &exported.pre_keys {
            if *key_id >= exported.next_pre_key_id {
                return Err(CoreError::InvalidKeyMaterial {
                    reason: format!("prekey id {key_id} is beyond the id counter"),
                });
            }
            pre_keys.insert(*key_id, SecretKey::from_pkcs8_der(der)?);
        }

        Ok(Self {
            owner: exported.owner,
            identity,
            signed_pre_key,
            pre_keys,
            next_pre_key_id: exported.next_pre_key_id,
        })
    }
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("owner", &self.owner)
            .field("has_identity", &self.identity.is_some())
            .field("pre_keys", &self.pre_keys.len())
            .field("next_pre_key_id", &self.next_pre_key_id)
            .finish_non_exhaustive()
    }
}
