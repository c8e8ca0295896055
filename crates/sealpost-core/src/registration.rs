//! Identity registration and prekey replenishment.

use sealpost_proto::{RegisterKeysRequest, ReplenishPreKeysRequest, UserId, b64};

use crate::{env::Environment, error::CoreError, keystore::KeyStore};

/// One-time prekeys published at registration.
pub const DEFAULT_PRE_KEY_COUNT: usize = 5;

/// Create a key store for `owner` and the bundle to publish.
///
/// The returned store holds every secret; the request holds only public
/// halves. `pre_key_count` one-time prekeys and one signed prekey are
/// generated.
///
/// # Errors
///
/// - `UnsupportedEnvironment`: no secure entropy; nothing is generated
pub fn register<E: Environment>(
    owner: UserId,
    env: &E,
    pre_key_count: usize,
) -> Result<(KeyStore, RegisterKeysRequest), CoreError> {
    let mut store = KeyStore::generate(owner, env)?;
    let identity_public_key = b64::encode(&store.identity_public_key()?.to_bytes());
    let signed_pre_key = store.generate_signed_pre_key(env)?;
    let pre_keys = store.generate_pre_keys(env, pre_key_count)?;

    tracing::info!(%owner, pre_keys = pre_keys.len(), "registered identity");

    Ok((store, RegisterKeysRequest {
        identity_public_key,
        signed_pre_key: Some(signed_pre_key),
        pre_keys,
    }))
}

/// Generate `count` more one-time prekeys for upload.
///
/// # Errors
///
/// - `UnsupportedEnvironment`: no secure entropy
/// - `InvalidKeyMaterial`: prekey id space exhausted
pub fn replenish<E: Environment>(
    store: &mut KeyStore,
    env: &E,
    count: usize,
) -> Result<ReplenishPreKeysRequest, CoreError> {
    let pre_keys = store.generate_pre_keys(env, count)?;
    Ok(ReplenishPreKeysRequest { pre_keys })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::test_env::TestEnv;

    #[test]
    fn bundle_contains_only_public_halves() {
        let env = TestEnv::new(10);
        let (store, request) = register(UserId(1), &env, DEFAULT_PRE_KEY_COUNT).unwrap();

        assert_eq!(request.pre_keys.len(), DEFAULT_PRE_KEY_COUNT);
        assert_eq!(store.pre_key_count(), DEFAULT_PRE_KEY_COUNT);
        for pre_key in &request.pre_keys {
            assert!(store.pre_key_secret(pre_key.key_id).is_some());
            assert!(pre_key.decode().is_ok());
        }

        let identity = b64::decode_public_key("identityPublicKey", &request.identity_public_key);
        assert_eq!(identity.unwrap(), store.identity_public_key().unwrap());
    }

    #[test]
    fn registration_is_blocked_without_entropy() {
        let env = TestEnv::without_entropy();
        assert_eq!(register(UserId(1), &env, 5).unwrap_err(), CoreError::UnsupportedEnvironment);
    }

    #[test]
    fn replenished_ids_continue_after_registration() {
        let env = TestEnv::new(11);
        let (mut store, request) = register(UserId(1), &env, 3).unwrap();
        let more = replenish(&mut store, &env, 2).unwrap();

        let max_registered = request.pre_keys.iter().map(|k| k.key_id).max().unwrap();
        assert!(more.pre_keys.iter().all(|k| k.key_id > max_registered));
        assert_eq!(store.pre_key_count(), 5);
    }
}
