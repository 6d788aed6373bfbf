//! Property tests for the symmetric layer, the path resolver, and machine
//! id derivation. Asymmetric round-trips live in the unit tests; 4096-bit
//! key generation is far too slow to run per proptest case.

use proptest::prelude::*;

use nvolt::crypto::symmetric::{constant_time_equal, MasterKey};
use nvolt::machine::derive_machine_id;
use nvolt::paths::VaultPaths;

proptest! {
    #[test]
    fn prop_encrypt_decrypt_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let key = MasterKey::generate();
        let sealed = key.encrypt(&plaintext).unwrap();
        let decrypted = key.decrypt(&sealed.ciphertext, &sealed.nonce).unwrap();
        prop_assert_eq!(plaintext, decrypted.as_slice().to_vec());
    }

    #[test]
    fn prop_flipping_any_ciphertext_byte_fails(
        plaintext in proptest::collection::vec(any::<u8>(), 1..256),
        flip in any::<usize>(),
    ) {
        let key = MasterKey::generate();
        let mut sealed = key.encrypt(&plaintext).unwrap();
        let idx = flip % sealed.ciphertext.len();
        sealed.ciphertext[idx] ^= 1;
        prop_assert!(key.decrypt(&sealed.ciphertext, &sealed.nonce).is_err());
    }

    #[test]
    fn prop_flipping_any_nonce_byte_fails(
        plaintext in proptest::collection::vec(any::<u8>(), 1..256),
        flip in any::<usize>(),
    ) {
        let key = MasterKey::generate();
        let mut sealed = key.encrypt(&plaintext).unwrap();
        let idx = flip % sealed.nonce.len();
        sealed.nonce[idx] ^= 1;
        prop_assert!(key.decrypt(&sealed.ciphertext, &sealed.nonce).is_err());
    }

    #[test]
    fn prop_constant_time_equal_matches_eq(
        a in proptest::collection::vec(any::<u8>(), 0..64),
        b in proptest::collection::vec(any::<u8>(), 0..64),
    ) {
        prop_assert_eq!(constant_time_equal(&a, &b), a == b);
    }

    #[test]
    fn prop_path_resolver_is_pure(
        project in "[a-z]{0,12}",
        env in "[a-z]{1,12}",
        key in "[A-Z_]{1,24}",
    ) {
        let a = VaultPaths::new("/vault".into());
        let b = VaultPaths::new("/vault".into());
        prop_assert_eq!(
            a.secret_file(&project, &env, &key),
            b.secret_file(&project, &env, &key)
        );
        prop_assert_eq!(
            a.wrapped_key_file(&project, &env, "m-x-0000000"),
            b.wrapped_key_file(&project, &env, "m-x-0000000")
        );
    }

    #[test]
    fn prop_machine_id_shape(
        name in "[a-z]{1,10}",
        host in "[a-z]{1,10}",
        hash in "[A-Za-z0-9+/]{7,43}",
    ) {
        let fingerprint = format!("SHA256:{hash}");

        let custom = derive_machine_id(Some(&name), &host, &fingerprint);
        let custom_prefix = format!("{}-", name);
        prop_assert!(custom.starts_with(&custom_prefix));

        let hosted = derive_machine_id(None, &host, &fingerprint);
        let hosted_prefix = format!("m-{}-", host);
        prop_assert!(hosted.starts_with(&hosted_prefix));

        // The suffix never carries path or fingerprint separators.
        let suffix = hosted.rsplit('-').next().unwrap();
        prop_assert_eq!(suffix.len(), 7);
        prop_assert!(!suffix.contains('/') && !suffix.contains('\\') && !suffix.contains(':'));
    }
}
