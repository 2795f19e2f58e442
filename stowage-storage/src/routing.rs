//! Backend selection and sensitive-key detection.

use stowage_core::StorageType;

/// Key fragments that mark a record as sensitive. Such records always go to
/// the sync backend and are always encrypted.
pub const SENSITIVE_KEY_FRAGMENTS: &[&str] = &[
    "api_keys",
    "user_password",
    "auth_token",
    "private_key",
    "secret",
];

/// Whether `key` contains a deny-listed fragment.
pub fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEY_FRAGMENTS
        .iter()
        .any(|fragment| key.contains(fragment))
}

/// Pick the backend for a write.
///
/// 1. An explicit choice wins.
/// 2. Sensitive keys go to sync.
/// 3. Payloads serializing to more than `large_payload_threshold` bytes go
///    to async.
/// 4. Everything else goes to sync.
pub fn select_storage_type(
    key: &str,
    serialized_len: usize,
    explicit: Option<StorageType>,
    large_payload_threshold: usize,
) -> StorageType {
    if let Some(storage_type) = explicit {
        return storage_type;
    }
    if is_sensitive_key(key) {
        return StorageType::Sync;
    }
    if serialized_len > large_payload_threshold {
        return StorageType::Async;
    }
    StorageType::Sync
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const THRESHOLD: usize = 100 * 1024;

    #[test]
    fn test_explicit_wins() {
        assert_eq!(
            select_storage_type("secret_x", THRESHOLD * 2, Some(StorageType::Async), THRESHOLD),
            StorageType::Async
        );
    }

    #[test]
    fn test_threshold_is_exclusive() {
        assert_eq!(
            select_storage_type("background_1", THRESHOLD, None, THRESHOLD),
            StorageType::Sync
        );
        assert_eq!(
            select_storage_type("background_1", THRESHOLD + 1, None, THRESHOLD),
            StorageType::Async
        );
    }

    #[test]
    fn test_sensitive_keys() {
        assert!(is_sensitive_key("api_keys"));
        assert!(is_sensitive_key("openai_auth_token"));
        assert!(is_sensitive_key("client_secret_v2"));
        assert!(!is_sensitive_key("settings_theme"));
    }

    proptest! {
        #[test]
        fn prop_sensitive_keys_stay_sync(
            prefix in "[a-z_]{0,12}",
            fragment in proptest::sample::select(SENSITIVE_KEY_FRAGMENTS.to_vec()),
            len in 0usize..(THRESHOLD * 4),
        ) {
            let key = format!("{}{}", prefix, fragment);
            prop_assert_eq!(select_storage_type(&key, len, None, THRESHOLD), StorageType::Sync);
        }

        #[test]
        fn prop_large_payloads_go_async(
            key in "(conversation|background|weather)_[a-z0-9]{1,8}",
            extra in 1usize..THRESHOLD,
        ) {
            prop_assert_eq!(
                select_storage_type(&key, THRESHOLD + extra, None, THRESHOLD),
                StorageType::Async
            );
        }
    }
}
