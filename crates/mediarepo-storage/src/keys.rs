//! Location generation for datastore backends.
//!
//! Keys are random alphanumeric strings; backends shard them into path prefixes
//! to bound directory fan-out.

use mediarepo_core::constants::OBJECT_KEY_LENGTH;
use rand::distr::Alphanumeric;
use rand::Rng;

pub fn random_string(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Object storage key, optionally split after `prefix_length` characters.
pub fn object_key(prefix_length: usize) -> String {
    shard_object_key(&random_string(OBJECT_KEY_LENGTH), prefix_length)
}

pub(crate) fn shard_object_key(key: &str, prefix_length: usize) -> String {
    if prefix_length == 0 || prefix_length >= key.len() {
        return key.to_string();
    }
    format!("{}/{}", &key[..prefix_length], &key[prefix_length..])
}

/// File datastore location: `aa/bb/rest`.
pub fn file_location() -> String {
    let key = random_string(OBJECT_KEY_LENGTH);
    format!("{}/{}/{}", &key[..2], &key[2..4], &key[4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_are_alphanumeric() {
        let key = object_key(0);
        assert_eq!(key.len(), OBJECT_KEY_LENGTH);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(key, object_key(0));
    }

    #[test]
    fn prefix_shards_key() {
        assert_eq!(shard_object_key("abcdef", 2), "ab/cdef");
        assert_eq!(shard_object_key("abcdef", 0), "abcdef");
        assert!(!object_key(0).starts_with('/'));
        assert_eq!(object_key(3).find('/'), Some(3));
    }

    #[test]
    fn file_locations_use_two_level_shards() {
        let location = file_location();
        let parts: Vec<&str> = location.split('/').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 2);
        assert_eq!(parts[1].len(), 2);
        assert_eq!(parts[2].len(), OBJECT_KEY_LENGTH - 4);
    }
}
