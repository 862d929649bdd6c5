//! Key encoding for the KSM metadata store.
//!
//! The lexicographic byte order of these encodings is load-bearing: a prefix
//! scan of `/volume/bucket/` yields the keys of a bucket in listing order,
//! and `$user` records sort apart from the `/`-rooted namespace.

/// Key for a volume record: `/volume`.
pub fn volume_key(volume: &str) -> Vec<u8> {
    format!("/{}", volume).into_bytes()
}

/// Key for a bucket record: `/volume/bucket`.
pub fn bucket_key(volume: &str, bucket: &str) -> Vec<u8> {
    format!("/{}/{}", volume, bucket).into_bytes()
}

/// Key for an object record: `/volume/bucket/key`.
pub fn object_key(volume: &str, bucket: &str, key: &str) -> Vec<u8> {
    format!("/{}/{}/{}", volume, bucket, key).into_bytes()
}

/// Key for a user's volume index: `$user`.
pub fn user_key(user: &str) -> Vec<u8> {
    format!("${}", user).into_bytes()
}

/// Scan prefix covering every bucket and key under a volume.
pub fn volume_prefix(volume: &str) -> Vec<u8> {
    format!("/{}/", volume).into_bytes()
}

/// Scan prefix covering every key in a bucket.
pub fn bucket_prefix(volume: &str, bucket: &str) -> Vec<u8> {
    format!("/{}/{}/", volume, bucket).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_sort_under_bucket_prefix() {
        let prefix = bucket_prefix("v1", "b1");
        let a = object_key("v1", "b1", "apple");
        let b = object_key("v1", "b1", "banana");
        assert!(a.starts_with(&prefix));
        assert!(b.starts_with(&prefix));
        assert!(a < b);
    }

    #[test]
    fn bucket_key_sorts_before_its_objects() {
        let bucket = bucket_key("v1", "b1");
        let object = object_key("v1", "b1", "k");
        assert!(bucket < object);
    }

    #[test]
    fn user_index_sorts_apart_from_namespace() {
        // '$' (0x24) < '/' (0x2f), so user records precede the namespace.
        assert!(user_key("alice") < volume_key("a"));
    }

    #[test]
    fn volume_prefix_excludes_sibling_volumes() {
        let prefix = volume_prefix("v1");
        assert!(bucket_key("v1", "b").starts_with(&prefix));
        assert!(!volume_key("v10").starts_with(&prefix));
    }
}
