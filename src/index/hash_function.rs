use crate::index::codec::Storable;

/// Maps a key to the 32-bit hash the index routes on. Must be stable across
/// process restarts for an index that outlives one.
pub trait HashFunction<K>: Send + Sync {
    fn hash(&self, key: &K) -> u32;
}

impl<K, F> HashFunction<K> for F
where
    F: Fn(&K) -> u32 + Send + Sync,
{
    fn hash(&self, key: &K) -> u32 {
        self(key)
    }
}

/// CRC32 over the key's encoded bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32Hasher;

impl<K: Storable> HashFunction<K> for Crc32Hasher {
    fn hash(&self, key: &K) -> u32 {
        let mut encoded: Vec<u8> = Vec::with_capacity(K::SIZE);
        key.encode(&mut encoded);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&encoded);
        hasher.finalize()
    }
}
