use std::marker::PhantomData;

use crate::common::types::{Page, PAGE_SIZE};
use crate::index::hash::key::FixedCodec;

/// A hash bucket page: two bitmaps followed by a fixed array of (key, value)
/// slots.
///
/// `occupied` records that a slot has ever held an entry and is only cleared
/// by `clear`; `readable` records that the slot holds a live entry. Scans can
/// therefore stop at the first never-occupied slot, and removals just clear
/// the readable bit.
pub struct HashTableBucketPage<K, V> {
    data: Box<[u8; PAGE_SIZE]>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> HashTableBucketPage<K, V>
where
    K: FixedCodec + Eq,
    V: FixedCodec + PartialEq,
{
    /// Slots per bucket. Derived from the page size so that the two bitmaps
    /// plus the entry array always fit.
    pub fn array_size() -> usize {
        4 * PAGE_SIZE / (4 * (K::ENCODED_LEN + V::ENCODED_LEN) + 1)
    }

    fn bitmap_len() -> usize {
        (Self::array_size() + 7) / 8
    }

    fn entry_len() -> usize {
        K::ENCODED_LEN + V::ENCODED_LEN
    }

    fn entry_offset(index: usize) -> usize {
        2 * Self::bitmap_len() + index * Self::entry_len()
    }

    pub fn new() -> Self {
        Self {
            data: Box::new([0; PAGE_SIZE]),
            _marker: PhantomData,
        }
    }

    /// Decode a bucket from a page image.
    pub fn load(page: &Page) -> Self {
        Self {
            data: Box::new(page.data),
            _marker: PhantomData,
        }
    }

    /// Encode the bucket into a page image.
    pub fn save(&self, page: &mut Page) {
        page.data.copy_from_slice(&self.data[..]);
    }

    pub fn is_occupied(&self, index: usize) -> bool {
        self.data[index / 8] & (1 << (index % 8)) != 0
    }

    fn set_occupied(&mut self, index: usize) {
        self.data[index / 8] |= 1 << (index % 8);
    }

    pub fn is_readable(&self, index: usize) -> bool {
        self.data[Self::bitmap_len() + index / 8] & (1 << (index % 8)) != 0
    }

    fn set_readable(&mut self, index: usize, readable: bool) {
        let byte = Self::bitmap_len() + index / 8;
        if readable {
            self.data[byte] |= 1 << (index % 8);
        } else {
            self.data[byte] &= !(1 << (index % 8));
        }
    }

    pub fn key_at(&self, index: usize) -> K {
        let offset = Self::entry_offset(index);
        K::decode(&self.data[offset..offset + K::ENCODED_LEN])
    }

    pub fn value_at(&self, index: usize) -> V {
        let offset = Self::entry_offset(index) + K::ENCODED_LEN;
        V::decode(&self.data[offset..offset + V::ENCODED_LEN])
    }

    /// Collect every live value stored under `key`. The scan stops at the
    /// first slot that was never occupied.
    pub fn get_value(&self, key: &K) -> Vec<V> {
        let mut result = Vec::new();
        for i in 0..Self::array_size() {
            if !self.is_readable(i) {
                if !self.is_occupied(i) {
                    break;
                }
                continue;
            }
            if self.key_at(i) == *key {
                result.push(self.value_at(i));
            }
        }
        result
    }

    /// Insert a (key, value) pair into the first free slot. Fails when the
    /// bucket is full or when the exact pair is already present; the same key
    /// with a different value is allowed.
    pub fn insert(&mut self, key: &K, value: &V) -> bool {
        if self.is_full() {
            return false;
        }
        for i in 0..Self::array_size() {
            if !self.is_readable(i) {
                if !self.is_occupied(i) {
                    break;
                }
                continue;
            }
            if self.key_at(i) == *key && self.value_at(i) == *value {
                return false;
            }
        }
        for i in 0..Self::array_size() {
            if !self.is_readable(i) {
                let offset = Self::entry_offset(i);
                key.encode(&mut self.data[offset..offset + K::ENCODED_LEN]);
                value.encode(
                    &mut self.data
                        [offset + K::ENCODED_LEN..offset + K::ENCODED_LEN + V::ENCODED_LEN],
                );
                self.set_readable(i, true);
                self.set_occupied(i);
                return true;
            }
        }
        false
    }

    /// Remove the exact (key, value) pair. The slot stays occupied so scans
    /// keep their early-stop behavior.
    pub fn remove(&mut self, key: &K, value: &V) -> bool {
        for i in 0..Self::array_size() {
            if !self.is_readable(i) {
                continue;
            }
            if self.key_at(i) == *key && self.value_at(i) == *value {
                self.set_readable(i, false);
                return true;
            }
        }
        false
    }

    pub fn num_readable(&self) -> usize {
        let bitmap_len = Self::bitmap_len();
        self.data[bitmap_len..2 * bitmap_len]
            .iter()
            .map(|byte| byte.count_ones() as usize)
            .sum()
    }

    pub fn is_full(&self) -> bool {
        self.num_readable() == Self::array_size()
    }

    pub fn is_empty(&self) -> bool {
        self.num_readable() == 0
    }

    /// Compacted copy of all live entries, used when splitting.
    pub fn array_copy(&self) -> Vec<(K, V)> {
        let mut entries = Vec::with_capacity(self.num_readable());
        for i in 0..Self::array_size() {
            if self.is_readable(i) {
                entries.push((self.key_at(i), self.value_at(i)));
            }
        }
        entries
    }

    /// Reset the bucket to its pristine state.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }
}

impl<K, V> Default for HashTableBucketPage<K, V>
where
    K: FixedCodec + Eq,
    V: FixedCodec + PartialEq,
{
    fn default() -> Self {
        Self::new()
    }
}
