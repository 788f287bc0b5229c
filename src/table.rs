use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::Index;

struct Entry<T> {
    value: T,
    /// Index of the next entry in the same bucket, plus one (0 terminates the chain).
    next: usize,
}

/// Append-only hash-consing table.
///
/// Values are stored once; [`Table::put`] returns the index of the stored
/// value that is structurally equal to its argument, adding it if needed.
/// Entries are never removed, so indices stay valid for the lifetime of the
/// table.
pub struct Table<T> {
    data: Vec<Entry<T>>,

    /// Head of each bucket chain, plus one (0 means empty bucket).
    buckets: Vec<usize>,
    bitmask: u64,
}

impl<T> Table<T> {
    /// Create a new table with `2^bits` buckets.
    pub fn new(bits: usize) -> Self {
        assert!(bits <= 31, "Bucket bits should be in the range 0..=31");

        let size = 1 << bits;
        Self {
            data: Vec::new(),
            buckets: vec![0; size],
            bitmask: (size - 1) as u64,
        }
    }

    /// Get the number of stored values.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of buckets.
    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Get the reference to the value at the given index.
    pub fn value(&self, index: usize) -> &T {
        &self.data[index].value
    }

    /// Iterate over the stored values in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter().map(|e| &e.value)
    }
}

impl<T> Table<T>
where
    T: Hash + Eq,
{
    fn hash_of(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    fn bucket_index(&self, hash: u64) -> usize {
        (hash & self.bitmask) as usize
    }

    /// Find the index of a value equal to `value`, if it is stored.
    pub fn find(&self, value: &T) -> Option<usize> {
        let bucket = self.bucket_index(Self::hash_of(value));
        let mut link = self.buckets[bucket];
        while link != 0 {
            let index = link - 1;
            if &self.data[index].value == value {
                return Some(index);
            }
            link = self.data[index].next;
        }
        None
    }

    /// Put a value into the table and return its index.
    ///
    /// If an equal value is already stored, its index is returned and `value` is dropped.
    pub fn put(&mut self, value: T) -> usize {
        if let Some(index) = self.find(&value) {
            return index;
        }

        if self.data.len() >= 2 * self.buckets.len() {
            self.grow();
        }

        let bucket = self.bucket_index(Self::hash_of(&value));
        let index = self.data.len();
        // Prepend to the chain.
        self.data.push(Entry {
            value,
            next: self.buckets[bucket],
        });
        self.buckets[bucket] = index + 1;
        index
    }

    /// Double the number of buckets and rebuild all chains.
    fn grow(&mut self) {
        let size = self.buckets.len() * 2;
        self.buckets = vec![0; size];
        self.bitmask = (size - 1) as u64;
        for index in 0..self.data.len() {
            let bucket = self.bucket_index(Self::hash_of(&self.data[index].value));
            self.data[index].next = self.buckets[bucket];
            self.buckets[bucket] = index + 1;
        }
    }
}

impl<T> Index<usize> for Table<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        self.value(index)
    }
}
