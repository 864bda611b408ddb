/// A set of small `usize` indexes backed by a growable bit vector.
#[derive(Debug, Clone, Default)]
pub struct IndexSet {
    words: Vec<u64>,
    len: usize,
}

impl IndexSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, i: usize) -> bool {
        self.words
            .get(i / 64)
            .is_some_and(|word| word & (1 << (i % 64)) != 0)
    }

    /// Returns `true` if the index was not already present.
    pub fn insert(&mut self, i: usize) -> bool {
        let word = i / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }

        let bit = 1 << (i % 64);
        let was_absent = self.words[word] & bit == 0;
        self.words[word] |= bit;
        if was_absent {
            self.len += 1;
        }
        was_absent
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
