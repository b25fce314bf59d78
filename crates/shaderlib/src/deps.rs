/// Growable bitset of library slot indices.
///
/// Unions are word-wise, so expanding a dependency closure costs one pass over
/// the registered slots regardless of how deep the require chains go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepSet {
    words: Vec<u64>,
}

const WORD_BITS: usize = u64::BITS as usize;

impl DepSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, slot: usize) {
        let word = slot / WORD_BITS;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (slot % WORD_BITS);
    }

    pub fn contains(&self, slot: usize) -> bool {
        self.words
            .get(slot / WORD_BITS)
            .is_some_and(|word| word & (1u64 << (slot % WORD_BITS)) != 0)
    }

    pub fn union_with(&mut self, other: &DepSet) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst |= *src;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Slot indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(index, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let offset = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(index * WORD_BITS + offset)
            })
        })
    }
}

impl FromIterator<usize> for DepSet {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        let mut set = DepSet::new();
        for slot in iter {
            set.insert(slot);
        }
        set
    }
}
