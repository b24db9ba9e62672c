/// Identifier the backend uses to map a picked pixel back to a geometry instance.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PickId(pub u32);

/// Bitset-backed pick-id allocator.
///
/// Allocation hands out the lowest free id, so ids are dense and stable for a
/// given sequence of operations.
///
/// Ordering contract:
/// - Iteration yields ids in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PickIds {
    words: Vec<u64>,
    len: usize,
}

impl PickIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, id: PickId) -> bool {
        let (word, bit) = word_bit(id.0);
        self.words
            .get(word)
            .is_some_and(|w| (w & (1u64 << bit)) != 0)
    }

    pub fn allocate(&mut self) -> PickId {
        let word = self
            .words
            .iter()
            .position(|w| *w != u64::MAX)
            .unwrap_or(self.words.len());
        if word == self.words.len() {
            self.words.push(0);
        }
        let bit = (!self.words[word]).trailing_zeros();
        self.words[word] |= 1u64 << bit;
        self.len += 1;
        PickId(word as u32 * 64 + bit)
    }

    /// Returns `true` if `id` was allocated.
    pub fn release(&mut self, id: PickId) -> bool {
        let (word, bit) = word_bit(id.0);
        let Some(w) = self.words.get_mut(word) else {
            return false;
        };
        let mask = 1u64 << bit;
        if (*w & mask) == 0 {
            return false;
        }
        *w &= !mask;
        self.len -= 1;
        true
    }

    /// Iterates allocated ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = PickId> + '_ {
        PickIdIter {
            words: &self.words,
            word_index: 0,
            current_word: 0,
            base_index: 0,
        }
    }
}

fn word_bit(index: u32) -> (usize, u32) {
    let word = (index / 64) as usize;
    let bit = index % 64;
    (word, bit)
}

struct PickIdIter<'a> {
    words: &'a [u64],
    word_index: usize,
    current_word: u64,
    base_index: u32,
}

impl<'a> Iterator for PickIdIter<'a> {
    type Item = PickId;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current_word != 0 {
                let tz = self.current_word.trailing_zeros();
                self.current_word &= !(1u64 << tz);
                return Some(PickId(self.base_index + tz));
            }

            let w = *self.words.get(self.word_index)?;
            self.current_word = w;
            self.base_index = (self.word_index as u32) * 64;
            self.word_index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PickId, PickIds};

    #[test]
    fn allocates_lowest_free_id() {
        let mut ids = PickIds::new();
        assert_eq!(ids.allocate(), PickId(0));
        assert_eq!(ids.allocate(), PickId(1));
        assert_eq!(ids.allocate(), PickId(2));
        assert!(ids.release(PickId(1)));
        assert!(!ids.release(PickId(1)));
        assert_eq!(ids.allocate(), PickId(1));
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn allocation_crosses_word_boundary() {
        let mut ids = PickIds::new();
        for _ in 0..64 {
            ids.allocate();
        }
        assert_eq!(ids.allocate(), PickId(64));
        let got: Vec<u32> = ids.iter().map(|id| id.0).skip(62).collect();
        assert_eq!(got, vec![62, 63, 64]);
    }
}
