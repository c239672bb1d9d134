use rand::{Rng as _, SeedableRng as _};
use rand_chacha::ChaCha20Rng;

/// Deterministic Fisher-Yates shuffling driven by a ChaCha20 stream.
///
/// The same entropy always yields the same permutation, which keeps orderings
/// derived from it reproducible across runs and nodes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FisherYatesShuffle {
    pub entropy: [u8; 32],
}

impl FisherYatesShuffle {
    #[must_use]
    pub const fn new(entropy: [u8; 32]) -> Self {
        Self { entropy }
    }

    /// Shuffle `elements` in place with this instance's entropy.
    pub fn apply<T>(&self, elements: &mut [T]) {
        Self::shuffle(elements, self.entropy);
    }

    pub fn shuffle<T>(elements: &mut [T], entropy: [u8; 32]) {
        let mut rng = ChaCha20Rng::from_seed(entropy);
        // https://en.wikipedia.org/wiki/Fisher%E2%80%93Yates_shuffle
        for i in (1..elements.len()).rev() {
            let j = rng.gen_range(0..=i);
            elements.swap(i, j);
        }
    }

    /// Consume `elements` and return them in shuffled order.
    #[must_use]
    pub fn shuffled<T>(&self, mut elements: Vec<T>) -> Vec<T> {
        self.apply(&mut elements);
        elements
    }
}

#[cfg(test)]
mod test {
    use super::FisherYatesShuffle;

    #[test]
    fn same_entropy_same_order() {
        let shuffle = FisherYatesShuffle::new([7u8; 32]);
        let first = shuffle.shuffled((0..64).collect::<Vec<u32>>());
        let second = shuffle.shuffled((0..64).collect::<Vec<u32>>());
        assert_eq!(first, second);
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let shuffle = FisherYatesShuffle::new([1u8; 32]);
        let mut shuffled = shuffle.shuffled((0..100).collect::<Vec<u32>>());
        assert_ne!(shuffled, (0..100).collect::<Vec<u32>>());
        shuffled.sort_unstable();
        assert_eq!(shuffled, (0..100).collect::<Vec<u32>>());
    }

    #[test]
    fn different_entropy_different_order() {
        let elements: Vec<u32> = (0..100).collect();
        let a = FisherYatesShuffle::new([1u8; 32]).shuffled(elements.clone());
        let b = FisherYatesShuffle::new([2u8; 32]).shuffled(elements);
        assert_ne!(a, b);
    }

    #[test]
    fn trivial_inputs() {
        let shuffle = FisherYatesShuffle::new([0u8; 32]);
        assert!(shuffle.shuffled(Vec::<u8>::new()).is_empty());
        assert_eq!(shuffle.shuffled(vec![42u8]), vec![42u8]);
    }
}
