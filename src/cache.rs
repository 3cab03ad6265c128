use std::ops::RangeInclusive;

use crate::schema::{self, Reading, RegisterDefinition};

const WORDS: usize = (u16::MAX as usize + 1) / u64::BITS as usize;

/// One bit for every address in the 16-bit register address space.
#[derive(Clone)]
pub struct RegisterBitmask(Box<[u64; WORDS]>);

impl Default for RegisterBitmask {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBitmask {
    pub fn new() -> Self {
        Self(Box::new([0; WORDS]))
    }

    fn word_bit_mask(address: u16) -> (usize, u64) {
        let word = (u32::from(address) / u64::BITS) as usize;
        let bit_mask = 1 << (u32::from(address) % u64::BITS);
        (word, bit_mask)
    }

    pub fn is_set(&self, address: u16) -> bool {
        let (word, bitmask) = Self::word_bit_mask(address);
        (self.0[word] & bitmask) != 0
    }

    pub fn set(&mut self, address: u16) {
        let (word, bitmask) = Self::word_bit_mask(address);
        self.0[word] |= bitmask;
    }

    pub fn set_range(&mut self, start: u16, count: u16) {
        for offset in 0..count {
            if let Some(address) = start.checked_add(offset) {
                self.set(address);
            }
        }
    }

    pub fn addresses(&self) -> SetBitsIterator<'_> {
        SetBitsIterator::new(self)
    }

    /// Plan the fewest read requests covering all set addresses.
    ///
    /// No range is longer than `max_range_len`. Unless `allow_gaps` is set, ranges only span
    /// consecutive set addresses, as some devices reject reads touching undefined registers.
    /// Among plans with the same number of requests the one reading fewer registers wins, and
    /// after that the one with longer leading ranges.
    pub fn find_ranges(&self, max_range_len: u16, allow_gaps: bool) -> Vec<RangeInclusive<u16>> {
        let set_bits: Vec<u16> = self.addresses().collect();
        let n = set_bits.len();
        if n == 0 || max_range_len == 0 {
            return Vec::new();
        }
        // cost[i] is the (request count, register count) to cover set_bits[i..].
        let mut cost: Vec<(u32, u64)> = vec![(0, 0); n + 1];
        let mut choices: Vec<usize> = vec![0; n];
        for i in (0..n).rev() {
            let mut best_cost = (u32::MAX, u64::MAX);
            let mut best_choice_j = i;
            for j in i..n {
                if !allow_gaps && j > i && set_bits[j] != set_bits[j - 1] + 1 {
                    break;
                }
                let range_len = set_bits[j] - set_bits[i] + 1;
                if range_len > max_range_len {
                    break;
                }
                let rest = cost[j + 1];
                let total = (rest.0 + 1, rest.1 + u64::from(range_len));
                if total <= best_cost {
                    best_cost = total;
                    best_choice_j = j;
                }
            }
            cost[i] = best_cost;
            choices[i] = best_choice_j;
        }
        let mut ranges = Vec::with_capacity(cost[0].0 as usize);
        let mut current = 0;
        while current < n {
            let end = choices[current];
            ranges.push(set_bits[current]..=set_bits[end]);
            current = end + 1;
        }
        ranges
    }
}

pub struct SetBitsIterator<'a> {
    bitmask: &'a RegisterBitmask,
    word_index: usize,
    current_word_val: u64,
}

impl<'a> SetBitsIterator<'a> {
    pub fn new(bitmask: &'a RegisterBitmask) -> Self {
        SetBitsIterator { bitmask, word_index: 0, current_word_val: bitmask.0[0] }
    }
}

impl Iterator for SetBitsIterator<'_> {
    type Item = u16;

    fn next(&mut self) -> Option<Self::Item> {
        while self.current_word_val == 0 {
            self.word_index += 1;
            self.current_word_val = *self.bitmask.0.get(self.word_index)?;
        }
        let bit = self.current_word_val.trailing_zeros() as usize;
        self.current_word_val &= self.current_word_val - 1;
        u16::try_from(self.word_index * u64::BITS as usize + bit).ok()
    }
}

/// The last raw words read from the device.
///
/// Owned by whoever drives the reads; every successful read overwrites the previous words.
pub struct DeviceValues {
    values: Box<[u16]>,
    have_value: RegisterBitmask,
}

impl Default for DeviceValues {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceValues {
    pub fn new() -> Self {
        Self {
            values: vec![0; usize::from(u16::MAX) + 1].into_boxed_slice(),
            have_value: RegisterBitmask::new(),
        }
    }

    pub fn contains(&self, address: u16) -> bool {
        self.have_value.is_set(address)
    }

    pub fn value_of_address(&self, address: u16) -> Option<u16> {
        self.contains(address).then(|| self.values[usize::from(address)])
    }

    /// The words of `register`, if all of them have been read.
    pub fn words_of(&self, register: &RegisterDefinition) -> Option<Vec<u16>> {
        (0..register.length)
            .map(|offset| self.value_of_address(register.address.checked_add(offset)?))
            .collect()
    }

    /// Decode the cached words of `register`, if they were read.
    pub fn reading_of(&self, register: &RegisterDefinition) -> Option<Result<Reading, schema::Error>> {
        self.words_of(register).map(|words| register.decode(&words))
    }

    /// Record a newly read value.
    ///
    /// Returns `true` if the value has changed.
    pub fn set_value(&mut self, address: u16, value: u16) -> bool {
        let index = usize::from(address);
        let changed = value != self.values[index] || !self.have_value.is_set(address);
        self.values[index] = value;
        self.have_value.set(address);
        changed
    }

    /// Record consecutive words starting at `start`; returns how many of them changed.
    pub fn set_values(&mut self, start: u16, words: &[u16]) -> usize {
        (start..=u16::MAX)
            .zip(words)
            .filter(|&(address, &word)| self.set_value(address, word))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{Unit, Value};

    fn mask(addresses: &[u16]) -> RegisterBitmask {
        let mut mask = RegisterBitmask::new();
        for &address in addresses {
            mask.set(address);
        }
        mask
    }

    #[test]
    fn set_bits_are_iterated_in_order() {
        let addresses = [0, 1, 63, 64, 2049, 33024, u16::MAX];
        let mask = mask(&addresses);
        assert_eq!(mask.addresses().collect::<Vec<_>>(), addresses);
        assert!(RegisterBitmask::new().addresses().next().is_none());
    }

    #[test]
    fn ranges_without_gaps() {
        let mask = mask(&[0, 1, 2049, 3840, 3845, 33024, 33025, 33026, 33536, 33537, 33538, 33540]);
        assert_eq!(
            mask.find_ranges(123, false),
            vec![0..=1, 2049..=2049, 3840..=3840, 3845..=3845, 33024..=33026, 33536..=33538, 33540..=33540]
        );
    }

    #[test]
    fn ranges_with_gaps() {
        let mask = mask(&[0, 1, 2049, 3840, 3845, 3850, 33536, 33537, 33538, 33540]);
        assert_eq!(
            mask.find_ranges(123, true),
            vec![0..=1, 2049..=2049, 3840..=3850, 33536..=33540]
        );
    }

    #[test]
    fn ranges_respect_maximum_length() {
        let mut mask = RegisterBitmask::new();
        mask.set_range(33792, 40);
        let ranges = mask.find_ranges(16, false);
        assert_eq!(ranges, vec![33792..=33807, 33808..=33823, 33824..=33831]);
        assert!(mask.find_ranges(0, true).is_empty());
    }

    #[test]
    fn values_are_overwritten() {
        let mut values = DeviceValues::new();
        assert_eq!(values.value_of_address(33024), None);
        assert!(values.set_value(33024, 0));
        assert!(!values.set_value(33024, 0));
        assert!(values.set_value(33024, 420));
        assert_eq!(values.value_of_address(33024), Some(420));
        assert_eq!(values.set_values(33024, &[420, 421, 422]), 2);
        assert!((33024..=33026).all(|a| values.contains(a)));
        assert!(!values.contains(33027));
    }

    #[test]
    fn readings_from_cache() {
        let register = RegisterDefinition::new(33024, "TEMP_S1", "Temp S1").with_unit(Unit::Temperature);
        let mut values = DeviceValues::new();
        assert!(values.reading_of(&register).is_none());
        values.set_value(33024, 420);
        let reading = values.reading_of(&register).unwrap().unwrap();
        assert_eq!(reading.value, Value::Number(42.0));
        values.set_value(33024, 2200);
        assert!(values.reading_of(&register).unwrap().is_err());
    }
}
