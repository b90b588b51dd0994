//! Static variant descriptors and specificity-ordered tables.
//!
//! Actions, drivers and action results identify their kind with a
//! [`Variant`]: a named node in a DAG of super-variants. Mapper lookup walks
//! that hierarchy and must try the most specific registration first.

use std::fmt;

/// Static descriptor of a variant and its direct super-variants.
///
/// ```
/// use rt_mapping::Variant;
///
/// static MOTION: Variant = Variant::root("Motion");
/// static PTP: Variant = Variant::new("PointToPoint", &[&MOTION]);
///
/// assert!(PTP.is_a(&MOTION));
/// assert!(!MOTION.is_a(&PTP));
/// ```
pub struct Variant {
    pub name: &'static str,
    pub parents: &'static [&'static Variant],
}

impl Variant {
    pub const fn root(name: &'static str) -> Self {
        Self {
            name,
            parents: &[],
        }
    }

    pub const fn new(name: &'static str, parents: &'static [&'static Variant]) -> Self {
        Self { name, parents }
    }

    /// Whether `self` is `other` or one of its (transitive) sub-variants.
    pub fn is_a(&self, other: &Variant) -> bool {
        let mut stack: Vec<&Variant> = vec![self];
        while let Some(v) = stack.pop() {
            if v == other {
                return true;
            }
            stack.extend(v.parents.iter().copied());
        }
        false
    }

    /// `is_a` without equality.
    pub fn is_strictly_a(&self, other: &Variant) -> bool {
        self != other && self.is_a(other)
    }
}

/// Variants are identified by name.
impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Variant {}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Variant({})", self.name)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Values keyed by variant, kept most-specific-first.
///
/// A new key is inserted before the first existing key it is strictly more
/// specific than, otherwise appended. Values registered under the same key
/// keep registration order.
pub struct VariantTable<T> {
    entries: Vec<(&'static Variant, Vec<T>)>,
}

impl<T> VariantTable<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, key: &'static Variant, value: T) {
        self.entry(key).push(value);
    }

    /// Values list for `key`, creating the key in specificity order.
    pub fn entry(&mut self, key: &'static Variant) -> &mut Vec<T> {
        let pos = match self.entries.iter().position(|(k, _)| *k == key) {
            Some(pos) => pos,
            None => {
                let pos = self
                    .entries
                    .iter()
                    .position(|(k, _)| key.is_strictly_a(k))
                    .unwrap_or(self.entries.len());
                self.entries.insert(pos, (key, Vec::new()));
                pos
            }
        };
        &mut self.entries[pos].1
    }

    /// Values whose key `variant` is a (sub-)variant of, most specific first.
    pub fn lookup<'a>(&'a self, variant: &'a Variant) -> impl Iterator<Item = &'a T> + 'a {
        self.matching_keys(variant).flat_map(|(_, values)| values.iter())
    }

    /// Matching keys with their values, most specific first.
    pub fn matching_keys<'a>(
        &'a self,
        variant: &'a Variant,
    ) -> impl Iterator<Item = (&'static Variant, &'a Vec<T>)> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| variant.is_a(k))
            .map(|(k, v)| (*k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static Variant> + '_ {
        self.entries.iter().map(|(k, _)| *k)
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, v)| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|(_, v)| v.is_empty())
    }
}

impl<T> Default for VariantTable<T> {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    static V0: Variant = Variant::root("V0");
    static V1: Variant = Variant::new("V1", &[&V0]);
    static V2: Variant = Variant::new("V2", &[&V1]);
    static V3: Variant = Variant::new("V3", &[&V2]);
    static V4: Variant = Variant::new("V4", &[&V3]);
    static CHAIN: [&Variant; 5] = [&V0, &V1, &V2, &V3, &V4];

    proptest! {
        /// Whatever the registration order along a chain, lookup from the
        /// deepest variant returns handlers from most to least specific.
        #[test]
        fn chain_lookup_is_sorted_by_depth(
            order in Just((0..5usize).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let mut table = VariantTable::new();
            for &depth in &order {
                table.insert(CHAIN[depth], depth);
            }
            let found: Vec<usize> = table.lookup(&V4).copied().collect();
            prop_assert_eq!(found, vec![4, 3, 2, 1, 0]);
        }
    }
}
