use std::{marker::PhantomData, mem, num::NonZero, ops};

pub type Index = u32;
pub type Generation = u32;

/// A slot index paired with the generation that occupied it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RawId {
    index: Index,
    generation: NonZero<Generation>,
}

impl RawId {
    #[inline]
    pub fn index(&self) -> Index {
        self.index
    }
}

/// Keys usable with `IdMap` and `SecondaryMap`. Usually implemented through `new_id_type!`.
pub trait Key: Copy {
    fn from_raw(raw: RawId) -> Self;
    fn raw(self) -> RawId;
}

impl Key for RawId {
    #[inline]
    fn from_raw(raw: RawId) -> Self {
        raw
    }

    #[inline]
    fn raw(self) -> RawId {
        self
    }
}

/// An arena with generational keys.
///
/// Slots of removed entries are re-used with a bumped generation, so a lookup with a stale key
/// fails instead of observing whatever value now lives in the slot.
#[derive(Debug, Clone)]
pub struct IdMap<K, V> {
    slots: Vec<Slot<V>>,
    next_free: Option<Index>,
    occupancy: usize,
    _key: PhantomData<fn(K) -> K>,
}

#[derive(Debug, Clone)]
enum Slot<V> {
    Occupied {
        value: V,
        generation: NonZero<Generation>,
    },
    Vacant {
        next_free: Option<Index>,
        last_generation: Generation,
    },
}

impl<K, V> Default for IdMap<K, V> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            next_free: None,
            occupancy: 0,
            _key: PhantomData,
        }
    }
}

impl<K: Key, V> IdMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: V) -> K {
        let raw = match self.next_free {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                let Slot::Vacant {
                    next_free,
                    last_generation,
                } = *slot
                else {
                    panic!("occupied slot in free list");
                };

                let generation = last_generation
                    .checked_add(1)
                    .and_then(NonZero::new)
                    .expect("too many generations");
                *slot = Slot::Occupied { value, generation };
                self.next_free = next_free;
                RawId { index, generation }
            }
            None => {
                let index: Index = self
                    .slots
                    .len()
                    .try_into()
                    .expect("too many IdMap entries");
                let generation = NonZero::<Generation>::MIN;
                self.slots.push(Slot::Occupied { value, generation });
                RawId { index, generation }
            }
        };

        self.occupancy += 1;
        K::from_raw(raw)
    }

    pub fn remove(&mut self, key: K) -> Option<V> {
        let raw = key.raw();
        let slot = self.slots.get_mut(raw.index as usize)?;
        if !matches!(slot, Slot::Occupied { generation, .. } if *generation == raw.generation) {
            return None;
        }

        let vacant = Slot::Vacant {
            next_free: self.next_free,
            last_generation: raw.generation.get(),
        };
        let Slot::Occupied { value, .. } = mem::replace(slot, vacant) else {
            unreachable!()
        };

        self.next_free = Some(raw.index);
        self.occupancy -= 1;
        Some(value)
    }

    #[inline]
    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    #[inline]
    pub fn get(&self, key: K) -> Option<&V> {
        let raw = key.raw();
        match self.slots.get(raw.index as usize)? {
            Slot::Occupied { value, generation } if *generation == raw.generation => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        let raw = key.raw();
        match self.slots.get_mut(raw.index as usize)? {
            Slot::Occupied { value, generation } if *generation == raw.generation => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.occupancy
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.occupancy == 0
    }

    /// Live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { value, generation } => {
                    let raw = RawId {
                        index: index as Index,
                        generation: *generation,
                    };
                    Some((K::from_raw(raw), value))
                }
                Slot::Vacant { .. } => None,
            })
    }

    pub fn ids(&self) -> impl Iterator<Item = K> + '_ {
        self.iter().map(|(key, _)| key)
    }
}

impl<K: Key, V> ops::Index<K> for IdMap<K, V> {
    type Output = V;

    #[inline]
    fn index(&self, key: K) -> &V {
        self.get(key).expect("no such id in `IdMap`")
    }
}

impl<K: Key, V> ops::IndexMut<K> for IdMap<K, V> {
    #[inline]
    fn index_mut(&mut self, key: K) -> &mut V {
        self.get_mut(key).expect("no such id in `IdMap`")
    }
}

/// Side table for keys handed out by some `IdMap`.
///
/// An entry stored for a since-removed key is invisible to the key that re-used its slot.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K, V> {
    slots: Vec<Option<(NonZero<Generation>, V)>>,
    occupancy: usize,
    _key: PhantomData<fn(K) -> K>,
}

impl<K, V> Default for SecondaryMap<K, V> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            occupancy: 0,
            _key: PhantomData,
        }
    }
}

impl<K: Key, V> SecondaryMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` for `key`, returning whatever was stored in the same slot, even under an
    /// older generation.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let raw = key.raw();
        let index = raw.index as usize;
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, || None);
        }

        let prev = self.slots[index].replace((raw.generation, value));
        if prev.is_none() {
            self.occupancy += 1;
        }
        prev.map(|(_, value)| value)
    }

    #[inline]
    pub fn get(&self, key: K) -> Option<&V> {
        let raw = key.raw();
        match self.slots.get(raw.index as usize)? {
            Some((generation, value)) if *generation == raw.generation => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.occupancy
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.occupancy == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_ids_never_alias_new_entries() {
        let mut map = IdMap::<RawId, _>::new();

        let a = map.insert("a");
        let b = map.insert("b");
        assert_eq!(map.len(), 2);

        assert_eq!(map.remove(a), Some("a"));
        assert_eq!(map.remove(a), None);

        let c = map.insert("c");
        assert_eq!(c.index(), a.index());
        assert_ne!(c, a);

        assert!(!map.contains(a));
        assert_eq!(map.get(a), None);
        assert_eq!(map.get(c), Some(&"c"));
        assert_eq!(map[b], "b");
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn iteration_skips_vacant_slots() {
        let mut map = IdMap::<RawId, _>::new();
        let ids = (0..5).map(|i| map.insert(i)).collect::<Vec<_>>();
        map.remove(ids[1]);
        map.remove(ids[3]);

        assert_eq!(map.iter().map(|(_, v)| *v).collect::<Vec<_>>(), vec![0, 2, 4]);
        assert_eq!(map.ids().collect::<Vec<_>>(), vec![ids[0], ids[2], ids[4]]);

        *map.get_mut(ids[2]).unwrap() = 20;
        map[ids[4]] += 40;
        assert_eq!(map.iter().map(|(_, v)| *v).collect::<Vec<_>>(), vec![0, 20, 44]);
    }

    #[test]
    fn secondary_map_tracks_generations() {
        let mut map = IdMap::<RawId, _>::new();
        let a = map.insert(1);
        let b = map.insert(2);

        let mut side = SecondaryMap::new();
        assert!(side.insert(a, 10).is_none());
        assert!(side.insert(b, 20).is_none());
        assert_eq!(side.len(), 2);

        map.remove(a);
        let c = map.insert(3);
        assert_eq!(side.get(c), None);
        assert_eq!(side.get(a), Some(&10));
        assert_eq!(side.insert(c, 30), Some(10));
        assert_eq!(side.get(a), None);
        assert_eq!(side.get(c), Some(&30));
        assert_eq!(side.len(), 2);
        assert!(!side.is_empty());
    }
}
