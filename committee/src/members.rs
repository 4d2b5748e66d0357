//! Distance-ordered committee seats

use mosaic_core::{Address, Distance};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Members ordered ascending by distance, bounded to a capacity
///
/// Ties on distance are broken by address so the order is total.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemberList {
    capacity: usize,
    ordered: BTreeSet<(Distance, Address)>,
    distances: HashMap<Address, Distance>,
}

impl MemberList {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ordered: BTreeSet::new(),
            distances: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.distances.contains_key(address)
    }

    pub fn distance_of(&self, address: &Address) -> Option<Distance> {
        self.distances.get(address).copied()
    }

    /// Member with the largest distance
    pub fn farthest(&self) -> Option<(Distance, Address)> {
        self.ordered.iter().next_back().copied()
    }

    /// Member immediately closer than `further`, or the farthest member when
    /// `further` is the infinite end
    pub fn closer_neighbour(&self, further: Option<&(Distance, Address)>) -> Option<(Distance, Address)> {
        match further {
            Some(key) => self.ordered.range(..*key).next_back().copied(),
            None => self.farthest(),
        }
    }

    /// First member strictly farther than `distance`
    pub fn first_farther(&self, distance: &Distance, address: &Address) -> Option<(Distance, Address)> {
        self.ordered
            .range((
                std::ops::Bound::Excluded((*distance, *address)),
                std::ops::Bound::Unbounded,
            ))
            .next()
            .copied()
    }

    /// Seat a member, evicting the farthest one when over capacity
    ///
    /// Returns the evicted member.
    pub fn insert(&mut self, address: Address, distance: Distance) -> Option<Address> {
        self.ordered.insert((distance, address));
        self.distances.insert(address, distance);
        if self.ordered.len() > self.capacity {
            let farthest = self.ordered.iter().next_back().copied()?;
            self.ordered.remove(&farthest);
            self.distances.remove(&farthest.1);
            return Some(farthest.1);
        }
        None
    }

    /// Members, closest first
    pub fn iter(&self) -> impl Iterator<Item = &(Distance, Address)> {
        self.ordered.iter()
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.ordered.iter().map(|(_, address)| *address).collect()
    }
}
