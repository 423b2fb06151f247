//! Generation-tagged id pool.
//!
//! Released ids go back on a free stack and are handed out again with a
//! bumped generation, so a stale `(index, generation)` pair never aliases
//! the new owner of the slot.

/// A slot id as handed out by [`IdPool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotId {
    pub index: u32,
    pub generation: u32,
}

impl SlotId {
    /// Packs the id into a non-zero integer token.
    #[inline(always)]
    pub fn to_token(self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64 + 1)
    }

    #[inline(always)]
    pub fn from_token(token: u64) -> Option<Self> {
        let low = (token & 0xFFFF_FFFF) as u32;
        if low == 0 {
            return None;
        }
        Some(SlotId {
            index: low - 1,
            generation: (token >> 32) as u32,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u32,
    live: bool,
}

#[derive(Debug, Default)]
pub struct IdPool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl IdPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self) -> SlotId {
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                slot.live = true;
                SlotId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    live: true,
                });
                SlotId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// Returns `false` if `id` is not the live owner of its slot.
    pub fn release(&mut self, id: SlotId) -> bool {
        if !self.is_live(id) {
            return false;
        }
        self.slots[id.index as usize].live = false;
        self.free.push(id.index);
        self.live -= 1;
        true
    }

    pub fn is_live(&self, id: SlotId) -> bool {
        self.slots
            .get(id.index as usize)
            .is_some_and(|slot| slot.live && slot.generation == id.generation)
    }

    #[inline(always)]
    pub fn live_count(&self) -> usize {
        self.live
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_bumps_generation() {
        let mut pool = IdPool::new();
        let a = pool.alloc();
        assert!(pool.release(a));
        assert!(!pool.release(a), "double release must be refused");

        let b = pool.alloc();
        assert_eq!(a.index, b.index);
        assert_ne!(a.generation, b.generation);
        assert!(!pool.is_live(a));
        assert!(pool.is_live(b));
        assert_eq!(pool.live_count(), 1);
        assert_eq!(pool.capacity(), 1);
    }

    #[test]
    fn test_token_is_never_zero() {
        let mut pool = IdPool::new();
        let id = pool.alloc();
        assert_ne!(id.to_token(), 0);
        assert_eq!(SlotId::from_token(id.to_token()), Some(id));
        assert_eq!(SlotId::from_token(0), None);
    }
}
