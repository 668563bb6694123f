//! Generational slot storage backing the pools and the arena list.

use super::id::SlotKey;

#[derive(Debug)]
struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

/// Vector of slots with a free list. Freed slots are reused with a bumped
/// generation, so stale keys never alias a newer value.
#[derive(Debug)]
pub(crate) struct Slots<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Slots<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub(crate) fn insert(&mut self, value: T) -> SlotKey {
        self.len += 1;
        if let Some(index) = self.free.pop()
            && let Some(entry) = self.entries.get_mut(index as usize)
        {
            entry.value = Some(value);
            return SlotKey::new(index, entry.generation);
        }
        let index = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
        self.entries.push(Entry {
            generation: 0,
            value: Some(value),
        });
        SlotKey::new(index, 0)
    }

    pub(crate) fn get(&self, key: SlotKey) -> Option<&T> {
        self.entries
            .get(key.index() as usize)
            .filter(|e| e.generation == key.generation())
            .and_then(|e| e.value.as_ref())
    }

    pub(crate) fn get_mut(&mut self, key: SlotKey) -> Option<&mut T> {
        self.entries
            .get_mut(key.index() as usize)
            .filter(|e| e.generation == key.generation())
            .and_then(|e| e.value.as_mut())
    }

    pub(crate) fn remove(&mut self, key: SlotKey) -> Option<T> {
        let entry = self
            .entries
            .get_mut(key.index() as usize)
            .filter(|e| e.generation == key.generation())?;
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(key.index());
        self.len -= 1;
        Some(value)
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (SlotKey, &T)> {
        self.entries.iter().enumerate().filter_map(|(i, e)| {
            e.value
                .as_ref()
                .map(|v| (SlotKey::new(i as u32, e.generation), v))
        })
    }

    pub(crate) fn keys(&self) -> Vec<SlotKey> {
        self.iter().map(|(k, _)| k).collect()
    }
}
