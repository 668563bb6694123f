//! Pinned ("regular") picture sets.
//!
//! A set is scoped to a scene, a group or a subgroup and lists picture ids
//! whose bitmaps must survive the unload of their scene. Bitmap blocks carry
//! the id of the set that pins them; clearing a scope clears the sets of every
//! nested scope too.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::model::SceneKey;

/// Identifies one regular set for the blocks it pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RegularSetId(pub u64);

/// Scene, group or subgroup a regular set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegularScope {
    /// Owning scene.
    pub scene: SceneKey,
    /// Group id, when scoped below the scene.
    pub group: Option<u32>,
    /// Subgroup id, when scoped below the group.
    pub subgroup: Option<u32>,
}

impl RegularScope {
    /// Scope covering a whole scene.
    pub fn scene(scene: SceneKey) -> Self {
        Self {
            scene,
            group: None,
            subgroup: None,
        }
    }

    /// True when `other` is this scope or nested inside it.
    pub fn contains(&self, other: &RegularScope) -> bool {
        self.scene == other.scene
            && (self.group.is_none() || self.group == other.group)
            && (self.subgroup.is_none() || self.subgroup == other.subgroup)
    }
}

#[derive(Debug)]
struct RegularSet {
    id: RegularSetId,
    pictures: BTreeSet<u32>,
}

/// All regular sets of a cache.
#[derive(Debug, Default)]
pub struct RegularRegistry {
    sets: BTreeMap<RegularScope, RegularSet>,
    next_id: u64,
}

impl RegularRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `ids` to the set of `scope`, creating it if needed.
    pub fn insert(
        &mut self,
        scope: RegularScope,
        ids: impl IntoIterator<Item = u32>,
    ) -> RegularSetId {
        let next_id = &mut self.next_id;
        let set = self.sets.entry(scope).or_insert_with(|| {
            *next_id += 1;
            RegularSet {
                id: RegularSetId(*next_id),
                pictures: BTreeSet::new(),
            }
        });
        set.pictures.extend(ids);
        set.id
    }

    /// The set pinning picture `id` within `scene`, most specific scope first.
    pub fn lookup(&self, scene: SceneKey, id: u32) -> Option<RegularSetId> {
        self.sets
            .iter()
            .rev()
            .filter(|(scope, _)| scope.scene == scene)
            .find(|(_, set)| set.pictures.contains(&id))
            .map(|(_, set)| set.id)
    }

    /// Removes the sets of `scope` and every nested scope. Returns their ids.
    pub fn clear(&mut self, scope: &RegularScope) -> Vec<RegularSetId> {
        let doomed: Vec<RegularScope> = self
            .sets
            .keys()
            .filter(|s| scope.contains(s))
            .copied()
            .collect();
        doomed
            .iter()
            .filter_map(|s| self.sets.remove(s))
            .map(|set| set.id)
            .collect()
    }

    /// Pinned ids of exactly `scope`.
    pub fn pictures(&self, scope: &RegularScope) -> Vec<u32> {
        self.sets
            .get(scope)
            .map(|s| s.pictures.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of sets.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// True when nothing is pinned.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
