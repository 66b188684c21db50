//! Correlation tags and the generation-checked arena that issues them.

use std::fmt;

use slab::Slab;

/// Opaque correlation token linking a completion event to the call it terminates.
///
/// A tag packs an arena index with the generation its slot carried when the tag
/// was issued. Indices are recycled once a call is released, generations are not,
/// so a retired tag never matches the next occupant of its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
	index: u32,
	generation: u32,
}

impl Tag {
	pub(crate) const fn new(index: u32, generation: u32) -> Self {
		Self { index, generation }
	}

	/// Packs the tag into a single integer, for transports that carry tags as words.
	#[must_use]
	pub const fn into_raw(self) -> u64 {
		((self.generation as u64) << 32) | self.index as u64
	}

	/// Rebuilds a tag from [`Tag::into_raw`] output.
	#[must_use]
	pub const fn from_raw(raw: u64) -> Self {
		Self {
			index: raw as u32,
			generation: (raw >> 32) as u32,
		}
	}

	/// Arena slot the tag points at.
	pub(crate) const fn index(self) -> usize {
		self.index as usize
	}

	/// Generation the slot carried when the tag was issued.
	pub const fn generation(self) -> u32 {
		self.generation
	}
}

impl fmt::Display for Tag {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "tag#{}.{}", self.index, self.generation)
	}
}

/// Monotonic generation counter. Zero is never issued.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct GenerationCounter(u32);

impl GenerationCounter {
	/// Returns the next generation and advances the counter.
	#[allow(clippy::should_implement_trait, reason = "convention")]
	pub fn next(&mut self) -> u32 {
		self.0 = self.0.wrapping_add(1);
		if self.0 == 0 {
			self.0 = 1;
		}
		self.0
	}
}

struct Entry<T> {
	generation: u32,
	value: T,
}

/// Index table mapping live tags to per-call state.
pub(crate) struct TagArena<T> {
	slots: Slab<Entry<T>>,
	generations: GenerationCounter,
}

impl<T> Default for TagArena<T> {
	fn default() -> Self {
		Self {
			slots: Slab::new(),
			generations: GenerationCounter::default(),
		}
	}
}

impl<T> TagArena<T> {
	/// Stores `value` under a fresh tag.
	///
	/// Returns `None` once the arena holds `u32::MAX` live entries.
	pub fn insert(&mut self, value: T) -> Option<Tag> {
		let vacant = self.slots.vacant_entry();
		let index = u32::try_from(vacant.key()).ok()?;
		let generation = self.generations.next();
		vacant.insert(Entry { generation, value });
		Some(Tag::new(index, generation))
	}

	pub fn get(&self, tag: Tag) -> Option<&T> {
		self.slots
			.get(tag.index())
			.filter(|entry| entry.generation == tag.generation)
			.map(|entry| &entry.value)
	}

	pub fn get_mut(&mut self, tag: Tag) -> Option<&mut T> {
		self.slots
			.get_mut(tag.index())
			.filter(|entry| entry.generation == tag.generation)
			.map(|entry| &mut entry.value)
	}

	/// Removes the entry for `tag`. Stale tags leave the arena untouched.
	pub fn remove(&mut self, tag: Tag) -> Option<T> {
		self.get(tag)?;
		Some(self.slots.remove(tag.index()).value)
	}

	pub fn iter_mut(&mut self) -> impl Iterator<Item = (Tag, &mut T)> {
		self.slots.iter_mut().map(|(index, entry)| {
			// Slab keys originate from `insert`, which already checked the u32 range.
			(Tag::new(index as u32, entry.generation), &mut entry.value)
		})
	}

	pub fn retain(&mut self, mut keep: impl FnMut(&mut T) -> bool) {
		self.slots.retain(|_, entry| keep(&mut entry.value));
	}

	pub fn len(&self) -> usize {
		self.slots.len()
	}
}
