//! Shared state for one link: the configuration, the diagnostics sink, and the process-global
//! interners for symbols, COMDAT groups and merged sections. The context is passed by reference
//! throughout; all of the maps use interior mutability so that parsing can run fully in
//! parallel.
//!
//! The interners hand out references whose addresses are stable for the lifetime of the link.
//! Values live in sync arenas that never move or free anything; the tables in front of them
//! only store the references. A key is hashed once, up front: the hash picks one of many
//! locked shards and then drives the probe inside that shard's raw hash table, so concurrent
//! inserts only contend when two threads land on the same shard.

use crate::args::Args;
use crate::diagnostics::Diagnostics;
use crate::string_merging::MergedSection;
use crate::symbol::Symbol;
use hashbrown::HashTable;
use hashbrown::hash_table::Entry;
use std::hash::BuildHasher;
use std::sync::Mutex;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

/// Interner shard count. Far larger than any sensible core count so that concurrent inserts
/// rarely collide.
const SHARD_COUNT: usize = 256;

fn hash_bytes(bytes: &[u8]) -> u64 {
    foldhash::fast::FixedState::default().hash_one(bytes)
}

/// A name (symbol, COMDAT signature or merge piece) with its hash computed once up front. The
/// hash both selects the interner shard and drives the probe within it, so a key's bytes are
/// hashed exactly once no matter how many tables it passes through.
#[derive(Clone, Copy)]
pub(crate) struct InternKey<'data> {
    bytes: &'data [u8],
    hash: u64,
}

impl<'data> InternKey<'data> {
    pub(crate) fn new(bytes: &'data [u8]) -> Self {
        Self {
            bytes,
            hash: hash_bytes(bytes),
        }
    }

    pub(crate) fn bytes(&self) -> &'data [u8] {
        self.bytes
    }

    pub(crate) fn hash(&self) -> u64 {
        self.hash
    }

    /// The hash `new` would store, for probes whose key doesn't need to outlive the table.
    pub(crate) fn hash_of(bytes: &[u8]) -> u64 {
        hash_bytes(bytes)
    }

    fn shard(&self) -> usize {
        self.hash as usize % SHARD_COUNT
    }
}

/// One process-global map from an interned key to an address-stable record.
struct Interner<'data, T> {
    shards: Vec<Mutex<HashTable<(InternKey<'data>, T)>>>,
}

impl<'data, T: Copy> Interner<'data, T> {
    fn new() -> Self {
        let mut shards = Vec::new();
        shards.resize_with(SHARD_COUNT, Default::default);
        Self { shards }
    }

    /// Returns the value for `key`, calling `create` on first sight. The lock is held only for
    /// the probe and, on a miss, the insert.
    fn get_or_insert(&self, key: InternKey<'data>, create: impl FnOnce() -> T) -> T {
        let mut shard = self.shards[key.shard()].lock().unwrap();
        match shard.entry(key.hash, |(k, _)| k.bytes == key.bytes, |(k, _)| k.hash) {
            Entry::Occupied(entry) => entry.get().1,
            Entry::Vacant(entry) => {
                let value = create();
                entry.insert((key, value));
                value
            }
        }
    }

    fn lookup(&self, bytes: &[u8]) -> Option<T> {
        let hash = hash_bytes(bytes);
        let shard = self.shards[hash as usize % SHARD_COUNT].lock().unwrap();
        shard
            .find(hash, |(k, _)| k.bytes == bytes)
            .map(|(_, value)| *value)
    }
}

/// Backing storage for everything that must be address-stable for the whole link. Created by
/// the driver before the context and outlives it.
pub struct Arenas<'data> {
    pub(crate) symbols: colosseum::sync::Arena<Symbol<'data>>,
    pub(crate) comdat_groups: colosseum::sync::Arena<ComdatGroup>,
    pub(crate) merged_sections: colosseum::sync::Arena<MergedSection<'data>>,
    pub(crate) fragments: colosseum::sync::Arena<crate::string_merging::SectionFragment>,

    /// Byte storage for names we synthesize (`__wrap_*`, `name@VERSION`).
    pub(crate) herd: bumpalo_herd::Herd,
}

impl Default for Arenas<'_> {
    fn default() -> Self {
        Self {
            symbols: colosseum::sync::Arena::new(),
            comdat_groups: colosseum::sync::Arena::new(),
            merged_sections: colosseum::sync::Arena::new(),
            fragments: colosseum::sync::Arena::new(),
            herd: bumpalo_herd::Herd::new(),
        }
    }
}

/// A COMDAT group signature's global record. Files that provide the group race to claim it;
/// the file with the smallest priority wins.
pub struct ComdatGroup {
    owner_priority: AtomicU32,
}

impl ComdatGroup {
    pub(crate) fn claim(&self, priority: u32) {
        self.owner_priority.fetch_min(priority, Ordering::Relaxed);
    }

    pub(crate) fn owned_by(&self, priority: u32) -> bool {
        self.owner_priority.load(Ordering::Relaxed) == priority
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct MergedSectionKey<'data> {
    name: &'data [u8],
    flags: u64,
    entsize: u64,
}

pub struct Context<'data> {
    pub args: Args,
    pub diagnostics: Diagnostics,

    arenas: &'data Arenas<'data>,

    symbols: Interner<'data, &'data Symbol<'data>>,
    comdat_groups: Interner<'data, &'data ComdatGroup>,

    merged_sections:
        Mutex<hashbrown::HashMap<MergedSectionKey<'data>, &'data MergedSection<'data>>>,
}

impl<'data> Context<'data> {
    pub fn new(args: Args, arenas: &'data Arenas<'data>) -> Self {
        Self {
            args,
            diagnostics: Diagnostics::default(),
            arenas,
            symbols: Interner::new(),
            comdat_groups: Interner::new(),
            merged_sections: Mutex::new(hashbrown::HashMap::new()),
        }
    }

    /// Returns the unique `Symbol` for `key`, creating it on first sight. `name` is the display
    /// name stored on creation; later calls with the same key return the same record no matter
    /// what name they pass. The returned address is stable for the lifetime of the link.
    pub(crate) fn get_symbol_named(
        &self,
        key: &'data [u8],
        name: &'data [u8],
    ) -> &'data Symbol<'data> {
        self.symbols.get_or_insert(InternKey::new(key), || {
            &*self.arenas.symbols.alloc(Symbol::new(name, self.args.demangle))
        })
    }

    /// Like `get_symbol_named`, deriving the display name by stripping any `@VERSION` suffix
    /// from the key.
    pub(crate) fn get_symbol(&self, key: &'data [u8]) -> &'data Symbol<'data> {
        let name = match memchr::memchr(b'@', key) {
            Some(at) => &key[..at],
            None => key,
        };
        self.get_symbol_named(key, name)
    }

    /// Looks up a symbol without creating it. Only used by tests and by callers that know the
    /// symbol was interned earlier.
    pub(crate) fn lookup_symbol(&self, key: &[u8]) -> Option<&'data Symbol<'data>> {
        self.symbols.lookup(key)
    }

    /// Allocates a symbol that is not interned: locals and the synthesized fragment symbols.
    pub(crate) fn alloc_symbol(&self, name: &'data [u8]) -> &'data Symbol<'data> {
        &*self.arenas.symbols.alloc(Symbol::new(name, self.args.demangle))
    }

    /// Copies `bytes` into storage that lives as long as the link. For names we synthesize.
    pub(crate) fn alloc_bytes(&self, bytes: &[u8]) -> &'data [u8] {
        self.arenas.herd.get().alloc_slice_copy(bytes)
    }

    pub(crate) fn insert_comdat_group(&self, signature: &'data [u8]) -> &'data ComdatGroup {
        self.comdat_groups
            .get_or_insert(InternKey::new(signature), || {
                &*self.arenas.comdat_groups.alloc(ComdatGroup {
                    owner_priority: AtomicU32::new(u32::MAX),
                })
            })
    }

    /// Returns the aggregator that merged-section pieces with this name/flags/entsize land in.
    pub(crate) fn merged_section_instance(
        &self,
        name: &'data [u8],
        flags: crate::elf::SectionFlags,
        entsize: u64,
    ) -> &'data MergedSection<'data> {
        let key = MergedSectionKey {
            name,
            flags: flags.raw(),
            entsize,
        };
        let mut map = self.merged_sections.lock().unwrap();
        *map.entry(key)
            .or_insert_with(|| &*self.arenas.merged_sections.alloc(MergedSection::new(name)))
    }

    pub(crate) fn alloc_fragment(
        &self,
        fragment: crate::string_merging::SectionFragment,
    ) -> &'data crate::string_merging::SectionFragment {
        &*self.arenas.fragments.alloc(fragment)
    }
}
