use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::config::{CacheConfig, PolicyKind};
use crate::hawkeye::Hawkeye;
use crate::lfsr::Lfsr;
use crate::proc::PcSource;
use crate::replacement_policies::{LeastRecentlyUsed, LinearEvict, RandomEvict, ReplacementPolicy};
use crate::stats::CacheStats;

/// Bit 63 of a tag word: the slot holds a line.
pub const VALID: u64 = 1 << 63;
/// Bit 62 of a tag word: the line has been written since it was filled.
pub const DIRTY: u64 = 1 << 62;

/// The backing store shared by every set-associative policy: a flat array of
/// `sets * ways` packed tag words, addressed as `tags[set * ways + way]`.
///
/// A tag word carries the full shifted address (index bits included) in its
/// low bits plus the VALID and DIRTY flags above; a cleared word is an empty
/// slot. Lookups compare with DIRTY masked out, so a store leaves the line
/// findable. Physical addresses stay far below bit 62, so the payload can
/// never collide with the flag bits.
#[derive(Debug, Clone)]
pub struct TagArray {
    sets: u64,
    ways: u64,
    linesz: u64,
    idx_shift: u32,
    tags: Vec<u64>,
}

impl TagArray {
    pub fn new(sets: u64, ways: u64, linesz: u64) -> Self {
        Self {
            sets,
            ways,
            linesz,
            idx_shift: linesz.trailing_zeros(),
            tags: vec![0; (sets * ways) as usize],
        }
    }

    pub fn sets(&self) -> u64 {
        self.sets
    }

    pub fn ways(&self) -> u64 {
        self.ways
    }

    pub fn line_size(&self) -> u64 {
        self.linesz
    }

    pub fn idx_shift(&self) -> u32 {
        self.idx_shift
    }

    /// The set an address maps to.
    pub fn set_index(&self, addr: u64) -> usize {
        ((addr >> self.idx_shift) & (self.sets - 1)) as usize
    }

    /// The tag word a resident copy of `addr`'s line would carry (clean).
    pub fn tag_for(&self, addr: u64) -> u64 {
        (addr >> self.idx_shift) | VALID
    }

    /// Scans `addr`'s set for its line, returning the matching slot.
    pub fn lookup(&mut self, addr: u64) -> Option<&mut u64> {
        let base = self.set_index(addr) * self.ways as usize;
        let tag = self.tag_for(addr);
        self.tags[base..base + self.ways as usize]
            .iter_mut()
            .find(|slot| **slot & !DIRTY == tag)
    }

    /// Like [`TagArray::lookup`], but reports which way holds the line.
    pub fn find_way(&self, addr: u64) -> Option<usize> {
        let base = self.set_index(addr) * self.ways as usize;
        let tag = self.tag_for(addr);
        self.tags[base..base + self.ways as usize]
            .iter()
            .position(|slot| slot & !DIRTY == tag)
    }

    /// Overwrites a slot with `addr`'s (clean) tag, returning the displaced
    /// tag word.
    pub fn install(&mut self, set: usize, way: usize, addr: u64) -> u64 {
        let tag = self.tag_for(addr);
        let slot = &mut self.tags[set * self.ways as usize + way];
        let victim = *slot;
        *slot = tag;
        victim
    }

    #[cfg(test)]
    pub(crate) fn set_slots(&self, set: usize) -> &[u64] {
        let base = set * self.ways as usize;
        &self.tags[base..base + self.ways as usize]
    }
}

/// State common to every cache variant: identity, counters, the optional
/// downstream miss handler, and the processor hook.
///
/// The statistics report is tied to destruction, so a hierarchy emits its
/// numbers exactly once, as it is torn down.
pub struct CacheCore {
    name: String,
    stats: CacheStats,
    miss_handler: Option<CacheRef>,
    pc_source: Option<Rc<dyn PcSource>>,
    log: bool,
}

impl CacheCore {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stats: CacheStats::default(),
            miss_handler: None,
            pc_source: None,
            log: false,
        }
    }

    /// A copy with the same identity and processor hook but fresh counters
    /// and no downstream link.
    fn fork(&self) -> Self {
        Self {
            name: self.name.clone(),
            stats: CacheStats::default(),
            miss_handler: None,
            pc_source: self.pc_source.clone(),
            log: false,
        }
    }

    fn read_pc(&self) -> Option<u64> {
        self.pc_source.as_ref().map(|proc| proc.pc())
    }
}

impl Drop for CacheCore {
    fn drop(&mut self) {
        self.stats.print(&self.name);
    }
}

/// The uniform surface the shared access algorithm runs against: a tag
/// lookup that may update policy state first, and victim selection that
/// installs the incoming line.
pub(crate) trait CacheModel {
    fn core_mut(&mut self) -> &mut CacheCore;
    fn line_size(&self) -> u64;
    fn idx_shift(&self) -> u32;
    fn check_tag(&mut self, addr: u64) -> Option<&mut u64>;
    fn victimize(&mut self, addr: u64) -> u64;
}

/// The access algorithm every variant shares.
///
/// Counters are bumped unconditionally; a hit only needs its DIRTY bit
/// refreshed. On a miss the policy picks and replaces a victim, and a victim
/// that was both valid and dirty is written back to the downstream cache
/// (when one is wired) before the fill for the new line is forwarded. Both
/// downstream accesses are line-aligned and line-sized. A storing access
/// finally marks the freshly installed line dirty through a second lookup.
fn run_access<C: CacheModel>(cache: &mut C, addr: u64, bytes: u32, store: bool) {
    {
        let stats = &mut cache.core_mut().stats;
        if store {
            stats.write_accesses += 1;
            stats.bytes_written += u64::from(bytes);
        } else {
            stats.read_accesses += 1;
            stats.bytes_read += u64::from(bytes);
        }
    }

    if let Some(tag) = cache.check_tag(addr) {
        if store {
            *tag |= DIRTY;
        }
        return;
    }

    let linesz = cache.line_size();
    let idx_shift = cache.idx_shift();
    let core = cache.core_mut();
    if store {
        core.stats.write_misses += 1;
    } else {
        core.stats.read_misses += 1;
    }
    if core.log {
        log::debug!(
            target: core.name.as_str(),
            "{} miss {addr:#x}",
            if store { "write" } else { "read" }
        );
    }

    let victim = cache.victimize(addr);

    if victim & (VALID | DIRTY) == (VALID | DIRTY) {
        let dirty_addr = (victim & !(VALID | DIRTY)) << idx_shift;
        if let Some(downstream) = cache.core_mut().miss_handler.clone() {
            downstream.borrow_mut().access(dirty_addr, linesz as u32, true);
        }
        cache.core_mut().stats.writebacks += 1;
    }

    if let Some(downstream) = cache.core_mut().miss_handler.clone() {
        downstream.borrow_mut().access(addr & !(linesz - 1), linesz as u32, false);
    }

    if store {
        if let Some(tag) = cache.check_tag(addr) {
            *tag |= DIRTY;
        }
    }
}

/// A set-associative cache parameterised by its replacement policy.
///
/// Monomorphisation keeps the policy hooks inlineable; the enum wrapper
/// below branches once per access instead of sending every hook through a
/// vtable.
pub struct Cache<P: ReplacementPolicy> {
    pub(crate) core: CacheCore,
    pub(crate) tags: TagArray,
    pub(crate) policy: P,
}

impl<P: ReplacementPolicy> Cache<P> {
    pub fn new(sets: u64, ways: u64, linesz: u64, name: &str, policy: P) -> Self {
        Self {
            core: CacheCore::new(name),
            tags: TagArray::new(sets, ways, linesz),
            policy,
        }
    }

    pub fn access(&mut self, addr: u64, bytes: u32, store: bool) {
        run_access(self, addr, bytes, store);
    }

    /// Deep copy with counters reset and the downstream link dropped. The
    /// policy state (LFSR register included) carries over, so the fork
    /// replays the original's victim sequence.
    pub fn fork(&self) -> Self
    where
        P: Clone,
    {
        Self {
            core: self.core.fork(),
            tags: self.tags.clone(),
            policy: self.policy.clone(),
        }
    }
}

impl<P: ReplacementPolicy> CacheModel for Cache<P> {
    fn core_mut(&mut self) -> &mut CacheCore {
        &mut self.core
    }

    fn line_size(&self) -> u64 {
        self.tags.line_size()
    }

    fn idx_shift(&self) -> u32 {
        self.tags.idx_shift()
    }

    fn check_tag(&mut self, addr: u64) -> Option<&mut u64> {
        let pc = self.core.read_pc();
        self.policy.on_access(&mut self.tags, addr, pc);
        self.tags.lookup(addr)
    }

    fn victimize(&mut self, addr: u64) -> u64 {
        let pc = self.core.read_pc();
        self.policy.victimize(&mut self.tags, addr, pc)
    }
}

/// Fully-associative variant: a single set whose slots live in an ordered
/// map keyed by tag payload rather than a scanned array.
pub struct FaCache {
    pub(crate) core: CacheCore,
    ways: u64,
    linesz: u64,
    idx_shift: u32,
    pub(crate) tags: BTreeMap<u64, u64>,
    lfsr: Lfsr,
}

impl FaCache {
    pub fn new(ways: u64, linesz: u64, name: &str) -> Self {
        Self {
            core: CacheCore::new(name),
            ways,
            linesz,
            idx_shift: linesz.trailing_zeros(),
            tags: BTreeMap::new(),
            lfsr: Lfsr::new(),
        }
    }

    pub fn access(&mut self, addr: u64, bytes: u32, store: bool) {
        run_access(self, addr, bytes, store);
    }

    pub fn fork(&self) -> Self {
        Self {
            core: self.core.fork(),
            ways: self.ways,
            linesz: self.linesz,
            idx_shift: self.idx_shift,
            tags: self.tags.clone(),
            lfsr: self.lfsr.clone(),
        }
    }
}

impl CacheModel for FaCache {
    fn core_mut(&mut self) -> &mut CacheCore {
        &mut self.core
    }

    fn line_size(&self) -> u64 {
        self.linesz
    }

    fn idx_shift(&self) -> u32 {
        self.idx_shift
    }

    fn check_tag(&mut self, addr: u64) -> Option<&mut u64> {
        self.tags.get_mut(&(addr >> self.idx_shift))
    }

    fn victimize(&mut self, addr: u64) -> u64 {
        let mut old_tag = 0;
        if self.tags.len() as u64 == self.ways {
            // The victim position counts through ascending tag payloads, not
            // insertion or recency order.
            let position = (u64::from(self.lfsr.next()) % self.ways) as usize;
            if let Some(&key) = self.tags.keys().nth(position) {
                old_tag = self.tags.remove(&key).unwrap_or(0);
            }
        }
        let payload = addr >> self.idx_shift;
        self.tags.insert(payload, payload | VALID);
        old_tag
    }
}

/// A shareable handle to a cache; the downstream side of a miss-handler link
/// holds one of these.
pub type CacheRef = Rc<RefCell<GenericCache>>;

/// Enum over every cache variant the factory can produce, plus LRU, which is
/// only reachable through the library API.
///
/// Trait objects would shrink this file, but the per-record dispatch cost is
/// measurable on long traces; branching on the concrete type keeps the whole
/// access path visible to the compiler.
pub enum GenericCache {
    Random(Cache<RandomEvict>),
    Linear(Cache<LinearEvict>),
    LeastRecentlyUsed(Cache<LeastRecentlyUsed>),
    Hawkeye(Cache<Hawkeye>),
    FullyAssociative(FaCache),
}

impl From<Cache<RandomEvict>> for GenericCache {
    fn from(value: Cache<RandomEvict>) -> Self {
        Self::Random(value)
    }
}

impl From<Cache<LinearEvict>> for GenericCache {
    fn from(value: Cache<LinearEvict>) -> Self {
        Self::Linear(value)
    }
}

impl From<Cache<LeastRecentlyUsed>> for GenericCache {
    fn from(value: Cache<LeastRecentlyUsed>) -> Self {
        Self::LeastRecentlyUsed(value)
    }
}

impl From<Cache<Hawkeye>> for GenericCache {
    fn from(value: Cache<Hawkeye>) -> Self {
        Self::Hawkeye(value)
    }
}

impl From<FaCache> for GenericCache {
    fn from(value: FaCache) -> Self {
        Self::FullyAssociative(value)
    }
}

impl GenericCache {
    /// Parses a `sets:ways:linesz[:policy]` configuration string and builds
    /// the cache it describes.
    pub fn construct(config: &str, name: &str) -> Result<Self, String> {
        let config: CacheConfig = config.parse()?;
        Ok(Self::from_config(&config, name))
    }

    /// Builds a cache from an already validated configuration.
    ///
    /// An explicit policy always wins. Without one, a single large set gets
    /// the map-backed fully-associative shape and everything else random
    /// eviction.
    pub fn from_config(config: &CacheConfig, name: &str) -> Self {
        let CacheConfig {
            sets,
            ways,
            linesz,
            policy,
        } = *config;
        match policy {
            Some(PolicyKind::Linear) => {
                Cache::new(sets, ways, linesz, name, LinearEvict::new(sets)).into()
            }
            Some(PolicyKind::Hawkeye) => {
                Cache::new(sets, ways, linesz, name, Hawkeye::new(sets, ways)).into()
            }
            None if ways > 4 && sets == 1 => FaCache::new(ways, linesz, name).into(),
            None => Cache::new(sets, ways, linesz, name, RandomEvict::new()).into(),
        }
    }

    fn core(&self) -> &CacheCore {
        match self {
            GenericCache::Random(c) => &c.core,
            GenericCache::Linear(c) => &c.core,
            GenericCache::LeastRecentlyUsed(c) => &c.core,
            GenericCache::Hawkeye(c) => &c.core,
            GenericCache::FullyAssociative(c) => &c.core,
        }
    }

    fn core_mut(&mut self) -> &mut CacheCore {
        match self {
            GenericCache::Random(c) => &mut c.core,
            GenericCache::Linear(c) => &mut c.core,
            GenericCache::LeastRecentlyUsed(c) => &mut c.core,
            GenericCache::Hawkeye(c) => &mut c.core,
            GenericCache::FullyAssociative(c) => &mut c.core,
        }
    }

    /// Runs one access against this cache. `addr` need not be line-aligned.
    pub fn access(&mut self, addr: u64, bytes: u32, store: bool) {
        match self {
            GenericCache::Random(c) => c.access(addr, bytes, store),
            GenericCache::Linear(c) => c.access(addr, bytes, store),
            GenericCache::LeastRecentlyUsed(c) => c.access(addr, bytes, store),
            GenericCache::Hawkeye(c) => c.access(addr, bytes, store),
            GenericCache::FullyAssociative(c) => c.access(addr, bytes, store),
        }
    }

    /// Deep copy with counters reset and the downstream link dropped.
    pub fn fork(&self) -> Self {
        match self {
            GenericCache::Random(c) => c.fork().into(),
            GenericCache::Linear(c) => c.fork().into(),
            GenericCache::LeastRecentlyUsed(c) => c.fork().into(),
            GenericCache::Hawkeye(c) => c.fork().into(),
            GenericCache::FullyAssociative(c) => c.fork().into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.core().name
    }

    pub fn stats(&self) -> &CacheStats {
        &self.core().stats
    }

    pub fn miss_handler(&self) -> Option<&CacheRef> {
        self.core().miss_handler.as_ref()
    }

    /// Wires the downstream cache misses and writebacks are forwarded to.
    /// Prefer [`link_miss_handler`], which refuses to close a cycle.
    pub fn set_miss_handler(&mut self, downstream: CacheRef) {
        self.core_mut().miss_handler = Some(downstream);
    }

    /// Enables per-miss logging (debug level, one line per miss).
    pub fn set_log(&mut self, log: bool) {
        self.core_mut().log = log;
    }

    /// Wires the read-only processor hook the Hawkeye policy reads the PC
    /// through. Must be called before a Hawkeye cache sees its first access.
    pub fn set_proc(&mut self, proc: Rc<dyn PcSource>) {
        self.core_mut().pc_source = Some(proc);
    }

    /// Writes the statistics report to stdout now. The same report is
    /// emitted automatically when the cache is dropped.
    pub fn print_stats(&self) {
        self.core().stats.print(self.name());
    }
}

/// Wires `downstream` as `upstream`'s miss handler, first walking the chain
/// below `downstream` to refuse a link that would close a cycle.
pub fn link_miss_handler(upstream: &CacheRef, downstream: &CacheRef) -> Result<(), String> {
    let mut cursor = Some(downstream.clone());
    while let Some(cache) = cursor {
        if Rc::ptr_eq(&cache, upstream) {
            return Err(format!(
                "linking {} would close a cycle in the miss handler chain",
                upstream.borrow().name()
            ));
        }
        cursor = cache.borrow().miss_handler().cloned();
    }
    upstream.borrow_mut().set_miss_handler(downstream.clone());
    Ok(())
}
