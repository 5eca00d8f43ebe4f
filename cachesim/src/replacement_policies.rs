use crate::cache::TagArray;
use crate::lfsr::Lfsr;

/// A replacement policy drives the two decision points of the shared access
/// algorithm: an optional bookkeeping hook that runs before every tag
/// lookup, and victim selection on a miss.
///
/// Policies receive the tag array itself rather than an abstract way index,
/// because some of them (Hawkeye in particular) need to observe residency
/// while updating their own state.
pub trait ReplacementPolicy {
    /// Runs before the backing tag lookup on every access. Policies that
    /// track recency or train predictors observe the stream here; the
    /// default does nothing.
    ///
    /// `pc` is the program counter of the responsible instruction, when a
    /// processor hook is wired.
    fn on_access(&mut self, _tags: &mut TagArray, _addr: u64, _pc: Option<u64>) {}

    /// Picks a slot in `addr`'s set, installs the new (clean) tag there, and
    /// returns the displaced tag word (0 when the slot was empty).
    fn victimize(&mut self, tags: &mut TagArray, addr: u64, pc: Option<u64>) -> u64;
}

/// Uniform-random victim selection driven by the per-cache LFSR.
#[derive(Debug, Clone, Default)]
pub struct RandomEvict {
    lfsr: Lfsr,
}

impl RandomEvict {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReplacementPolicy for RandomEvict {
    fn victimize(&mut self, tags: &mut TagArray, addr: u64, _pc: Option<u64>) -> u64 {
        let set = tags.set_index(addr);
        let way = (u64::from(self.lfsr.next()) % tags.ways()) as usize;
        tags.install(set, way, addr)
    }
}

/// Round-robin eviction with an independent cursor per set.
#[derive(Debug, Clone)]
pub struct LinearEvict {
    cursors: Vec<u64>,
}

impl LinearEvict {
    pub fn new(sets: u64) -> Self {
        Self {
            cursors: vec![0; sets as usize],
        }
    }
}

impl ReplacementPolicy for LinearEvict {
    fn victimize(&mut self, tags: &mut TagArray, addr: u64, _pc: Option<u64>) -> u64 {
        let set = tags.set_index(addr);
        let cursor = &mut self.cursors[set];
        let way = *cursor as usize;
        *cursor = (*cursor + 1) % tags.ways();
        tags.install(set, way, addr)
    }
}

/// Least-recently-used eviction.
///
/// Tracks a last-use timestamp per line against a logical clock instead of
/// reshuffling a recency list; finding the victim is then a single min-scan
/// of the set. The clock is bumped before stamping, so untouched slots sit
/// at 0 and always lose to any line that has been used.
#[derive(Debug, Clone)]
pub struct LeastRecentlyUsed {
    last_used: Vec<u64>,
    time: u64,
}

impl LeastRecentlyUsed {
    pub fn new(sets: u64, ways: u64) -> Self {
        Self {
            last_used: vec![0; (sets * ways) as usize],
            time: 0,
        }
    }

    fn touch(&mut self, index: usize) {
        self.time += 1;
        self.last_used[index] = self.time;
    }
}

impl ReplacementPolicy for LeastRecentlyUsed {
    fn on_access(&mut self, tags: &mut TagArray, addr: u64, _pc: Option<u64>) {
        if let Some(way) = tags.find_way(addr) {
            let index = tags.set_index(addr) * tags.ways() as usize + way;
            self.touch(index);
        }
    }

    fn victimize(&mut self, tags: &mut TagArray, addr: u64, _pc: Option<u64>) -> u64 {
        let set = tags.set_index(addr);
        let base = set * tags.ways() as usize;
        let mut min_time = u64::MAX;
        let mut victim_way = 0;
        for way in 0..tags.ways() as usize {
            if self.last_used[base + way] < min_time {
                min_time = self.last_used[base + way];
                victim_way = way;
            }
        }
        self.touch(base + victim_way);
        tags.install(set, victim_way, addr)
    }
}
