//! The Hawkeye replacement policy: reconstruct what Belady's optimal
//! replacement would have done for a window of recent accesses, attribute
//! each decision to the PC that issued the access, and use the learned
//! labels to steer an RRIP-style victim choice.

use std::collections::BTreeMap;

use crate::cache::TagArray;
use crate::optgen::{OptGen, OPTGEN_VECTOR_SIZE, TIMER_SIZE};
use crate::predictor::PcPredictor;
use crate::replacement_policies::ReplacementPolicy;

/// Ceiling of the 3-bit re-reference prediction values. A line sitting at
/// the ceiling is cache-averse and the preferred victim.
pub const MAX_RRPV: u8 = 7;

/// Per-line bookkeeping in the sampler: when the line was last referenced,
/// which PC referenced it, what the predictor said at the time, and its
/// recency rank among the set's sampled lines.
#[derive(Debug, Clone, Default)]
struct AddrInfo {
    last_quanta: u64,
    pc: u64,
    prediction: bool,
    lru: u64,
}

/// Policy state layered over the shared tag array.
///
/// `rrpv` and `signatures` shadow the tag array one-to-one. The sampler
/// (`addr_history`) holds at most `ways` entries per set whose `lru` ranks
/// always form a permutation of `0..n`; the eviction scan below relies on
/// that to find exactly one stalest entry.
#[derive(Debug, Clone)]
pub struct Hawkeye {
    ways: usize,
    rrpv: Vec<u8>,
    signatures: Vec<u64>,
    perset_timer: Vec<u64>,
    perset_optgen: Vec<OptGen>,
    addr_history: Vec<BTreeMap<u64, AddrInfo>>,
    demand_predictor: PcPredictor,
}

impl Hawkeye {
    pub fn new(sets: u64, ways: u64) -> Self {
        let lines = (sets * ways) as usize;
        Self {
            ways: ways as usize,
            rrpv: vec![MAX_RRPV; lines],
            signatures: vec![0; lines],
            perset_timer: vec![0; sets as usize],
            // The oracle gets two fewer slots than the real cache, so it
            // only vouches for lines a slightly smaller cache could hold.
            perset_optgen: vec![OptGen::new(ways.saturating_sub(2)); sets as usize],
            addr_history: vec![BTreeMap::new(); sets as usize],
            demand_predictor: PcPredictor::new(),
        }
    }

    fn require_pc(pc: Option<u64>) -> u64 {
        pc.expect("hawkeye cache accessed with no processor hook wired; call set_proc first")
    }

    /// Ages every sampler entry more recent than `bound` by one step.
    fn age_history(&mut self, set: usize, bound: u64) {
        for info in self.addr_history[set].values_mut() {
            if info.lru < bound {
                info.lru += 1;
            }
        }
    }

    /// Drops the stalest sampler entry to make room for a new one.
    fn evict_history_lru(&mut self, set: usize) {
        let stalest = self.ways as u64 - 1;
        let victim = self.addr_history[set]
            .iter()
            .find(|(_, info)| info.lru == stalest)
            .map(|(&tag, _)| tag);
        if let Some(tag) = victim {
            self.addr_history[set].remove(&tag);
        }
    }
}

impl ReplacementPolicy for Hawkeye {
    fn on_access(&mut self, tags: &mut TagArray, addr: u64, pc: Option<u64>) {
        let pc = Self::require_pc(pc);
        let set = tags.set_index(addr);
        let sampler_tag = tags.tag_for(addr);
        let timer = self.perset_timer[set];
        let curr_quanta = timer % OPTGEN_VECTOR_SIZE as u64;

        if let Some(info) = self.addr_history[set].get(&sampler_tag) {
            let (last_quanta, trained_pc, rank) = (info.last_quanta, info.pc, info.lru);
            log::trace!(
                "sampler hit {sampler_tag:#x} last_quanta={last_quanta} predicted_friendly={}",
                info.prediction
            );
            // The usage interval closes here: ask the oracle whether an
            // optimal cache would have held the line since its last use, and
            // train the PC that opened the interval accordingly. A timer
            // that lapped the sampler entry makes the interval unmeasurable,
            // which trains negatively too.
            let mut curr_timer = timer;
            if curr_timer < last_quanta {
                curr_timer += TIMER_SIZE;
            }
            let lapped = curr_timer - last_quanta > OPTGEN_VECTOR_SIZE as u64;
            if !lapped
                && self.perset_optgen[set]
                    .should_cache(curr_quanta, last_quanta % OPTGEN_VECTOR_SIZE as u64)
            {
                self.demand_predictor.increment(trained_pc);
            } else {
                self.demand_predictor.decrement(trained_pc);
            }
            self.perset_optgen[set].add_access(curr_quanta);
            self.age_history(set, rank);
        } else {
            if self.addr_history[set].len() == self.ways {
                self.evict_history_lru(set);
            }
            self.addr_history[set].insert(sampler_tag, AddrInfo::default());
            self.perset_optgen[set].add_access(curr_quanta);
            self.age_history(set, self.ways as u64 - 1);
        }

        let new_prediction = self.demand_predictor.get_prediction(pc);
        if let Some(info) = self.addr_history[set].get_mut(&sampler_tag) {
            info.last_quanta = timer;
            info.pc = pc;
            info.prediction = new_prediction;
            info.lru = 0;
        }
        self.perset_timer[set] = (timer + 1) % TIMER_SIZE;

        // For a resident line the RRPV verdict lands immediately; a miss
        // defers it to victimize, which installs the line.
        if let Some(way) = tags.find_way(addr) {
            let index = set * self.ways + way;
            self.signatures[index] = pc;
            self.rrpv[index] = if new_prediction { 0 } else { MAX_RRPV };
        }
    }

    fn victimize(&mut self, tags: &mut TagArray, addr: u64, pc: Option<u64>) -> u64 {
        let set = tags.set_index(addr);
        let base = set * self.ways;

        // A cache-averse slot is always the preferred victim.
        for way in 0..self.ways {
            if self.rrpv[base + way] == MAX_RRPV {
                return tags.install(set, way, addr);
            }
        }

        // No averse line: evict the oldest cache-friendly one (highest
        // RRPV, ties broken toward the highest way).
        let mut max_rrpv = 0;
        let mut victim_way = 0;
        for way in 0..self.ways {
            if self.rrpv[base + way] >= max_rrpv {
                max_rrpv = self.rrpv[base + way];
                victim_way = way;
            }
        }
        let victim = tags.install(set, victim_way, addr);

        // The lookup hook could not label a line that wasn't resident yet,
        // so catch up for the incoming one.
        let pc = Self::require_pc(pc);
        let new_prediction = self.demand_predictor.get_prediction(pc);
        let old_signature = self.signatures[base + victim_way];
        self.signatures[base + victim_way] = pc;
        if !new_prediction {
            self.rrpv[base + victim_way] = MAX_RRPV;
        } else {
            self.rrpv[base + victim_way] = 0;
            let saturated = (0..self.ways).any(|way| self.rrpv[base + way] == MAX_RRPV - 1);
            // Age the friendly lines, unless one more step would push
            // somebody to the averse ceiling. The fresh line ages with the
            // rest and is then pinned back to 0.
            for way in 0..self.ways {
                if !saturated && self.rrpv[base + way] < MAX_RRPV - 1 {
                    self.rrpv[base + way] += 1;
                }
            }
            self.rrpv[base + victim_way] = 0;
        }

        // Losing a friendly line is evidence against the PC that installed
        // it; train on the signature the line carried before the overwrite.
        self.demand_predictor.decrement(old_signature);

        victim
    }
}
