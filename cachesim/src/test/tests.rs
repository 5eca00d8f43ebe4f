use std::cell::RefCell;
use std::rc::Rc;

use crate::cache::{link_miss_handler, Cache, CacheRef, GenericCache};
use crate::config::{CacheConfig, PolicyKind};
use crate::lfsr::Lfsr;
use crate::optgen::OptGen;
use crate::predictor::PcPredictor;
use crate::proc::ProcState;
use crate::replacement_policies::LeastRecentlyUsed;
use crate::simulator::{parse_address, parse_size, AccessKind, SimulationResult, Simulator};
use crate::stats::CacheStats;

fn cache(config: &str) -> GenericCache {
    GenericCache::construct(config, "T$").unwrap()
}

fn shared(config: &str) -> CacheRef {
    Rc::new(RefCell::new(cache(config)))
}

fn record(pc: u64, addr: u64, kind: char, size: u16) -> String {
    format!("{pc:016x} {addr:016x} {kind} {size:03}\n")
}

#[test]
fn lfsr_produces_the_expected_sequence() {
    let mut lfsr = Lfsr::new();
    assert_eq!(lfsr.next(), 0xD000_0001);
    assert_eq!(lfsr.next(), 0xB800_0001);
    assert_eq!(lfsr.next(), 0x8C00_0001);
}

#[test]
fn cloned_lfsrs_stay_in_lockstep() {
    let mut lfsr = Lfsr::new();
    for _ in 0..17 {
        lfsr.next();
    }
    let mut cloned = lfsr.clone();
    for _ in 0..1000 {
        assert_eq!(lfsr.next(), cloned.next());
    }
}

#[test]
fn parses_basic_config() {
    let config: CacheConfig = "64:4:64".parse().unwrap();
    assert_eq!(
        config,
        CacheConfig {
            sets: 64,
            ways: 4,
            linesz: 64,
            policy: None,
        }
    );
}

#[test]
fn parses_policy_suffix() {
    let config: CacheConfig = "16:4:32:linear".parse().unwrap();
    assert_eq!(config.policy, Some(PolicyKind::Linear));
    let config: CacheConfig = "16:4:32:hawkeye".parse().unwrap();
    assert_eq!(config.policy, Some(PolicyKind::Hawkeye));
}

#[test]
fn rejects_malformed_configs() {
    for bad in [
        "",
        "64",
        "64:4",
        "64:4:64:plru",
        "64:4:64:linear:extra",
        "a:4:64",
        "-2:4:64",
        "3:4:64",
        "0:4:64",
        "64:0:64",
        "64:4:4",
        "64:4:48",
        "64:4:64:",
    ] {
        assert!(bad.parse::<CacheConfig>().is_err(), "accepted `{bad}`");
    }
}

#[test]
fn construct_rejects_invalid_config() {
    assert!(GenericCache::construct("banana", "T$").is_err());
}

#[test]
fn factory_selects_expected_variants() {
    assert!(matches!(cache("1:8:64"), GenericCache::FullyAssociative(_)));
    assert!(matches!(cache("1:4:64"), GenericCache::Random(_)));
    assert!(matches!(cache("2:1:64"), GenericCache::Random(_)));
    assert!(matches!(cache("16:8:64"), GenericCache::Random(_)));
    assert!(matches!(cache("16:4:64:linear"), GenericCache::Linear(_)));
    assert!(matches!(cache("1:8:64:linear"), GenericCache::Linear(_)));
    assert!(matches!(cache("16:4:64:hawkeye"), GenericCache::Hawkeye(_)));
}

#[test]
fn single_read_miss() {
    let mut c = cache("2:2:64");
    c.access(0x000, 4, false);
    let stats = c.stats();
    assert_eq!(stats.read_accesses, 1);
    assert_eq!(stats.read_misses, 1);
    assert_eq!(stats.bytes_read, 4);
    assert_eq!(stats.write_accesses, 0);
    assert_eq!(stats.writebacks, 0);
}

#[test]
fn second_access_to_same_line_hits() {
    let mut c = cache("2:2:64");
    c.access(0x000, 4, false);
    c.access(0x004, 4, false);
    let stats = c.stats();
    assert_eq!(stats.read_accesses, 2);
    assert_eq!(stats.read_misses, 1);
}

#[test]
fn distinct_lines_in_one_set_both_miss() {
    let mut c = cache("2:2:64");
    c.access(0x000, 4, false);
    c.access(0x080, 4, false);
    let stats = c.stats();
    assert_eq!(stats.read_accesses, 2);
    assert_eq!(stats.read_misses, 2);
}

#[test]
fn dirty_victim_counts_a_writeback_without_a_downstream() {
    // With the LFSR seeded to 1 the first three victim draws in a two-way
    // set all land on way 1, so the third access displaces the dirty line.
    let mut c = cache("2:2:64");
    c.access(0x000, 4, true);
    c.access(0x080, 4, false);
    c.access(0x100, 4, false);
    let stats = c.stats();
    assert_eq!(stats.write_accesses, 1);
    assert_eq!(stats.read_accesses, 2);
    assert_eq!(stats.write_misses, 1);
    assert_eq!(stats.read_misses, 2);
    assert_eq!(stats.writebacks, 1);
    assert_eq!(stats.bytes_written, 4);
    assert_eq!(stats.bytes_read, 8);
}

#[test]
fn store_hit_marks_dirty_without_missing() {
    let mut c = cache("2:2:64");
    c.access(0x000, 8, false);
    c.access(0x000, 8, true);
    c.access(0x000, 8, false);
    let stats = c.stats();
    assert_eq!(stats.read_accesses, 2);
    assert_eq!(stats.write_accesses, 1);
    assert_eq!(stats.read_misses, 1);
    assert_eq!(stats.write_misses, 0);
    assert_eq!(stats.bytes_read, 16);
    assert_eq!(stats.bytes_written, 8);
    assert_eq!(stats.writebacks, 0);
}

#[test]
fn back_to_back_line_reuse_hits_under_every_policy() {
    let proc = Rc::new(ProcState::new());
    proc.set_pc(0x40_0000);
    for config in ["2:2:64", "16:4:64:linear", "1:8:64", "4:4:64:hawkeye"] {
        let mut c = cache(config);
        c.set_proc(proc.clone());
        c.access(0x1000, 4, false);
        c.access(0x1010, 4, false);
        assert_eq!(c.stats().read_accesses, 2, "{config}");
        assert_eq!(c.stats().read_misses, 1, "{config}");
    }
    let mut c = GenericCache::from(Cache::new(4, 2, 64, "T$", LeastRecentlyUsed::new(4, 2)));
    c.access(0x1000, 4, false);
    c.access(0x1010, 4, false);
    assert_eq!(c.stats().read_misses, 1);
}

#[test]
fn direct_mapped_conflicts_evict_on_every_miss() {
    let mut c = cache("2:1:8");
    for addr in [0x00, 0x10, 0x00, 0x10] {
        c.access(addr, 1, false);
    }
    assert_eq!(c.stats().read_misses, 4);
    c.access(0x08, 1, false);
    c.access(0x08, 1, false);
    let stats = c.stats();
    assert_eq!(stats.read_accesses, 6);
    assert_eq!(stats.read_misses, 5);
}

#[test]
fn linear_policy_cycles_ways_in_order() {
    let mut c = cache("1:2:8:linear");
    for addr in [0x00, 0x08, 0x00, 0x08, 0x10, 0x00, 0x08] {
        c.access(addr, 1, false);
    }
    let stats = c.stats();
    assert_eq!(stats.read_accesses, 7);
    // Fill both ways, hit both, then the cursor wraps back over them.
    assert_eq!(stats.read_misses, 5);
}

#[test]
fn lru_retains_the_most_recently_used_lines() {
    let mut c = GenericCache::from(Cache::new(1, 2, 64, "T$", LeastRecentlyUsed::new(1, 2)));
    c.access(0x000, 4, false);
    c.access(0x040, 4, false);
    c.access(0x000, 4, false);
    c.access(0x080, 4, false);
    c.access(0x000, 4, false);
    c.access(0x040, 4, false);
    let stats = c.stats();
    assert_eq!(stats.read_accesses, 6);
    // The re-reads of the first line always hit; the stale second line is
    // the one displaced.
    assert_eq!(stats.read_misses, 4);
}

#[test]
fn fully_associative_evicts_by_ascending_tag_position() {
    let mut c = cache("1:8:64");
    for payload in (1..=8u64).rev() {
        c.access(payload * 64, 4, false);
    }
    assert_eq!(c.stats().read_misses, 8);
    // First LFSR draw picks position 1 of the full map; in ascending payload
    // order (not insertion order) that is payload 2.
    c.access(0, 4, false);
    assert_eq!(c.stats().read_misses, 9);
    c.access(64, 4, false);
    assert_eq!(c.stats().read_misses, 9, "payload 1 should still be resident");
    c.access(2 * 64, 4, false);
    assert_eq!(c.stats().read_misses, 10, "payload 2 should have been evicted");
}

#[test]
fn dirty_evictions_write_back_through_the_chain() {
    let l1 = shared("1:1:64");
    let l2 = shared("4:2:64");
    link_miss_handler(&l1, &l2).unwrap();
    l1.borrow_mut().access(0x004, 4, true);
    l1.borrow_mut().access(0x044, 4, true);
    {
        let l2 = l2.borrow();
        let stats = l2.stats();
        assert_eq!(stats.read_accesses, 2);
        assert_eq!(stats.read_misses, 2);
        assert_eq!(stats.bytes_read, 128);
        assert_eq!(stats.write_accesses, 1);
        // The writeback targets the line its own fill installed earlier, so
        // it hits: the upstream forwarded the aligned line address.
        assert_eq!(stats.write_misses, 0);
        assert_eq!(stats.bytes_written, 64);
    }
    let l1 = l1.borrow();
    assert_eq!(l1.stats().writebacks, 1);
    assert_eq!(l1.stats().write_misses, 2);
}

#[test]
fn miss_handler_chains_reject_cycles() {
    let a = shared("2:2:64");
    let b = shared("2:2:64");
    let c = shared("2:2:64");
    link_miss_handler(&a, &b).unwrap();
    link_miss_handler(&b, &c).unwrap();
    assert!(link_miss_handler(&c, &a).is_err());
    assert!(link_miss_handler(&c, &b).is_err());
    assert!(link_miss_handler(&a, &a).is_err());
}

#[test]
fn identical_caches_replay_identically() {
    let mut a = cache("4:2:32");
    let mut b = cache("4:2:32");
    let mut state: u64 = 0x12345;
    for _ in 0..500 {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let addr = state % 0x2000;
        let store = state >> 63 == 1;
        a.access(addr, 4, store);
        b.access(addr, 4, store);
    }
    assert_eq!(a.stats(), b.stats());
    assert!(a.stats().total_accesses() == 500);
}

#[test]
fn forked_caches_continue_the_same_victim_sequence() {
    let mut original = cache("4:2:32");
    for i in 0..100u64 {
        original.access(i * 96, 4, i % 3 == 0);
    }
    let mut forked = original.fork();
    assert_eq!(forked.stats(), &CacheStats::default());
    let at_fork = original.stats().clone();
    for i in 0..200u64 {
        original.access(i * 160, 4, i % 5 == 0);
        forked.access(i * 160, 4, i % 5 == 0);
    }
    // The fork carried the tag contents and the LFSR register, so from the
    // fork point on the two caches behave identically.
    let original_stats = original.stats();
    let forked_stats = forked.stats();
    assert_eq!(
        original_stats.read_misses - at_fork.read_misses,
        forked_stats.read_misses
    );
    assert_eq!(
        original_stats.write_misses - at_fork.write_misses,
        forked_stats.write_misses
    );
    assert_eq!(
        original_stats.writebacks - at_fork.writebacks,
        forked_stats.writebacks
    );
    assert_eq!(
        original_stats.total_accesses() - at_fork.total_accesses(),
        forked_stats.total_accesses()
    );
}

#[test]
fn hawkeye_converges_on_a_reused_working_set() {
    let proc = Rc::new(ProcState::new());
    proc.set_pc(0x40_0000);
    let mut c = cache("1:4:64:hawkeye");
    c.set_proc(proc.clone());
    for _ in 0..4 {
        for line in [0x000u64, 0x040, 0x080, 0x0C0] {
            c.access(line, 4, false);
            c.access(line, 4, false);
        }
    }
    let stats = c.stats();
    assert_eq!(stats.read_accesses, 32);
    // Four cold misses, then the working set is resident for good.
    assert_eq!(stats.read_misses, 4);
}

#[test]
fn hawkeye_streaming_distinct_lines_thrashes_one_way() {
    let proc = Rc::new(ProcState::new());
    proc.set_pc(0x40_0000);
    let mut c = cache("1:4:64:hawkeye");
    c.set_proc(proc.clone());
    for _ in 0..8 {
        for line in [0x000u64, 0x040, 0x080, 0x0C0] {
            c.access(line, 4, false);
        }
    }
    let stats = c.stats();
    assert_eq!(stats.read_accesses, 32);
    // Every install keeps its slot at the averse ceiling, so the victim scan
    // lands on way 0 every time and the other ways never fill.
    assert_eq!(stats.read_misses, 32);
    match &c {
        GenericCache::Hawkeye(inner) => {
            let slots = inner.tags.set_slots(0);
            assert_ne!(slots[0], 0);
            assert!(slots[1..].iter().all(|&slot| slot == 0));
        }
        _ => unreachable!(),
    }
}

#[test]
fn hawkeye_handles_long_gaps_and_timer_wraparound() {
    let proc = Rc::new(ProcState::new());
    proc.set_pc(0x40_0100);
    let mut c = cache("1:4:64:hawkeye");
    c.set_proc(proc.clone());
    for _ in 0..5 {
        c.access(0x000, 4, false);
        for _ in 0..100 {
            for line in [0x040u64, 0x080, 0x0C0] {
                c.access(line, 4, false);
            }
        }
    }
    let stats = c.stats();
    assert_eq!(stats.read_accesses, 1505);
    assert_eq!(stats.write_accesses, 0);
    assert_eq!(stats.writebacks, 0);
}

#[test]
fn predictor_counters_saturate_in_both_directions() {
    let mut predictor = PcPredictor::new();
    assert!(predictor.get_prediction(0x1234), "untrained PCs are friendly");
    for _ in 0..10 {
        predictor.increment(0x1234);
    }
    assert!(predictor.get_prediction(0x1234));
    for _ in 0..3 {
        predictor.decrement(0x1234);
    }
    assert!(predictor.get_prediction(0x1234), "7 - 3 is still at the midpoint");
    predictor.decrement(0x1234);
    assert!(!predictor.get_prediction(0x1234));
    for _ in 0..10 {
        predictor.decrement(0x1234);
    }
    assert!(!predictor.get_prediction(0x1234));
    for _ in 0..4 {
        predictor.increment(0x1234);
    }
    assert!(predictor.get_prediction(0x1234), "0 + 4 reaches the midpoint");
}

#[test]
fn optgen_tracks_interval_capacity() {
    let mut optgen = OptGen::new(2);
    optgen.add_access(0);
    assert!(optgen.should_cache(4, 0));
    assert!(optgen.should_cache(4, 0));
    assert!(!optgen.should_cache(4, 0), "interval is now at capacity");
    assert!(optgen.should_cache(6, 4), "disjoint quanta are unaffected");
    assert!(
        !optgen.should_cache(9, 9),
        "equal quanta span the whole ring, which holds occupied slots"
    );
}

#[test]
fn optgen_fills_the_quanta_after_the_last_use() {
    let mut optgen = OptGen::new(1);
    optgen.add_access(0);
    // The window excludes the quantum of the last use and includes the
    // current one: claiming (0, 2] occupies quanta 1 and 2 only.
    assert!(optgen.should_cache(2, 0));
    assert!(!optgen.should_cache(2, 1), "quantum 2 is now occupied");
    assert!(optgen.should_cache(0, 127), "quantum 0 itself was left alone");
}

#[test]
fn optgen_wraps_around_the_ring() {
    let mut optgen = OptGen::new(1);
    // (126, 1] runs through the end of the ring: quanta 127, 0, and 1.
    assert!(optgen.should_cache(1, 126));
    assert!(!optgen.should_cache(1, 126));
}

#[test]
fn access_kinds_map_from_record_bytes() {
    assert_eq!(AccessKind::from_byte(b'F'), Some(AccessKind::Fetch));
    assert_eq!(AccessKind::from_byte(b'R'), Some(AccessKind::Load));
    assert_eq!(AccessKind::from_byte(b'W'), Some(AccessKind::Store));
    assert_eq!(AccessKind::from_byte(b'x'), None);
    assert!(AccessKind::Store.is_store());
    assert!(!AccessKind::Load.is_store());
}

#[test]
fn parses_fixed_width_columns() {
    assert_eq!(parse_address(b"00000000deadbeef"), 0xDEADBEEF);
    assert_eq!(parse_address(b"00000000DEADBEEF"), 0xDEADBEEF);
    assert_eq!(parse_address(b"ffffffffffffffff"), u64::MAX);
    assert_eq!(parse_address(b"0000000000000000"), 0);
    assert_eq!(parse_size(b"128"), 128);
    assert_eq!(parse_size(b"004"), 4);
    assert_eq!(parse_size(b"000"), 0);
}

#[test]
fn replay_routes_fetches_and_data_accesses() {
    let mut sim = Simulator::new(Some("16:2:64"), Some("16:2:64"), None).unwrap();
    let mut trace = String::new();
    trace += &record(0x40_0000, 0x40_0000, 'F', 4);
    trace += &record(0x40_0004, 0x1_0000, 'R', 8);
    trace += &record(0x40_0008, 0x1_0008, 'W', 8);
    trace += &record(0x40_000C, 0x2_0000, 'X', 8);
    let result = sim.simulate(trace.as_bytes()).unwrap();
    assert_eq!(result.caches.len(), 2);
    assert_eq!(result.caches[0].name, "I$");
    assert_eq!(result.caches[0].stats.read_accesses, 1);
    assert_eq!(result.caches[0].stats.write_accesses, 0);
    assert_eq!(result.caches[1].name, "D$");
    assert_eq!(result.caches[1].stats.read_accesses, 1);
    assert_eq!(result.caches[1].stats.write_accesses, 1);
    assert_eq!(result.caches[1].stats.read_misses, 1);
    // The store lands in the line the load just filled.
    assert_eq!(result.caches[1].stats.write_misses, 0);
    assert_eq!(result.caches[1].stats.bytes_written, 8);
}

#[test]
fn replay_feeds_the_trace_pc_to_hawkeye() {
    let mut sim = Simulator::new(None, Some("1:4:64:hawkeye"), None).unwrap();
    let mut trace = String::new();
    for _ in 0..4 {
        for line in [0x0u64, 0x40, 0x80, 0xC0] {
            trace += &record(0x40_0000, line, 'R', 4);
            trace += &record(0x40_0000, line, 'R', 4);
        }
    }
    let result = sim.simulate(trace.as_bytes()).unwrap();
    assert_eq!(result.caches[0].stats.read_accesses, 32);
    assert_eq!(result.caches[0].stats.read_misses, 4);
}

#[test]
fn replay_rejects_partial_records() {
    let mut sim = Simulator::new(Some("16:2:64"), None, None).unwrap();
    assert!(sim.simulate(b"too short").is_err());
}

#[test]
fn hierarchies_require_a_first_level() {
    assert!(Simulator::new(None, None, Some("256:8:64")).is_err());
}

#[test]
fn results_serialise_and_deserialise() {
    let mut sim = Simulator::new(Some("4:2:64"), None, None).unwrap();
    let trace = record(0x40_0000, 0x1000, 'F', 4);
    let result = sim.simulate(trace.as_bytes()).unwrap();
    let json = serde_json::to_string(&result).unwrap();
    let parsed: SimulationResult = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, result);
}

#[test]
fn miss_rate_is_a_percentage_of_all_accesses() {
    let stats = CacheStats {
        read_accesses: 3,
        read_misses: 2,
        write_accesses: 1,
        write_misses: 1,
        ..CacheStats::default()
    };
    assert_eq!(stats.total_accesses(), 4);
    assert_eq!(stats.total_misses(), 3);
    assert_eq!(stats.miss_rate(), 75.0);
}
