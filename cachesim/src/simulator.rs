use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::cache::{link_miss_handler, CacheRef, GenericCache};
use crate::hex::HEX_LOOKUP;
use crate::proc::ProcState;
use crate::stats::CacheStats;

/// Fixed-width trace record: `PC ADDR KIND SIZE\n`, with PC and ADDR as 16
/// hex digits, KIND a single byte, and SIZE three decimal digits.
pub const RECORD_SIZE: usize = 40;
const PC_OFFSET: usize = 0;
const PC_UPPER: usize = PC_OFFSET + 16;
const ADDRESS_OFFSET: usize = PC_UPPER + 1;
const ADDRESS_UPPER: usize = ADDRESS_OFFSET + 16;
const KIND_OFFSET: usize = ADDRESS_UPPER + 1;
const SIZE_OFFSET: usize = KIND_OFFSET + 2;
const SIZE_UPPER: usize = SIZE_OFFSET + 3;

/// Classification of a memory access event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Fetch,
    Load,
    Store,
}

impl AccessKind {
    /// Maps a record's kind byte. Unrecognised bytes yield `None` and the
    /// replay loop skips the record.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'F' => Some(AccessKind::Fetch),
            b'R' => Some(AccessKind::Load),
            b'W' => Some(AccessKind::Store),
            _ => None,
        }
    }

    pub fn is_store(self) -> bool {
        matches!(self, AccessKind::Store)
    }
}

/// Replays a fixed-width trace against a small cache hierarchy: an optional
/// instruction cache fed by fetch records, an optional data cache fed by
/// load/store records, and an optional shared second level behind both.
///
/// The driver owns the processor stand-in; each record's PC is published
/// there before the access is dispatched, which is how the Hawkeye policy
/// observes the responsible instruction. `simulate` may be called multiple
/// times and accumulates into the same counters.
pub struct Simulator {
    proc: Rc<ProcState>,
    icache: Option<CacheRef>,
    dcache: Option<CacheRef>,
    l2: Option<CacheRef>,
    simulation_time: Duration,
}

/// Counter snapshot for the whole hierarchy, front to back. Serialisable
/// for machine-readable output.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimulationResult {
    pub caches: Vec<CacheResult>,
}

/// One cache's snapshot within a [`SimulationResult`].
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheResult {
    pub name: String,
    pub stats: CacheStats,
}

impl Simulator {
    /// Builds a hierarchy from configuration strings. At least one first
    /// level cache is required; when a second level is given, both first
    /// level caches forward their misses and writebacks to it.
    pub fn new(
        icache: Option<&str>,
        dcache: Option<&str>,
        l2: Option<&str>,
    ) -> Result<Self, String> {
        if icache.is_none() && dcache.is_none() {
            return Err(
                "at least one of the instruction and data caches must be configured".to_string(),
            );
        }
        let proc = Rc::new(ProcState::new());
        let build = |config: &str, name: &str| -> Result<CacheRef, String> {
            let mut cache = GenericCache::construct(config, name)?;
            cache.set_proc(proc.clone());
            Ok(Rc::new(RefCell::new(cache)))
        };
        let icache = icache.map(|config| build(config, "I$")).transpose()?;
        let dcache = dcache.map(|config| build(config, "D$")).transpose()?;
        let l2 = l2.map(|config| build(config, "L2$")).transpose()?;
        if let Some(l2) = &l2 {
            if let Some(icache) = &icache {
                link_miss_handler(icache, l2)?;
            }
            if let Some(dcache) = &dcache {
                link_miss_handler(dcache, l2)?;
            }
        }
        Ok(Self {
            proc,
            icache,
            dcache,
            l2,
            simulation_time: Duration::new(0, 0),
        })
    }

    pub fn set_log(&mut self, log: bool) {
        for cache in [&self.icache, &self.dcache, &self.l2].into_iter().flatten() {
            cache.borrow_mut().set_log(log);
        }
    }

    /// Replays a trace. The byte length must be a whole number of records;
    /// records whose kind byte is unrecognised are skipped, as are fetches
    /// without an instruction cache and loads/stores without a data cache.
    pub fn simulate(&mut self, bytes: &[u8]) -> Result<SimulationResult, String> {
        if bytes.len() % RECORD_SIZE != 0 {
            return Err(format!(
                "trace length {} is not a multiple of the {RECORD_SIZE}-byte record size",
                bytes.len()
            ));
        }
        let start = Instant::now();
        let mut i = 0;
        while i < bytes.len() {
            let record = &bytes[i..i + RECORD_SIZE];
            i += RECORD_SIZE;
            let Some(kind) = AccessKind::from_byte(record[KIND_OFFSET]) else {
                continue;
            };
            let pc = parse_address((&record[PC_OFFSET..PC_UPPER]).try_into().unwrap());
            let address = parse_address((&record[ADDRESS_OFFSET..ADDRESS_UPPER]).try_into().unwrap());
            let size = parse_size((&record[SIZE_OFFSET..SIZE_UPPER]).try_into().unwrap());
            self.proc.set_pc(pc);
            let target = match kind {
                AccessKind::Fetch => &self.icache,
                AccessKind::Load | AccessKind::Store => &self.dcache,
            };
            if let Some(cache) = target {
                cache
                    .borrow_mut()
                    .access(address, u32::from(size), kind.is_store());
            }
        }
        self.simulation_time += start.elapsed();
        Ok(self.results())
    }

    /// Current counters for every cache in the hierarchy, front to back.
    pub fn results(&self) -> SimulationResult {
        let caches = [&self.icache, &self.dcache, &self.l2]
            .into_iter()
            .flatten()
            .map(|cache| {
                let cache = cache.borrow();
                CacheResult {
                    name: cache.name().to_string(),
                    stats: cache.stats().clone(),
                }
            })
            .collect();
        SimulationResult { caches }
    }

    /// Wall-clock time spent inside `simulate`, across all calls.
    pub fn get_execution_time(&self) -> &Duration {
        &self.simulation_time
    }

    pub fn icache(&self) -> Option<&CacheRef> {
        self.icache.as_ref()
    }

    pub fn dcache(&self) -> Option<&CacheRef> {
        self.dcache.as_ref()
    }

    pub fn l2(&self) -> Option<&CacheRef> {
        self.l2.as_ref()
    }
}

/// Parses a 64-bit value from 16 hexadecimal bytes.
///
/// `u64::from_str_radix` dominates the replay profile for the smaller cache
/// geometries, so digit pairs go through a lookup table generated at compile
/// time instead. The fast path skips format validation; debug builds
/// cross-check the result against the standard library.
///
/// # Examples
///
/// ```
/// use cachesim::simulator::parse_address;
/// let address = b"000000000000002a";
/// assert_eq!(parse_address(address), 42);
/// ```
pub fn parse_address(buf: &[u8; 16]) -> u64 {
    let mut res: u64 = 0;
    let mut x = 0;
    while x < 15 {
        res <<= 8;
        res |= u64::from(HEX_LOOKUP[(buf[x] as usize) << 8 | buf[x + 1] as usize]);
        x += 2;
    }
    debug_assert_eq!(
        u64::from_str_radix(std::str::from_utf8(buf).unwrap(), 16).unwrap(),
        res
    );
    res
}

/// Parses the 3-digit decimal size column. Same rationale as
/// [`parse_address`], though plain multiplication beats a table at this
/// width.
///
/// # Examples
///
/// ```
/// use cachesim::simulator::parse_size;
/// assert_eq!(parse_size(b"010"), 10);
/// ```
pub fn parse_size(buf: &[u8; 3]) -> u16 {
    let mut res = (buf[2] - b'0') as u16;
    res += 10u16 * (buf[1] - b'0') as u16;
    res += 100u16 * (buf[0] - b'0') as u16;
    debug_assert_eq!(
        std::str::from_utf8(buf).unwrap().parse::<u16>().unwrap(),
        res
    );
    res
}
