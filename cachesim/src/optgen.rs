/// Number of time quanta each per-set occupancy vector can represent. Usage
/// intervals longer than this are treated as un-cacheable before the vector
/// is ever consulted.
pub const OPTGEN_VECTOR_SIZE: usize = 128;

/// Modulus for the per-set access timers.
pub const TIMER_SIZE: u64 = 1024;

/// Reconstruction of Belady's optimal replacement decision over a sliding
/// window of recent accesses.
///
/// Each slot of `liveness` counts how many lines a hypothetical optimal cache
/// would have kept alive across that time quantum. A usage interval is
/// declared cacheable when every quantum it spans still has spare capacity,
/// and committing the decision raises the occupancy of the whole interval.
#[derive(Debug, Clone)]
pub struct OptGen {
    liveness: Vec<u32>,
    cache_size: u64,
}

impl OptGen {
    pub fn new(cache_size: u64) -> Self {
        Self {
            liveness: vec![0; OPTGEN_VECTOR_SIZE],
            cache_size,
        }
    }

    /// Records that a reference occurred at this quantum. The slot is
    /// recycled from an older epoch of the ring, so its occupancy restarts
    /// at zero.
    pub fn add_access(&mut self, curr_quanta: u64) {
        self.liveness[curr_quanta as usize % OPTGEN_VECTOR_SIZE] = 0;
    }

    /// Would the optimal cache have kept a line live from `last_quanta` to
    /// `curr_quanta`? True iff every quantum strictly after `last_quanta` up
    /// to and including `curr_quanta` still has spare capacity; answering
    /// true also fills that window. Equal quanta mean the interval lapped
    /// the whole ring, not an empty one.
    pub fn should_cache(&mut self, curr_quanta: u64, last_quanta: u64) -> bool {
        let curr = curr_quanta as usize % OPTGEN_VECTOR_SIZE;
        let last = last_quanta as usize % OPTGEN_VECTOR_SIZE;

        let mut i = last;
        loop {
            i = (i + 1) % OPTGEN_VECTOR_SIZE;
            if u64::from(self.liveness[i]) >= self.cache_size {
                return false;
            }
            if i == curr {
                break;
            }
        }

        let mut i = last;
        loop {
            i = (i + 1) % OPTGEN_VECTOR_SIZE;
            self.liveness[i] += 1;
            if i == curr {
                break;
            }
        }
        true
    }
}
