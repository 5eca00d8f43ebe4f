use serde::{Deserialize, Serialize};

/// Access and miss counters for a single cache.
///
/// Counters are 64-bit and unbounded; nothing in the model ever resets them
/// except [`CacheStats::default`] at construction or fork time. The snapshot
/// can be serialised for machine-readable output.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub read_accesses: u64,
    pub write_accesses: u64,
    pub read_misses: u64,
    pub write_misses: u64,
    pub writebacks: u64,
}

impl CacheStats {
    pub fn total_accesses(&self) -> u64 {
        self.read_accesses + self.write_accesses
    }

    pub fn total_misses(&self) -> u64 {
        self.read_misses + self.write_misses
    }

    /// Miss rate as a percentage of all accesses. Meaningless (NaN) when the
    /// cache saw no accesses; callers guard with [`CacheStats::total_accesses`].
    pub fn miss_rate(&self) -> f64 {
        100.0 * self.total_misses() as f64 / self.total_accesses() as f64
    }

    /// Writes the standard report to stdout. A cache that saw no accesses
    /// prints nothing.
    pub fn print(&self, name: &str) {
        if self.total_accesses() == 0 {
            return;
        }
        println!("{name} Bytes Read:            {}", self.bytes_read);
        println!("{name} Bytes Written:         {}", self.bytes_written);
        println!("{name} Read Accesses:         {}", self.read_accesses);
        println!("{name} Write Accesses:        {}", self.write_accesses);
        println!("{name} Read Misses:           {}", self.read_misses);
        println!("{name} Write Misses:          {}", self.write_misses);
        println!("{name} Writebacks:            {}", self.writebacks);
        println!("{name} Miss Rate:             {:.3}%", self.miss_rate());
    }
}
