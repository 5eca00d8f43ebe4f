use std::str::FromStr;

/// Usage banner printed by the front-end when a configuration string fails
/// to parse or validate.
pub const CONFIG_USAGE: &str = "\
Cache configurations must be of the form
  sets:ways:linesz
or
  sets:ways:linesz:policy
where sets, ways, and linesz are positive integers, sets and linesz are
both powers of two, linesz is at least 8, and policy is one of `linear'
or `hawkeye'.";

/// Explicitly selectable replacement policies. Absent a selection the
/// factory picks automatically (fully-associative for a single large set,
/// random eviction otherwise).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Linear,
    Hawkeye,
}

/// A validated `sets:ways:linesz[:policy]` cache geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub sets: u64,
    pub ways: u64,
    pub linesz: u64,
    pub policy: Option<PolicyKind>,
}

impl FromStr for CacheConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(':').collect();
        if fields.len() < 3 || fields.len() > 4 {
            return Err(format!("bad cache configuration `{s}`"));
        }
        let number = |field: &str, what: &str| -> Result<u64, String> {
            field
                .parse::<u64>()
                .map_err(|_| format!("bad {what} `{field}` in cache configuration `{s}`"))
        };
        let sets = number(fields[0], "set count")?;
        let ways = number(fields[1], "way count")?;
        let linesz = number(fields[2], "line size")?;
        let policy = match fields.get(3) {
            None => None,
            Some(&"linear") => Some(PolicyKind::Linear),
            Some(&"hawkeye") => Some(PolicyKind::Hawkeye),
            Some(other) => {
                return Err(format!(
                    "unknown replacement policy `{other}` in cache configuration `{s}`"
                ))
            }
        };
        if !sets.is_power_of_two() {
            return Err(format!(
                "set count must be a positive power of two, got `{sets}`"
            ));
        }
        if ways == 0 {
            return Err("way count must be positive".to_string());
        }
        if linesz < 8 || !linesz.is_power_of_two() {
            return Err(format!(
                "line size must be a power of two no smaller than 8, got `{linesz}`"
            ));
        }
        Ok(Self {
            sets,
            ways,
            linesz,
            policy,
        })
    }
}
