//! Timecode definitions
//!
//! Each supported control record carries a maximal-length LFSR sequence,
//! one bit per carrier cycle. A definition names the register width and
//! feedback taps plus the starting state, so the full bit sequence (and the
//! code → cycle lookup used to resolve absolute position) can be regenerated
//! at runtime instead of shipped as data.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Definition used when configuration does not name one
pub const DEFAULT_TIMECODE: &str = "serato_2a";

/// Descriptor for one family of timecode record
#[derive(Debug)]
pub struct TimecodeDefinition {
    /// Short identifier used in configuration and remote commands
    pub name: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Width of the shift register in bits
    pub bits: u32,
    /// Carrier cycles per second at nominal speed
    pub resolution: u32,
    /// Primary and secondary relation is inverted
    pub switch_phase: bool,
    /// Primary carrier is on the left channel
    pub switch_primary: bool,
    /// Bits are read on the negative half of the primary
    pub switch_polarity: bool,
    /// Register state at cycle 0
    pub seed: u32,
    /// Feedback taps
    pub taps: u32,
    /// Number of cycles mastered on the record
    pub length: u32,
    /// Last cycle considered reliable
    pub safe: u32,
    lookup: OnceLock<Lookup>,
}

/// Flags for a definition, grouped to keep the catalog readable
#[derive(Clone, Copy)]
struct Switches {
    phase: bool,
    primary: bool,
    polarity: bool,
}

const NONE: Switches = Switches {
    phase: false,
    primary: false,
    polarity: false,
};

const PHASE: Switches = Switches {
    phase: true,
    primary: false,
    polarity: false,
};

const TRAKTOR: Switches = Switches {
    phase: true,
    primary: true,
    polarity: true,
};

static CATALOG: [TimecodeDefinition; 7] = [
    TimecodeDefinition::new("serato_2a", "Serato 2nd Ed., side A", 20, 1000, NONE, 0x59017, 0x361e4, 712_000, 625_000),
    TimecodeDefinition::new("serato_2b", "Serato 2nd Ed., side B", 20, 1000, NONE, 0x8f3c6, 0x4f0d8, 922_000, 908_000),
    TimecodeDefinition::new("serato_cd", "Serato CD", 20, 1000, NONE, 0xd8b40, 0x34d54, 950_000, 890_000),
    TimecodeDefinition::new("traktor_a", "Traktor Scratch, side A", 23, 2000, TRAKTOR, 0x134503, 0x041040, 1_500_000, 605_000),
    TimecodeDefinition::new("traktor_b", "Traktor Scratch, side B", 23, 2000, TRAKTOR, 0x32066c, 0x041040, 2_110_000, 907_000),
    TimecodeDefinition::new("mixvibes_v2", "MixVibes V2", 20, 1300, PHASE, 0x22c90, 0x00008, 950_000, 655_000),
    TimecodeDefinition::new("mixvibes_7inch", "MixVibes 7\"", 20, 1300, PHASE, 0x22c90, 0x00008, 312_000, 238_000),
];

/// Code → cycle index table for one definition
#[derive(Debug)]
pub struct Lookup {
    table: HashMap<u32, u32>,
}

impl Lookup {
    fn build(def: &TimecodeDefinition) -> Self {
        let mut table = HashMap::with_capacity(def.length as usize);
        let mut code = def.seed;
        for n in 0..def.length {
            let previous = table.insert(code, n);
            debug_assert!(previous.is_none(), "{}: sequence repeats at {}", def.name, n);
            code = def.forward(code);
        }
        Self { table }
    }

    /// Cycle index at which `code` occupies the register
    #[inline]
    pub fn position(&self, code: u32) -> Option<u32> {
        self.table.get(&code).copied()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[inline]
fn parity(value: u32) -> u32 {
    value.count_ones() & 1
}

impl TimecodeDefinition {
    #[allow(clippy::too_many_arguments)]
    const fn new(
        name: &'static str,
        description: &'static str,
        bits: u32,
        resolution: u32,
        switches: Switches,
        seed: u32,
        taps: u32,
        length: u32,
        safe: u32,
    ) -> Self {
        Self {
            name,
            description,
            bits,
            resolution,
            switch_phase: switches.phase,
            switch_primary: switches.primary,
            switch_polarity: switches.polarity,
            seed,
            taps,
            length,
            safe,
            lookup: OnceLock::new(),
        }
    }

    /// Every definition in the catalog
    pub fn all() -> &'static [TimecodeDefinition] {
        &CATALOG
    }

    /// Find a definition by name
    pub fn find(name: &str) -> Option<&'static TimecodeDefinition> {
        CATALOG.iter().find(|def| def.name == name)
    }

    /// The definition after this one, wrapping around the catalog
    pub fn next_after(&self) -> &'static TimecodeDefinition {
        let index = CATALOG
            .iter()
            .position(|def| def.name == self.name)
            .unwrap_or(0);
        &CATALOG[(index + 1) % CATALOG.len()]
    }

    #[inline]
    pub fn mask(&self) -> u32 {
        (1u32 << self.bits) - 1
    }

    /// Advance the register by one cycle
    #[inline]
    pub fn forward(&self, code: u32) -> u32 {
        let feedback = parity(code & (self.taps | 1));
        (code >> 1) | (feedback << (self.bits - 1))
    }

    /// Step the register back by one cycle
    #[inline]
    pub fn reverse(&self, code: u32) -> u32 {
        let feedback = parity(code & ((self.taps >> 1) | (1 << (self.bits - 1))));
        ((code << 1) & self.mask()) | feedback
    }

    /// Playable length of the record in seconds
    pub fn duration(&self) -> f64 {
        self.safe as f64 / self.resolution as f64
    }

    /// Code → cycle table, built on first use
    ///
    /// Building allocates one entry per cycle, so call `prepare` from a
    /// control thread before handing the definition to a realtime path.
    pub fn lookup(&self) -> &Lookup {
        self.lookup.get_or_init(|| {
            log::info!(
                "Building timecode lookup for {} ({} cycles)",
                self.name,
                self.length
            );
            Lookup::build(self)
        })
    }

    pub fn prepare(&self) {
        self.lookup();
    }

    pub fn is_prepared(&self) -> bool {
        self.lookup.get().is_some()
    }
}

impl PartialEq for TimecodeDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_catalog_entries() {
        assert_eq!(TimecodeDefinition::all().len(), 7);
        let def = TimecodeDefinition::find("traktor_a").unwrap();
        assert_eq!(def.bits, 23);
        assert!(def.switch_primary && def.switch_phase && def.switch_polarity);
        assert!(TimecodeDefinition::find("nonexistent").is_none());
        assert!(TimecodeDefinition::find(DEFAULT_TIMECODE).is_some());
    }

    #[test]
    fn test_next_after_wraps() {
        let last = TimecodeDefinition::find("mixvibes_7inch").unwrap();
        assert_eq!(last.next_after().name, "serato_2a");
        let first = TimecodeDefinition::find("serato_2a").unwrap();
        assert_eq!(first.next_after().name, "serato_2b");
    }

    #[test]
    fn test_reverse_undoes_forward() {
        for def in TimecodeDefinition::all() {
            let mut code = def.seed;
            for _ in 0..1000 {
                let next = def.forward(code);
                assert_eq!(def.reverse(next), code, "{}", def.name);
                code = next;
            }
        }
    }

    #[test]
    fn test_lookup_matches_sequence() {
        let def = TimecodeDefinition::find("mixvibes_7inch").unwrap();
        let lookup = def.lookup();
        assert_eq!(lookup.len(), def.length as usize);
        assert!(def.is_prepared());

        let mut code = def.seed;
        for n in 0..5000 {
            assert_eq!(lookup.position(code), Some(n));
            code = def.forward(code);
        }
    }
}
