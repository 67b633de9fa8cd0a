use auto_impl::auto_impl;
use rand::Rng;

use crate::error::{Result, ScheduleError};

#[auto_impl(&mut, Box)]
pub trait FlopCounter {
    fn add_flop(&mut self, flop: u64);
}

impl FlopCounter for u64 {
    fn add_flop(&mut self, flop: u64) {
        *self += flop;
    }
}

// the last tile is shorter when `inner` does not divide the extent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SplitFactors {
    pub outer: usize,
    pub inner: usize,
}

impl SplitFactors {
    // ceil-divide the extent by `inner`
    pub fn for_inner(extent: usize, inner: usize) -> Self {
        SplitFactors { outer: extent.div_ceil(inner.max(1)), inner }
    }
    pub fn validate(self, name: &str, extent: usize) -> Result<Self> {
        let SplitFactors { outer, inner } = self;
        let covers = outer.checked_mul(inner).map_or(true, |n| n >= extent);
        if inner == 0 || outer == 0 || inner > extent || !covers {
            Err(ScheduleError::InfeasibleTiling { name: name.to_string(), extent, outer, inner })?
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitPolicy {
    // inner tile divides the extent
    Factors,
    // inner tile is a power of two, tail tile allowed
    PowerOfTwo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tunable {
    Split { extent: usize, policy: SplitPolicy, candidates: Vec<SplitFactors> },
    Knob { values: Vec<i64> },
}

impl Tunable {
    fn len(&self) -> usize {
        match self {
            Tunable::Split { candidates, .. } => candidates.len(),
            Tunable::Knob { values } => values.len(),
        }
    }
    fn pick(&self, i: usize) -> Resolved {
        match self {
            Tunable::Split { candidates, .. } => Resolved::Split(candidates[i]),
            Tunable::Knob { values } => Resolved::Knob(values[i]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolved {
    Split(SplitFactors),
    Knob(i64),
}

/// Where a planner takes its tile factors and thread counts from: a tuned
/// [`ConfigEntity`], a [`FallbackConfig`] or the [`DivisorHeuristic`].
#[auto_impl(&, Box)]
pub trait TileSource {
    fn split(&self, name: &str, extent: usize) -> Result<SplitFactors>;
    fn knob(&self, name: &str) -> Result<i64>;
}

// declared before any staging decision so a tuner can enumerate it
#[derive(Debug, Clone, Default)]
pub struct ConfigSpace {
    tunables: Vec<(String, Tunable)>,
    flop: u64,
}

impl ConfigSpace {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn define_split(&mut self, name: &str, extent: usize, policy: SplitPolicy) -> Result<()> {
        if extent == 0 {
            Err(ScheduleError::InvalidShape(format!("split `{name}` over an empty axis")))?
        }
        let candidates = match policy {
            SplitPolicy::Factors => divisors(extent).into_iter().map(|d| SplitFactors::for_inner(extent, d)).collect(),
            SplitPolicy::PowerOfTwo => std::iter::successors(Some(1usize), |x| x.checked_mul(2))
                .take_while(|x| *x <= extent)
                .map(|d| SplitFactors::for_inner(extent, d))
                .collect(),
        };
        self.define(name, Tunable::Split { extent, policy, candidates });
        Ok(())
    }
    pub fn define_knob(&mut self, name: &str, values: &[i64]) -> Result<()> {
        if values.is_empty() {
            Err(ScheduleError::InvalidShape(format!("knob `{name}` has no values")))?
        }
        self.define(name, Tunable::Knob { values: values.to_vec() });
        Ok(())
    }
    // re-declaring a name replaces it in place
    fn define(&mut self, name: &str, tunable: Tunable) {
        log::trace!("space: define {name} with {} candidates", tunable.len());
        match self.tunables.iter_mut().find(|(n, _)| n == name) {
            Some((_, t)) => *t = tunable,
            None => self.tunables.push((name.to_string(), tunable)),
        }
    }
    pub fn tunable(&self, name: &str) -> Option<&Tunable> {
        self.tunables.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tunables.iter().map(|(n, _)| n.as_str())
    }
    // number of distinct configurations; every tunable has at least one
    // candidate, and a space with no tunables has exactly one (empty) configuration
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.tunables.iter().map(|(_, t)| t.len()).product()
    }
    // configuration `index`, or none past the end
    pub fn get(&self, index: usize) -> Option<ConfigEntity> {
        (index < self.len()).then(|| self.decode(index))
    }
    // first declared tunable varies fastest
    fn decode(&self, index: usize) -> ConfigEntity {
        let mut rest = index;
        let values = self.tunables.iter().map(|(name, t)| {
            let i = rest % t.len();
            rest /= t.len();
            (name.clone(), t.pick(i))
        }).collect();
        ConfigEntity { index: Some(index), values }
    }
    pub fn iter(&self) -> impl Iterator<Item = ConfigEntity> + '_ {
        (0..self.len()).map(|i| self.decode(i))
    }
    pub fn sample(&self, rng: &mut impl Rng) -> ConfigEntity {
        self.decode(rng.gen_range(0..self.len()))
    }
    // configuration used when no tuning record exists
    pub fn fallback(&self) -> FallbackConfig {
        let knobs = self.tunables.iter().filter_map(|(name, t)| match t {
            Tunable::Knob { values } => Some((name.clone(), values[0])),
            Tunable::Split { .. } => None,
        }).collect();
        FallbackConfig { knobs }
    }
    pub fn flop(&self) -> u64 {
        self.flop
    }
}

impl FlopCounter for ConfigSpace {
    fn add_flop(&mut self, flop: u64) {
        self.flop += flop;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigEntity {
    index: Option<usize>,
    values: Vec<(String, Resolved)>,
}

impl ConfigEntity {
    // a hand-written configuration, not tied to any space
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, Resolved)>) -> Self {
        let values = pairs.into_iter().map(|(n, r)| (n.to_string(), r)).collect();
        ConfigEntity { index: None, values }
    }
    pub fn index(&self) -> Option<usize> {
        self.index
    }
    pub fn get(&self, name: &str) -> Option<Resolved> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, r)| *r)
    }
}

impl std::fmt::Display for ConfigEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (name, r)) in self.values.iter().enumerate() {
            if i > 0 { write!(f, ",")?; }
            match r {
                Resolved::Split(s) => write!(f, "{name}=[{}, {}]", s.outer, s.inner)?,
                Resolved::Knob(v) => write!(f, "{name}={v}")?,
            }
        }
        Ok(())
    }
}

impl TileSource for ConfigEntity {
    fn split(&self, name: &str, extent: usize) -> Result<SplitFactors> {
        match self.get(name) {
            Some(Resolved::Split(s)) => s.validate(name, extent),
            _ => Err(ScheduleError::UnknownTunable(name.to_string())),
        }
    }
    fn knob(&self, name: &str) -> Result<i64> {
        match self.get(name) {
            Some(Resolved::Knob(v)) => Ok(v),
            _ => Err(ScheduleError::UnknownTunable(name.to_string())),
        }
    }
}

// untiled splits and first knob values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackConfig {
    knobs: Vec<(String, i64)>,
}

impl TileSource for FallbackConfig {
    fn split(&self, name: &str, extent: usize) -> Result<SplitFactors> {
        SplitFactors { outer: extent, inner: 1 }.validate(name, extent)
    }
    fn knob(&self, name: &str) -> Result<i64> {
        self.knobs.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
            .ok_or_else(|| ScheduleError::UnknownTunable(name.to_string()))
    }
}

// largest divisor under a per-split ceiling; uncapped splits get 1, knobs are 1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DivisorHeuristic {
    pub caps: Vec<(String, usize)>,
}

impl Default for DivisorHeuristic {
    fn default() -> Self {
        DivisorHeuristic { caps: vec![("tile_h".into(), 28), ("tile_w".into(), 14)] }
    }
}

impl TileSource for DivisorHeuristic {
    fn split(&self, name: &str, extent: usize) -> Result<SplitFactors> {
        let inner = match self.caps.iter().find(|(n, _)| n == name) {
            Some((_, cap)) => divisors(extent).into_iter().filter(|d| d <= cap).last().unwrap_or(0),
            None => 1,
        };
        SplitFactors::for_inner(extent, inner).validate(name, extent)
    }
    fn knob(&self, _name: &str) -> Result<i64> {
        Ok(1)
    }
}

// sorted divisors of n
pub fn divisors(n: usize) -> Vec<usize> {
    let mut small = vec![];
    let mut large = vec![];
    let mut i = 1;
    while i * i <= n {
        if n % i == 0 {
            small.push(i);
            if i * i != n { large.push(n / i); }
        }
        i += 1;
    }
    small.extend(large.into_iter().rev());
    small
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisor_lists() {
        assert_eq!(divisors(1), vec![1]);
        assert_eq!(divisors(12), vec![1, 2, 3, 4, 6, 12]);
        assert_eq!(divisors(49), vec![1, 7, 49]);
        assert_eq!(divisors(0), Vec::<usize>::new());
    }

    #[test]
    fn divisor_heuristic_caps() {
        let h = DivisorHeuristic::default();
        assert_eq!(h.split("tile_h", 56).unwrap(), SplitFactors { outer: 2, inner: 28 });
        assert_eq!(h.split("tile_w", 56).unwrap(), SplitFactors { outer: 4, inner: 14 });
        assert_eq!(h.split("tile_h", 7).unwrap(), SplitFactors { outer: 1, inner: 7 });
        assert_eq!(h.split("tile_w", 17).unwrap(), SplitFactors { outer: 17, inner: 1 });
        assert_eq!(h.split("tile_co", 4).unwrap(), SplitFactors { outer: 4, inner: 1 });
        assert_eq!(h.knob("oc_nthread").unwrap(), 1);
    }

    #[test]
    fn split_coverage_holds_for_every_candidate() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let extent = rng.gen_range(1..200usize);
            for policy in [SplitPolicy::Factors, SplitPolicy::PowerOfTwo] {
                let mut space = ConfigSpace::new();
                space.define_split("tile_x", extent, policy).unwrap();
                for cfg in space.iter() {
                    let s = cfg.split("tile_x", extent).unwrap();
                    assert!(s.outer * s.inner >= extent, "{cfg} for {extent}");
                    assert!(s.inner <= extent, "{cfg} for {extent}");
                }
            }
        }
    }

    #[test]
    fn power_of_two_uses_ceiling() {
        let mut space = ConfigSpace::new();
        space.define_split("tile_x", 10, SplitPolicy::PowerOfTwo).unwrap();
        let inners = space.iter().map(|c| c.split("tile_x", 10).unwrap()).collect::<Vec<_>>();
        assert_eq!(inners, vec![
            SplitFactors { outer: 10, inner: 1 },
            SplitFactors { outer: 5, inner: 2 },
            SplitFactors { outer: 3, inner: 4 },
            SplitFactors { outer: 2, inner: 8 },
        ]);
    }

    #[test]
    fn enumeration_is_mixed_radix() {
        let mut space = ConfigSpace::new();
        space.define_split("tile_h", 4, SplitPolicy::Factors).unwrap();
        space.define_knob("h_nthread", &[1, 2]).unwrap();
        assert_eq!(space.len(), 6);
        let all = space.iter().collect::<Vec<_>>();
        assert_eq!(all[1].get("tile_h"), Some(Resolved::Split(SplitFactors { outer: 2, inner: 2 })));
        assert_eq!(all[1].knob("h_nthread").unwrap(), 1);
        assert_eq!(all[3].knob("h_nthread").unwrap(), 2);
        assert_eq!(all[5].index(), Some(5));
        assert_eq!(space.get(1).as_ref(), Some(&all[1]));
        assert_eq!(space.get(6), None);
        assert_eq!(space.get(7), None);
        let mut rng = rand::thread_rng();
        let picked = space.sample(&mut rng);
        assert!(all.contains(&picked));
    }

    #[test]
    fn empty_space_has_one_configuration() {
        let space = ConfigSpace::new();
        assert_eq!(space.len(), 1);
        let all = space.iter().collect::<Vec<_>>();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].to_string(), "");
        assert_eq!(space.get(0).as_ref(), Some(&all[0]));
        assert_eq!(space.get(1), None);
        assert_eq!(space.sample(&mut rand::thread_rng()), all[0]);
    }

    #[test]
    fn infeasible_and_unknown_tunables() {
        let cfg = ConfigEntity::from_pairs([
            ("tile_w", Resolved::Split(SplitFactors { outer: 2, inner: 4 })),
            ("oc_nthread", Resolved::Knob(2)),
        ]);
        assert!(matches!(cfg.split("tile_w", 9), Err(ScheduleError::InfeasibleTiling { .. })));
        assert!(matches!(cfg.split("tile_w", 3), Err(ScheduleError::InfeasibleTiling { .. })));
        assert_eq!(cfg.split("tile_w", 8).unwrap().inner, 4);
        assert!(matches!(cfg.split("tile_h", 8), Err(ScheduleError::UnknownTunable(_))));
        assert!(matches!(cfg.split("oc_nthread", 8), Err(ScheduleError::UnknownTunable(_))));
        assert_eq!(cfg.to_string(), "tile_w=[2, 4],oc_nthread=2");
    }

    #[test]
    fn fallback_is_untiled() {
        let mut space = ConfigSpace::new();
        space.define_split("tile_h", 14, SplitPolicy::Factors).unwrap();
        space.define_knob("oc_nthread", &[1, 2]).unwrap();
        let fb = space.fallback();
        assert_eq!(fb.split("tile_h", 14).unwrap(), SplitFactors { outer: 14, inner: 1 });
        assert_eq!(fb.knob("oc_nthread").unwrap(), 1);
        assert!(fb.knob("h_nthread").is_err());
    }

    #[test]
    fn flops_accumulate() {
        let mut space = ConfigSpace::new();
        space.add_flop(10);
        (&mut space).add_flop(5);
        assert_eq!(space.flop(), 15);
        let mut n = 0u64;
        n.add_flop(3);
        assert_eq!(n, 3);
    }
}
