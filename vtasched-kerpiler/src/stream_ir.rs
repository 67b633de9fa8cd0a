use std::fmt::{Display, Formatter, Result as FmtResult};

use sha2::{Digest, Sha256};

use crate::ker::*;

// attached stages print at the top of their loop body, inlined ones not at all
pub struct Listing<'a>(&'a Schedule);

impl<'a> Listing<'a> {
    fn stage(&self, f: &mut Formatter<'_>, s: StageId, depth: usize) -> FmtResult {
        let sch = self.0;
        let st = sch.stage(s);
        writeln!(f, "{:w$}produce {} ({}, {}) {{", "", st.name, st.scope, st.dtype, w = depth * 2)?;
        let mut d = depth + 1;
        let mut tensorized = false;
        for &a in &st.leaf {
            let ax = sch.axis(a);
            if let Some(t) = st.annotations.iter().find(|n| n.axis == a && n.instr == crate::env::Instr::Gemm) {
                let region = st.leaf.iter().skip_while(|x| **x != a).map(|x| sch.axis(*x).extent).collect::<Vec<_>>();
                writeln!(f, "{:w$}{} {:?} -> {}", "", t.instr, region, st.name, w = d * 2)?;
                tensorized = true;
                break;
            }
            write!(f, "{:w$}for {} in 0..{} {{", "", ax.name, ax.extent, w = d * 2)?;
            for (_, tag) in st.bindings.iter().filter(|(x, _)| *x == a) {
                write!(f, " // {tag}")?;
            }
            for n in st.annotations.iter().filter(|n| n.axis == a) {
                write!(f, " // pragma {}", n.instr)?;
            }
            writeln!(f)?;
            d += 1;
            for (c, _) in sch.stages().filter(|(_, c)| c.attach == (Attach::At { stage: s, axis: a })) {
                self.stage(f, c, d)?;
            }
        }
        if !tensorized {
            writeln!(f, "{:w$}{} = {}", "", st.name, st.body, w = d * 2)?;
        }
        // close the loops opened above
        while d > depth + 1 {
            d -= 1;
            writeln!(f, "{:w$}}}", "", w = d * 2)?;
        }
        writeln!(f, "{:w$}}}", "", w = depth * 2)
    }
}

impl<'a> Display for Listing<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (s, st) in self.0.stages() {
            if st.attach == Attach::Root {
                self.stage(f, s, 0)?;
            }
        }
        Ok(())
    }
}

impl FinalSchedule {
    pub fn listing(&self) -> Listing<'_> {
        Listing(self)
    }
    pub fn render(&self) -> String {
        self.listing().to_string()
    }
    // hex sha256 of the listing
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.render().as_bytes()))
    }
    pub fn kernel_name(&self) -> String {
        format!("__{}", self.fingerprint())
    }
}
