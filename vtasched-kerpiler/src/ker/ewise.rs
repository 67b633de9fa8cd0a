use crate::classify::classify_fused;
use crate::env::{HwEnv, Instr, MemScope};
use crate::error::{Result, ScheduleError};
use crate::ker::*;
use crate::pre::*;
use crate::space::TileSource;

#[derive(Debug, Clone)]
pub struct FusedStages {
    pub output: StageId,
    pub ewise: Vec<StageId>,
    pub caches: Vec<StageId>,
}

pub fn assign_scopes(s: &mut Schedule, g: &Graph) -> Result<FusedStages> {
    let part = classify_fused(g)?;
    s.advance(PlanState::GraphClassified)?;
    let mut caches = vec![];
    for &(consumer, leaf) in &part.leaves {
        if g.node(leaf).shape.rank() == 0 { continue; }
        let reader = s.stage_of(consumer)?;
        caches.push(s.cache_read(g, leaf, MemScope::AccumulatorLocal, &[reader])?);
    }
    let ewise = part.ewise.iter().map(|x| s.stage_of(*x)).collect::<Result<Vec<_>>>()?;
    for &e in &ewise {
        s.set_scope(e, MemScope::AccumulatorLocal);
    }
    for &x in &part.consts {
        let st = s.stage_of(x)?;
        s.compute_inline(st)?;
    }
    s.advance(PlanState::ScopesAssigned)?;
    Ok(FusedStages { output: s.root(), ewise, caches })
}

// split and reorder the output; returns (x_co1, x_j0)
pub fn tile(s: &mut Schedule, st: &FusedStages, tiles: &impl TileSource) -> Result<(AxisId, AxisId)> {
    let out = st.output;
    let [b_o, c_o, i, j, b_i, c_i] = match s.stage(out).axis.as_slice() {
        [a, b, c, d, e, f] => [*a, *b, *c, *d, *e, *f],
        found => Err(ScheduleError::InvalidShape(format!(
            "`{}` has {} axes, expected {}", s.stage(out).name, found.len(), packed::RANK)))?,
    };
    let mut split = |axis: AxisId, name: &str| -> Result<(AxisId, AxisId)> {
        let f = tiles.split(name, s.axis(axis).extent)?;
        s.split(out, axis, f.inner)
    };
    let (co0, co1) = split(c_o, "tile_co")?;
    let (i0, i1) = split(i, "tile_h")?;
    let (j0, j1) = split(j, "tile_w")?;
    s.reorder(out, &[b_o, i0, co0, j0, co1, i1, j1, b_i, c_i])?;
    for &e in &st.ewise {
        s.compute_at(e, out, j0)?;
    }
    for &c in &st.caches {
        s.compute_at(c, out, j0)?;
    }
    s.advance(PlanState::Tiled)?;
    Ok((co1, j0))
}

pub fn map_instructions(s: &mut Schedule, st: &FusedStages, co1: AxisId) -> Result<()> {
    for &e in &st.ewise {
        let first = s.stage(e).axis[0];
        s.pragma(e, first, Instr::Alu)?;
    }
    for &c in &st.caches {
        let first = s.stage(c).axis[0];
        s.pragma(c, first, Instr::DmaCopy)?;
    }
    s.pragma(st.output, co1, Instr::DmaCopy)?;
    s.advance(PlanState::Tensorized)?;
    Ok(())
}

// integer outputs go to the accumulator, the rest stays on the host
pub fn plan(g: &Graph, tiles: &impl TileSource, env: &HwEnv) -> Result<FinalSchedule> {
    let mut s = Schedule::new(g)?;
    s.auto_inline_injective(g);
    let out = g.node(g.root()?);
    if !out.dtype.is_int() {
        log::debug!("fused: {} output stays on the host", out.dtype);
        return Ok(FinalSchedule::new(s));
    }
    if out.dtype.bits() > env.acc_dtype.bits() {
        Err(ScheduleError::UnsupportedDtype(out.dtype))?
    }
    let st = assign_scopes(&mut s, g)?;
    let (co1, _) = tile(&mut s, &st, tiles)?;
    map_instructions(&mut s, &st, co1)?;
    Ok(FinalSchedule::new(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::DivisorHeuristic;
    use crate::testing::init_logger;

    fn add_graph(dtype: DType) -> (Graph, NodeId) {
        let mut g = Graph::new();
        let a = g.placeholder("a", sh([1, 4, 56, 56, 1, 16]), dtype);
        let b = g.placeholder("b", sh([1, 4, 56, 56, 1, 16]), dtype);
        let x = g.broadcast(BinOp::Add, a, b).unwrap();
        g.output(x).unwrap();
        (g, x)
    }

    fn leaf_extents(s: &Schedule, st: StageId) -> Vec<(String, usize)> {
        s.stage(st).leaf.iter().map(|a| (s.axis(*a).name.clone(), s.axis(*a).extent)).collect()
    }

    #[test]
    fn divisor_tiles() {
        init_logger();
        let (g, x) = add_graph(DType::I32);
        let s = plan(&g, &DivisorHeuristic::default(), &HwEnv::default()).unwrap();
        assert_eq!(s.state(), PlanState::Tensorized);
        let out = s.root();
        let want = [("b_o", 1), ("i.outer", 2), ("c_o.outer", 4), ("j.outer", 4), ("c_o.inner", 1),
            ("i.inner", 28), ("j.inner", 14), ("b_i", 1), ("c_i", 16)];
        assert_eq!(leaf_extents(&s, out), want.map(|(n, e)| (n.to_string(), e)));
        let j0 = s.stage(out).leaf[3];
        let add = s.stage(s.stage_of(x).unwrap());
        assert_eq!(add.scope, MemScope::AccumulatorLocal);
        assert_eq!(add.attach, Attach::At { stage: out, axis: j0 });
        assert_eq!(add.annotations[0].instr, Instr::Alu);
        let caches = s.stages().filter(|(_, st)| matches!(st.op, StageOp::CacheRead(_))).collect::<Vec<_>>();
        assert_eq!(caches.iter().map(|(_, st)| st.name.as_str()).collect::<Vec<_>>(),
            ["a.local.acc_buffer", "b.local.acc_buffer"]);
        for (_, st) in caches {
            assert_eq!(st.attach, Attach::At { stage: out, axis: j0 });
            assert_eq!(st.annotations[0].instr, Instr::DmaCopy);
        }
        let co1 = s.stage(out).leaf[4];
        assert_eq!(s.stage(out).annotations, vec![Annotation { axis: co1, instr: Instr::DmaCopy }]);
    }

    #[test]
    fn float_output_is_only_inlined() {
        let (g, x) = add_graph(DType::F32);
        let s = plan(&g, &DivisorHeuristic::default(), &HwEnv::default()).unwrap();
        assert_eq!(s.state(), PlanState::Created);
        assert_eq!(s.stage(s.stage_of(x).unwrap()).attach, Attach::Inline);
        assert!(s.stages().all(|(_, st)| st.annotations.is_empty() && st.scope == MemScope::Global));
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn cast_boundaries() {
        let mut g = Graph::new();
        let a = g.placeholder("a", sh([1, 2, 8, 8, 1, 16]), DType::I8);
        let b = g.placeholder("b", sh([1, 2, 8, 8, 1, 16]), DType::I32);
        let wide = g.cast(a, DType::I32);
        let three = g.constant(3, DType::I32);
        let sum = g.broadcast(BinOp::Add, wide, b).unwrap();
        let shifted = g.broadcast(BinOp::Shr, sum, three).unwrap();
        let narrow = g.cast(shifted, DType::I8);
        g.output(narrow).unwrap();
        let s = plan(&g, &DivisorHeuristic::default(), &HwEnv::default()).unwrap();
        // the output cast is walked through and left inlined
        assert_eq!(s.stage(s.stage_of(narrow).unwrap()).attach, Attach::Inline);
        assert_eq!(s.stage(s.stage_of(three).unwrap()).attach, Attach::Inline);
        for x in [sum, shifted] {
            assert_eq!(s.stage(s.stage_of(x).unwrap()).scope, MemScope::AccumulatorLocal);
        }
        // the interior cast is read like an input
        let names = s.stages().filter(|(_, st)| matches!(st.op, StageOp::CacheRead(_)))
            .map(|(_, st)| st.name.clone()).collect::<Vec<_>>();
        assert_eq!(names, ["T_cast.local.acc_buffer", "b.local.acc_buffer"]);
        assert_eq!(s.stage(s.stage_of(wide).unwrap()).scope, MemScope::Global);
    }

    #[test]
    fn consts_behind_interior_cast_stay_on_host() {
        let mut g = Graph::new();
        let a = g.placeholder("a", sh([1, 1, 4, 4, 1, 16]), DType::F32);
        let half = g.constant(2, DType::F32);
        let scaled = g.broadcast(BinOp::Mul, a, half).unwrap();
        let q = g.cast(scaled, DType::I32);
        let b = g.placeholder("b", sh([1, 1, 4, 4, 1, 16]), DType::I32);
        let sum = g.broadcast(BinOp::Add, q, b).unwrap();
        g.output(sum).unwrap();
        let s = plan(&g, &DivisorHeuristic::default(), &HwEnv::default()).unwrap();
        assert_eq!(s.state(), PlanState::Tensorized);
        // auto-inlined, never scoped or annotated
        for x in [half, scaled] {
            let st = s.stage(s.stage_of(x).unwrap());
            assert_eq!(st.attach, Attach::Inline);
            assert_eq!(st.scope, MemScope::Global);
            assert!(st.annotations.is_empty());
        }
    }

    #[test]
    fn non_packed_output_is_rejected() {
        let mut g = Graph::new();
        let a = g.placeholder("a", sh([4, 16]), DType::I32);
        let b = g.placeholder("b", sh([4, 16]), DType::I32);
        let x = g.broadcast(BinOp::Max, a, b).unwrap();
        g.output(x).unwrap();
        assert!(matches!(plan(&g, &DivisorHeuristic::default(), &HwEnv::default()), Err(ScheduleError::InvalidShape(_))));
    }
}
