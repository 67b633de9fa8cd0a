use crate::classify::{classify_conv, Partition};
use crate::env::{HwEnv, Instr, MemScope};
use crate::error::{Result, ScheduleError};
use crate::ker::*;
use crate::pre::*;
use crate::space::{ConfigSpace, SplitPolicy, TileSource};

#[derive(Debug, Clone)]
pub struct Classified {
    pub part: Partition,
    pub output: StageId,
    pub conv: StageId,
    // pad feeding the conv, if any
    pub pad: Option<StageId>,
    pub data: NodeId,
    pub kernel: NodeId,
}

#[derive(Debug, Clone)]
pub struct Scoped {
    pub output: StageId,
    pub conv: StageId,
    pub cdata: StageId,
    pub ckernel: StageId,
    pub ewise: Vec<StageId>,
    // accumulator copies of placeholders read by ewise stages
    pub ewise_caches: Vec<StageId>,
}

// output loops after tiling
#[derive(Debug, Clone, Copy)]
pub struct OutputLoops {
    pub b_o: AxisId,
    pub co0: AxisId,
    pub co1: AxisId,
    pub i0: AxisId,
    pub i1: AxisId,
    pub j0: AxisId,
    pub j1: AxisId,
}

#[derive(Debug, Clone, Copy)]
pub struct ConvLoops {
    pub k_o: AxisId,
    pub b_i: AxisId,
}

// declare the tunables of a packed conv graph
pub fn define_space(space: &mut ConfigSpace, g: &Graph) -> Result<()> {
    let (_, conv) = classify_conv(g)?;
    let node = g.node(conv);
    let ext = node.shape.as_const()?;
    let Op::Conv { reduce, .. } = &node.op else {
        return Err(ScheduleError::MalformedGraph(format!("`{}` is not a convolution", node.name)));
    };
    space.define_split("tile_b", ext[packed::OUTER_BATCH], SplitPolicy::Factors)?;
    space.define_split("tile_h", ext[packed::HEIGHT], SplitPolicy::Factors)?;
    space.define_split("tile_w", ext[packed::WIDTH], SplitPolicy::Factors)?;
    space.define_split("tile_ci", reduce[0].extent, SplitPolicy::Factors)?;
    space.define_split("tile_co", ext[packed::OUTER_CHANNEL], SplitPolicy::Factors)?;
    space.define_knob("oc_nthread", &[1, 2])?;
    space.define_knob("h_nthread", &[1, 2])?;
    Ok(())
}

pub fn classify(s: &mut Schedule, g: &Graph) -> Result<Classified> {
    let (part, conv_node) = classify_conv(g)?;
    let node = g.node(conv_node);
    if !node.dtype.is_int() {
        Err(ScheduleError::UnsupportedDtype(node.dtype))?
    }
    let output = s.root();
    if s.stage(output).axis.len() != packed::RANK {
        Err(ScheduleError::InvalidShape(format!("output `{}` is not a packed tensor", s.stage(output).name)))?
    }
    let Op::Conv { data, kernel, .. } = node.op else {
        return Err(ScheduleError::MalformedGraph(format!("`{}` is not a convolution", node.name)));
    };
    let pad = match g.node(data).op {
        Op::Pad { .. } => Some(s.stage_of(data)?),
        _ => None,
    };
    let conv = s.stage_of(conv_node)?;
    s.advance(PlanState::GraphClassified)?;
    Ok(Classified { part, output, conv, pad, data, kernel })
}

pub fn assign_scopes(s: &mut Schedule, g: &Graph, c: Classified) -> Result<Scoped> {
    let Classified { part, output, conv, pad, data, kernel } = c;
    let mut ewise_caches = vec![];
    for &(consumer, leaf) in &part.leaves {
        // axis-less inputs are read in place
        if g.node(leaf).shape.rank() == 0 { continue; }
        let reader = s.stage_of(consumer)?;
        ewise_caches.push(s.cache_read(g, leaf, MemScope::AccumulatorLocal, &[reader])?);
    }
    let ewise = part.ewise.iter().map(|x| s.stage_of(*x)).collect::<Result<Vec<_>>>()?;
    for &e in &ewise {
        s.set_scope(e, MemScope::AccumulatorLocal);
    }
    for &x in &part.consts {
        let st = s.stage_of(x)?;
        s.compute_inline(st)?;
    }
    let cdata = match pad {
        Some(p) => {
            s.set_scope(p, MemScope::InputLocal);
            p
        }
        None => s.cache_read(g, data, MemScope::InputLocal, &[conv])?,
    };
    let ckernel = s.cache_read(g, kernel, MemScope::WeightLocal, &[conv])?;
    s.set_scope(conv, MemScope::AccumulatorLocal);
    s.advance(PlanState::ScopesAssigned)?;
    Ok(Scoped { output, conv, cdata, ckernel, ewise, ewise_caches })
}

pub fn tile(s: &mut Schedule, st: &Scoped, cfg: &impl TileSource) -> Result<OutputLoops> {
    let out = st.output;
    let [b_o, c_o, i, j, b_i, c_i] = axes6(s, out)?;
    let (co0, co1) = apply_split(s, out, c_o, "tile_co", cfg)?;
    let (i0, i1) = apply_split(s, out, i, "tile_h", cfg)?;
    let (j0, j1) = apply_split(s, out, j, "tile_w", cfg)?;
    s.reorder(out, &[b_o, i0, co0, j0, co1, i1, j1, b_i, c_i])?;
    // everything else is computed once per outer width tile
    s.compute_at(st.conv, out, j0)?;
    for &e in &st.ewise {
        s.compute_at(e, out, j0)?;
    }
    for &c in &st.ewise_caches {
        s.compute_at(c, out, j0)?;
    }
    s.advance(PlanState::Tiled)?;
    Ok(OutputLoops { b_o, co0, co1, i0, i1, j0, j1 })
}

pub fn thread(s: &mut Schedule, st: &Scoped, l: OutputLoops, cfg: &impl TileSource) -> Result<()> {
    for (knob, axis) in [("oc_nthread", l.co0), ("h_nthread", l.i0)] {
        let n = thread_count(s, knob, axis, cfg)?;
        if n > 1 {
            let (_, v_t) = s.split(st.output, axis, n)?;
            s.reorder(st.output, &[v_t, l.b_o])?;
            s.bind(st.output, v_t, ThreadTag::VThread)?;
        }
    }
    s.advance(PlanState::Threaded)?;
    Ok(())
}

pub fn stage_reduction(s: &mut Schedule, st: &Scoped, cfg: &impl TileSource) -> Result<ConvLoops> {
    let conv = st.conv;
    let [b_o, c_o, i, j, b_i, c_i] = axes6(s, conv)?;
    let [k_o, d_i, d_j, k_i] = match s.stage(conv).reduce_axis.as_slice() {
        [a, b, c, d] => [*a, *b, *c, *d],
        found => Err(ScheduleError::MalformedGraph(format!("conv has {} reduction axes", found.len())))?,
    };
    s.reorder(conv, &[b_o, k_o, j, d_j, d_i, c_o, i, b_i, c_i, k_i])?;
    let (k_o, _) = apply_split(s, conv, k_o, "tile_ci", cfg)?;
    // one input and weight tile per outer reduction step
    s.compute_at(st.cdata, conv, k_o)?;
    s.compute_at(st.ckernel, conv, k_o)?;
    s.advance(PlanState::ReductionStaged)?;
    Ok(ConvLoops { k_o, b_i })
}

pub fn map_instructions(s: &mut Schedule, st: &Scoped, l: OutputLoops, c: ConvLoops, env: &HwEnv) -> Result<()> {
    for cache in [st.cdata, st.ckernel] {
        let first = s.stage(cache).axis[0];
        s.pragma(cache, first, Instr::DmaCopy)?;
    }
    s.tensorize(st.conv, c.b_i, Instr::Gemm, &[env.batch, env.block_out, env.block_in])?;
    s.pragma(st.output, l.co1, Instr::DmaCopy)?;
    for &e in &st.ewise {
        let first = s.stage(e).axis[0];
        s.pragma(e, first, Instr::Alu)?;
    }
    for &c in &st.ewise_caches {
        let first = s.stage(c).axis[0];
        s.pragma(c, first, Instr::DmaCopy)?;
    }
    s.advance(PlanState::Tensorized)?;
    Ok(())
}

// classify -> assign_scopes -> tile -> thread -> stage_reduction -> map_instructions
pub fn plan(g: &Graph, cfg: &impl TileSource, env: &HwEnv) -> Result<FinalSchedule> {
    let mut s = Schedule::new(g)?;
    let c = classify(&mut s, g)?;
    let st = assign_scopes(&mut s, g, c)?;
    let loops = tile(&mut s, &st, cfg)?;
    thread(&mut s, &st, loops, cfg)?;
    let conv = stage_reduction(&mut s, &st, cfg)?;
    map_instructions(&mut s, &st, loops, conv, env)?;
    Ok(FinalSchedule::new(s))
}

fn axes6(s: &Schedule, st: StageId) -> Result<[AxisId; 6]> {
    match s.stage(st).axis.as_slice() {
        [a, b, c, d, e, f] => Ok([*a, *b, *c, *d, *e, *f]),
        found => Err(ScheduleError::InvalidShape(format!(
            "`{}` has {} axes, expected {}", s.stage(st).name, found.len(), packed::RANK))),
    }
}

fn apply_split(s: &mut Schedule, st: StageId, axis: AxisId, name: &str, cfg: &impl TileSource) -> Result<(AxisId, AxisId)> {
    let f = cfg.split(name, s.axis(axis).extent)?;
    s.split(st, axis, f.inner)
}

fn thread_count(s: &Schedule, knob: &str, axis: AxisId, cfg: &impl TileSource) -> Result<usize> {
    let v = cfg.knob(knob)?;
    match usize::try_from(v) {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(ScheduleError::InfeasibleTiling { name: knob.to_string(), extent: s.axis(axis).extent, outer: 0, inner: 0 }),
    }
}
