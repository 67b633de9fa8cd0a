use crate::env::HwEnv;
use crate::error::Result;
use crate::ker::{conv, ewise, FinalSchedule};
use crate::pre::*;
use crate::space::{ConfigSpace, DivisorHeuristic, FlopCounter, TileSource};

// reports the flop count to `space`
#[allow(clippy::too_many_arguments)]
pub fn compute_conv2d_packed(
    space: &mut impl FlopCounter,
    data: (Shape, DType),
    kernel: (Shape, DType),
    strides: [usize; 2],
    padding: [usize; 2],
    dilation: [usize; 2],
    layout: &str,
    out_dtype: DType,
) -> Result<(Graph, NodeId)> {
    let mut g = Graph::new();
    let d = g.placeholder("data", data.0, data.1);
    let k = g.placeholder("kernel", kernel.0, kernel.1);
    let res = conv2d_packed(&mut g, space, d, k, strides, padding, dilation, layout, out_dtype)?;
    let out = g.output(res)?;
    Ok((g, out))
}

// declare the tuning knobs of a packed conv graph
pub fn conv2d_packed_space(space: &mut ConfigSpace, g: &Graph) -> Result<()> {
    conv::define_space(space, g)
}

// a configuration that fails to plan is invalid; tuners skip it
pub fn schedule_conv2d_packed(g: &Graph, cfg: &impl TileSource, env: &HwEnv) -> Result<FinalSchedule> {
    conv::plan(g, cfg, env)
}

// fused elementwise chain, tiled by the divisor heuristic
pub fn schedule_add(g: &Graph, env: &HwEnv) -> Result<FinalSchedule> {
    schedule_add_with(g, &DivisorHeuristic::default(), env)
}

pub fn schedule_add_with(g: &Graph, tiles: &impl TileSource, env: &HwEnv) -> Result<FinalSchedule> {
    ewise::plan(g, tiles, env)
}
