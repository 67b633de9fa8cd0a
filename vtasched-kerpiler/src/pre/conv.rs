use super::*;
use crate::space::FlopCounter;

/// Packed conv2d: `res[b_o, c_o, i, j, b_i, c_i] = sum(data[b_o, k_o, i*hs+d_i, j*ws+d_j, b_i, k_i]
/// * kernel[c_o, k_o, d_i, d_j, c_i, k_i])` with both operands upcast to `out_dtype`.
///
/// The flop count (one multiply and one add per reduction step) is reported
/// to `cost`. Returns the `res` node.
#[allow(clippy::too_many_arguments)]
pub fn conv2d_packed(
    g: &mut Graph,
    cost: &mut impl FlopCounter,
    data: NodeId,
    kernel: NodeId,
    strides: [usize; 2],
    padding: [usize; 2],
    dilation: [usize; 2],
    layout: &str,
    out_dtype: DType,
) -> Result<NodeId> {
    if !is_packed_layout(layout) {
        Err(ScheduleError::UnsupportedLayout(layout.to_string()))?
    }
    if dilation != [1, 1] {
        Err(ScheduleError::UnsupportedDilation(dilation))?
    }
    let (dshape, kshape) = (&g.node(data).shape, &g.node(kernel).shape);
    if dshape.rank() != packed::RANK || kshape.rank() != packed::RANK {
        Err(ScheduleError::InvalidShape(format!("packed conv2d needs rank-6 operands, got {dshape} and {kshape}")))?
    }
    let ishape = dshape.as_const()?;
    let kshape = kshape.as_const()?;
    if ishape[1] != kshape[1] || ishape[5] != kshape[5] {
        Err(ScheduleError::InvalidShape(format!(
            "input channels disagree: data {:?} vs kernel {:?}", [ishape[1], ishape[5]], [kshape[1], kshape[5]])))?
    }
    if strides.contains(&0) {
        Err(ScheduleError::InvalidShape(format!("stride {strides:?} must be positive")))?
    }

    let pad_data = if padding != [0, 0] { g.pad(data, padding)? } else { data };
    let pshape = g.node(pad_data).shape.as_const()?;

    let mut out = [0usize; 2];
    for (o, axis) in [packed::HEIGHT, packed::WIDTH].into_iter().enumerate() {
        let (extent, k) = (pshape[axis], kshape[axis]);
        if extent < k {
            Err(ScheduleError::InvalidShape(format!("kernel extent {k} exceeds padded extent {extent} on axis {axis}")))?
        }
        out[o] = (extent - k) / strides[o] + 1;
    }
    let oshape = sh([ishape[0], kshape[0], out[0], out[1], ishape[4], kshape[4]]);

    let reduce = [
        ReduceAxis { name: "k_o", extent: ishape[1] },
        ReduceAxis { name: "d_i", extent: kshape[2] },
        ReduceAxis { name: "d_j", extent: kshape[3] },
        ReduceAxis { name: "k_i", extent: ishape[5] },
    ];
    let flop = 2 * oshape.volume()? as u64
        * (kshape[2] * kshape[3] * ishape[1] * ishape[5]) as u64;
    cost.add_flop(flop);
    log::debug!("conv2d_packed: {oshape} {out_dtype}, {flop} flop");

    let name = g.fresh("res");
    let op = Op::Conv { data: pad_data, kernel, strides, reduce };
    Ok(g.push(Node { name, op, shape: oshape, dtype: out_dtype }))
}
