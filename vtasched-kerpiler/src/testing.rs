use crate::pre::*;

pub struct ConvGraph {
    pub g: Graph,
    pub conv: NodeId,
    pub bias: NodeId,
    pub ewise: Vec<NodeId>,
    pub consts: Vec<NodeId>,
}

// conv -> +bias -> >>8 -> clip(-127, 127) -> cast int8 -> output
pub fn conv_graph() -> ConvGraph {
    conv_graph_with(sh([1, 4, 16, 16, 1, 16]), sh([4, 4, 3, 3, 16, 16]), [1, 1])
}

pub fn conv_graph_with(ishape: Shape, kshape: Shape, padding: [usize; 2]) -> ConvGraph {
    let mut g = Graph::new();
    let co = [kshape.dims()[0], kshape.dims()[4]];
    let d = g.placeholder("data", ishape, DType::I8);
    let k = g.placeholder("kernel", kshape, DType::I8);
    let bias = g.placeholder("bias", Shape(smallvec::smallvec![Dim::Fix(1), co[0], Dim::Fix(1), Dim::Fix(1), Dim::Fix(1), co[1]]), DType::I32);
    let conv = conv2d_packed(&mut g, &mut 0u64, d, k, [1, 1], padding, [1, 1], "NCHW1n16c", DType::I32).unwrap();
    let add = g.broadcast(BinOp::Add, conv, bias).unwrap();
    let eight = g.constant(8, DType::I32);
    let shr = g.broadcast(BinOp::Shr, add, eight).unwrap();
    let hi = g.constant(127, DType::I32);
    let lo = g.constant(-127, DType::I32);
    let min = g.broadcast(BinOp::Min, shr, hi).unwrap();
    let max = g.broadcast(BinOp::Max, min, lo).unwrap();
    let cast = g.cast(max, DType::I8);
    g.output(cast).unwrap();
    ConvGraph { g, conv, bias, ewise: vec![cast, max, min, shr, add], consts: vec![eight, hi, lo] }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
