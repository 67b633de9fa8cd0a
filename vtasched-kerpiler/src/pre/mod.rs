mod typing;
pub use typing::*;
mod tensor;
pub use tensor::*;
mod conv;
pub use conv::*;

use vtasched_arena::{Arena, Idx};

use crate::error::{Result, ScheduleError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    pub name: String,
    pub op: Op,
    pub shape: Shape,
    pub dtype: DType,
}

pub type NodeId = Idx<Node>;

// operands are allocated before their consumers, so arena order is topological
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Arena<Node>,
    root: Option<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }
    // get the number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
    // the `Output` node, once one was emitted
    pub fn root(&self) -> Result<NodeId> {
        self.root.ok_or_else(|| ScheduleError::MalformedGraph("graph has no output".into()))
    }
    // every node reachable from the root, producers before consumers
    pub fn reachable(&self) -> Result<Vec<NodeId>> {
        let root = self.root()?;
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![root];
        seen[root.index()] = true;
        while let Some(x) = stack.pop() {
            for y in self.nodes[x].op.upstream() {
                if !seen[y.index()] { seen[y.index()] = true; stack.push(y); }
            }
        }
        Ok(self.nodes.keys().filter(|x| seen[x.index()]).collect())
    }
    // add an external input
    pub fn placeholder(&mut self, name: &str, shape: Shape, dtype: DType) -> NodeId {
        let name = self.fresh(name);
        self.push(Node { name, op: Op::Placeholder, shape, dtype })
    }
    // zero-pad the spatial axes of a packed tensor by `pad` on both sides
    pub fn pad(&mut self, input: NodeId, pad: [usize; 2]) -> Result<NodeId> {
        let src = &self.nodes[input];
        if src.shape.rank() != packed::RANK {
            Err(ScheduleError::InvalidShape(format!("pad expects a packed rank-6 tensor, got {}", src.shape)))?
        }
        let mut shape = src.shape.clone();
        for (axis, p) in [(packed::HEIGHT, pad[0]), (packed::WIDTH, pad[1])] {
            shape.0[axis] = match shape.0[axis] {
                Dim::Fix(n) => Dim::Fix(n + 2 * p),
                Dim::Var(_) => Err(ScheduleError::InvalidShape(format!("cannot pad symbolic axis {axis}")))?,
            };
        }
        let dtype = src.dtype;
        let name = self.fresh("pad_data");
        Ok(self.push(Node { name, op: Op::Pad { input, pad }, shape, dtype }))
    }
    // elementwise binary op with numpy-style broadcasting
    pub fn broadcast(&mut self, op: BinOp, lhs: NodeId, rhs: NodeId) -> Result<NodeId> {
        let (l, r) = (&self.nodes[lhs], &self.nodes[rhs]);
        if l.dtype != r.dtype {
            Err(ScheduleError::MalformedGraph(format!("{op:?} mixes {} and {}", l.dtype, r.dtype)))?
        }
        let shape = broadcast_shape(&l.shape, &r.shape)?;
        let dtype = l.dtype;
        let name = self.fresh(&format!("T_{}", format!("{op:?}").to_lowercase()));
        Ok(self.push(Node { name, op: Op::Broadcast { op, lhs, rhs }, shape, dtype }))
    }
    // axis-less scalar
    pub fn constant(&mut self, value: i64, dtype: DType) -> NodeId {
        let name = self.fresh("T_const");
        self.push(Node { name, op: Op::BroadcastConst { value }, shape: Shape::scalar(), dtype })
    }
    pub fn cast(&mut self, input: NodeId, dtype: DType) -> NodeId {
        let shape = self.nodes[input].shape.clone();
        let name = self.fresh("T_cast");
        self.push(Node { name, op: Op::Cast { input }, shape, dtype })
    }
    // mark `input` as the graph result, once
    pub fn output(&mut self, input: NodeId) -> Result<NodeId> {
        if let Some(root) = self.root {
            Err(ScheduleError::MalformedGraph(format!("graph already has output {}", self.nodes[root].name)))?
        }
        let src = &self.nodes[input];
        let (shape, dtype) = (src.shape.clone(), src.dtype);
        let name = self.fresh("output");
        let id = self.push(Node { name, op: Op::Output { input }, shape, dtype });
        self.root = Some(id);
        Ok(id)
    }
    // push a new node, used by the builders above
    pub(crate) fn push(&mut self, node: Node) -> NodeId {
        log::trace!("graph: {} = {:?} {} {}", node.name, node.op, node.shape, node.dtype);
        self.nodes.alloc(node)
    }
    // unique node name derived from `base`
    pub(crate) fn fresh(&self, base: &str) -> String {
        let taken = |n: &str| self.nodes.iter().any(|(_, x)| x.name == n);
        let mut name = base.to_string();
        let mut i = 0;
        while taken(&name) {
            i += 1;
            name = format!("{base}.{i}");
        }
        name
    }
}

fn broadcast_shape(lhs: &Shape, rhs: &Shape) -> Result<Shape> {
    if lhs.rank() == 0 { return Ok(rhs.clone()); }
    if rhs.rank() == 0 { return Ok(lhs.clone()); }
    if lhs.rank() != rhs.rank() {
        Err(ScheduleError::InvalidShape(format!("cannot broadcast {lhs} with {rhs}")))?
    }
    let dims = lhs.0.iter().zip(rhs.0.iter()).map(|(a, b)| match (*a, *b) {
        (a, b) if a == b => Ok(a),
        (Dim::Fix(1), b) => Ok(b),
        (a, Dim::Fix(1)) => Ok(a),
        _ => Err(ScheduleError::InvalidShape(format!("cannot broadcast {lhs} with {rhs}"))),
    }).collect::<Result<smallvec::SmallVec<[Dim; 6]>>>()?;
    Ok(Shape(dims))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_shapes() {
        let mut g = Graph::new();
        let a = g.placeholder("a", sh([1, 4, 8, 8, 1, 16]), DType::I32);
        let b = g.placeholder("bias", sh([1, 4, 1, 1, 1, 16]), DType::I32);
        let c = g.constant(8, DType::I32);
        let x = g.broadcast(BinOp::Add, a, b).unwrap();
        assert_eq!(g.node(x).shape, sh([1, 4, 8, 8, 1, 16]));
        let y = g.broadcast(BinOp::Shr, x, c).unwrap();
        assert_eq!(g.node(y).shape, sh([1, 4, 8, 8, 1, 16]));
        let z = g.placeholder("z", sh([1, 2, 8, 8, 1, 16]), DType::I32);
        assert!(matches!(g.broadcast(BinOp::Add, a, z), Err(ScheduleError::InvalidShape(_))));
        let s = g.constant(1, DType::I32);
        let k = g.broadcast(BinOp::Add, c, s).unwrap();
        assert_eq!(g.node(k).shape.rank(), 0);
    }

    #[test]
    fn dtype_mismatch_is_rejected() {
        let mut g = Graph::new();
        let a = g.placeholder("a", sh([4]), DType::I32);
        let b = g.placeholder("b", sh([4]), DType::I8);
        assert!(matches!(g.broadcast(BinOp::Add, a, b), Err(ScheduleError::MalformedGraph(_))));
    }

    #[test]
    fn names_are_unique() {
        let mut g = Graph::new();
        let a = g.placeholder("a", sh([4]), DType::I32);
        let x = g.broadcast(BinOp::Add, a, a).unwrap();
        let y = g.broadcast(BinOp::Add, x, a).unwrap();
        assert_eq!(g.node(x).name, "T_add");
        assert_eq!(g.node(y).name, "T_add.1");
        // dotted user names do not collide with numbered ones
        let p = g.placeholder("x.1", sh([4]), DType::I32);
        let q = g.placeholder("x", sh([4]), DType::I32);
        let r = g.placeholder("x", sh([4]), DType::I32);
        assert_eq!([&g.node(p).name, &g.node(q).name, &g.node(r).name], ["x.1", "x", "x.2"]);
    }

    #[test]
    fn single_output_and_reachability() {
        let mut g = Graph::new();
        assert!(g.root().is_err());
        let a = g.placeholder("a", sh([4]), DType::I32);
        let _dead = g.placeholder("dead", sh([4]), DType::I32);
        let x = g.cast(a, DType::I8);
        let o = g.output(x).unwrap();
        assert!(g.output(x).is_err());
        assert_eq!(g.reachable().unwrap(), vec![a, x, o]);
    }

    #[test]
    fn pad_grows_spatial_axes_only() {
        let mut g = Graph::new();
        let a = g.placeholder("data", sh([1, 4, 16, 16, 1, 16]), DType::I8);
        let p = g.pad(a, [1, 2]).unwrap();
        assert_eq!(g.node(p).shape, sh([1, 4, 18, 20, 1, 16]));
        let flat = g.placeholder("flat", sh([16, 16]), DType::I8);
        assert!(g.pad(flat, [1, 1]).is_err());
    }
}
