use crate::error::{Result, ScheduleError};
use crate::pre::*;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    // elementwise ops with iteration axes, staged in the accumulator
    pub ewise: Vec<NodeId>,
    // axis-less ops, inlined at their use sites
    pub consts: Vec<NodeId>,
    // (consumer, leaf) pairs for direct reads of graph inputs
    pub leaves: Vec<(NodeId, NodeId)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    // packed conv: anything that is not elementwise must be the conv kernel
    Conv,
    // fused add: casts are boundaries and other ops are walked through
    Fused,
}

struct Walker<'a> {
    g: &'a Graph,
    root: NodeId,
    mode: Mode,
    seen: Vec<bool>,
    conv: Vec<NodeId>,
    part: Partition,
}

impl<'a> Walker<'a> {
    fn new(g: &'a Graph, mode: Mode) -> Result<Self> {
        Ok(Walker { g, root: g.root()?, mode, seen: vec![false; g.len()], conv: vec![], part: Partition::default() })
    }
    fn is_placeholder(&self, x: NodeId) -> bool {
        matches!(self.g.node(x).op, Op::Placeholder)
    }
    fn is_cast(&self, x: NodeId) -> bool {
        matches!(self.g.node(x).op, Op::Cast { .. })
    }
    fn leaf(&mut self, consumer: NodeId, x: NodeId) {
        if !self.part.leaves.contains(&(consumer, x)) {
            self.part.leaves.push((consumer, x));
        }
    }
    fn walk(&mut self, x: NodeId) -> Result<()> {
        // each node is visited once, however many consumers it has
        if std::mem::replace(&mut self.seen[x.index()], true) {
            return Ok(());
        }
        let g = self.g;
        let node = g.node(x);
        match &node.op {
            Op::Broadcast { .. } | Op::BroadcastConst { .. } | Op::Cast { .. } | Op::Output { .. } => {
                if x != self.root {
                    if node.shape.rank() == 0 {
                        self.part.consts.push(x);
                    } else if self.mode == Mode::Conv || !self.is_cast(x) {
                        self.part.ewise.push(x);
                    }
                }
                for y in node.op.upstream() {
                    let boundary = self.mode == Mode::Fused && self.is_cast(y) && x != self.root;
                    if self.is_placeholder(y) || boundary {
                        self.leaf(x, y);
                    } else {
                        self.walk(y)?;
                    }
                }
            }
            Op::Conv { .. } | Op::Pad { .. } if self.mode == Mode::Fused => {
                for y in node.op.upstream() {
                    if !self.is_placeholder(y) && !self.is_cast(y) {
                        self.walk(y)?;
                    }
                }
            }
            Op::Conv { .. } => self.conv.push(x),
            Op::Pad { .. } | Op::Placeholder => Err(ScheduleError::MalformedGraph(format!(
                "`{}` is neither elementwise nor the convolution kernel", node.name)))?,
        }
        Ok(())
    }
}

pub fn classify_conv(g: &Graph) -> Result<(Partition, NodeId)> {
    let mut w = Walker::new(g, Mode::Conv)?;
    w.walk(w.root)?;
    let conv = match w.conv.as_slice() {
        [conv] => *conv,
        found => Err(ScheduleError::MalformedGraph(format!("expected one convolution kernel, found {}", found.len())))?,
    };
    log::debug!("classify_conv: conv {}, {} ewise, {} const, {} leaves",
        g.node(conv).name, w.part.ewise.len(), w.part.consts.len(), w.part.leaves.len());
    Ok((w.part, conv))
}

// a cast feeding an interior op is a leaf, one feeding the output is walked through
pub fn classify_fused(g: &Graph) -> Result<Partition> {
    let mut w = Walker::new(g, Mode::Fused)?;
    w.walk(w.root)?;
    log::debug!("classify_fused: {} ewise, {} const, {} leaves",
        w.part.ewise.len(), w.part.consts.len(), w.part.leaves.len());
    Ok(w.part)
}
