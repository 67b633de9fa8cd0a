pub mod conv;
pub mod ewise;

use smallvec::*;
use vtasched_arena::{Arena, Idx};

use crate::env::{Instr, MemScope};
use crate::error::{Result, ScheduleError};
use crate::pre::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisKind {
    Data,
    Reduce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadTag {
    // hardware-interleaved virtual thread
    VThread,
}

impl std::fmt::Display for ThreadTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreadTag::VThread => f.write_str("cthread"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IterVar {
    pub name: String,
    pub extent: usize,
    pub kind: AxisKind,
}

pub type AxisId = Idx<IterVar>;

// outer runs ceil(extent / factor) times
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SplitRel {
    pub parent: AxisId,
    pub outer: AxisId,
    pub inner: AxisId,
    pub factor: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageOp {
    // computes a graph node
    Compute(NodeId),
    // copies a graph node into a local scope
    CacheRead(NodeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Attach {
    #[default]
    Root,
    Inline,
    At { stage: StageId, axis: AxisId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Annotation {
    pub axis: AxisId,
    pub instr: Instr,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Stage {
    pub name: String,
    pub op: StageOp,
    pub dtype: DType,
    // one-line description of the body, for listings
    pub body: String,
    pub axis: SmallVec<[AxisId; 6]>,
    pub reduce_axis: SmallVec<[AxisId; 4]>,
    pub leaf: Vec<AxisId>,
    pub relations: Vec<SplitRel>,
    pub scope: MemScope,
    pub attach: Attach,
    pub bindings: Vec<(AxisId, ThreadTag)>,
    pub annotations: Vec<Annotation>,
    // stages reading a cache-read copy
    pub readers: Vec<StageId>,
}

pub type StageId = Idx<Stage>;

// the fused path skips Threaded and ReductionStaged
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlanState {
    Created,
    GraphClassified,
    ScopesAssigned,
    Tiled,
    Threaded,
    ReductionStaged,
    // terminal: hardware primitives are bound
    Tensorized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    stages: Arena<Stage>,
    axes: Arena<IterVar>,
    by_node: Vec<Option<StageId>>,
    root: StageId,
    state: PlanState,
}

const PACKED_AXES: [&str; 6] = ["b_o", "c_o", "i", "j", "b_i", "c_i"];

fn axis_names(rank: usize) -> Vec<String> {
    if rank == packed::RANK {
        PACKED_AXES.iter().map(|s| s.to_string()).collect()
    } else {
        (0..rank).map(|i| format!("ax{i}")).collect()
    }
}

fn describe(g: &Graph, op: &Op) -> String {
    let n = |x: NodeId| g.node(x).name.clone();
    match op {
        Op::Placeholder => String::new(),
        Op::Pad { input, pad } => format!("pad({}, {:?})", n(*input), pad),
        Op::Conv { data, kernel, .. } => format!("sum({} * {})", n(*data), n(*kernel)),
        Op::Broadcast { op, lhs, rhs } => match op {
            BinOp::Max | BinOp::Min => format!("{}({}, {})", op.symbol(), n(*lhs), n(*rhs)),
            _ => format!("{} {} {}", n(*lhs), op.symbol(), n(*rhs)),
        },
        Op::BroadcastConst { value } => value.to_string(),
        Op::Cast { input } => format!("cast({})", n(*input)),
        Op::Output { input } => n(*input).to_string(),
    }
}

fn new_stage(
    stages: &mut Arena<Stage>,
    axes: &mut Arena<IterVar>,
    g: &Graph,
    op: StageOp,
    name: String,
    reduce: &[(String, usize)],
) -> Result<StageId> {
    let (StageOp::Compute(id) | StageOp::CacheRead(id)) = op;
    let node = g.node(id);
    let extents = node.shape.as_const()?;
    let axis: SmallVec<[AxisId; 6]> = axes.alloc_ext(axis_names(extents.len()).into_iter().zip(extents.iter())
        .map(|(name, &extent)| IterVar { name, extent, kind: AxisKind::Data })).into_iter().collect();
    let reduce_axis: SmallVec<[AxisId; 4]> = axes.alloc_ext(reduce.iter()
        .map(|(name, extent)| IterVar { name: name.clone(), extent: *extent, kind: AxisKind::Reduce })).into_iter().collect();
    let body = match op {
        StageOp::Compute(_) => describe(g, &node.op),
        StageOp::CacheRead(_) => format!("copy({})", node.name),
    };
    let leaf = axis.iter().chain(reduce_axis.iter()).copied().collect();
    Ok(stages.alloc(Stage {
        name, op, body, dtype: node.dtype, axis, reduce_axis, leaf,
        relations: vec![],
        scope: MemScope::Global,
        attach: Attach::Root,
        bindings: vec![],
        annotations: vec![],
        readers: vec![],
    }))
}

impl Schedule {
    // one stage per reachable computed node, producers first
    pub fn new(g: &Graph) -> Result<Self> {
        let mut stages = Arena::new();
        let mut axes = Arena::new();
        let mut by_node = vec![None; g.len()];
        let mut root = None;
        let out = g.root()?;
        for id in g.reachable()? {
            let node = g.node(id);
            if matches!(node.op, Op::Placeholder) { continue; }
            let reduce: Vec<(String, usize)> = match &node.op {
                Op::Conv { reduce, .. } => reduce.iter().map(|r| (r.name.to_string(), r.extent)).collect(),
                _ => vec![],
            };
            let stage = new_stage(&mut stages, &mut axes, g, StageOp::Compute(id), node.name.clone(), &reduce)?;
            by_node[id.index()] = Some(stage);
            if id == out { root = Some(stage); }
        }
        let root = root.ok_or_else(|| ScheduleError::MalformedGraph("output has no stage".into()))?;
        Ok(Schedule { stages, axes, by_node, root, state: PlanState::Created })
    }

    pub fn stage(&self, s: StageId) -> &Stage {
        &self.stages[s]
    }
    pub fn axis(&self, a: AxisId) -> &IterVar {
        &self.axes[a]
    }
    pub fn stages(&self) -> impl ExactSizeIterator<Item = (StageId, &Stage)> + '_ {
        self.stages.iter()
    }
    pub fn len(&self) -> usize {
        self.stages.len()
    }
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
    pub fn root(&self) -> StageId {
        self.root
    }
    pub fn state(&self) -> PlanState {
        self.state
    }
    pub fn stage_of(&self, node: NodeId) -> Result<StageId> {
        self.by_node.get(node.index()).copied().flatten()
            .ok_or_else(|| ScheduleError::MalformedGraph(format!("node {node:?} has no stage")))
    }
    // the split that produced `axis`, if any
    pub fn split_of(&self, s: StageId, axis: AxisId) -> Option<&SplitRel> {
        self.stages[s].relations.iter().find(|r| r.outer == axis || r.inner == axis)
    }

    pub(crate) fn advance(&mut self, next: PlanState) -> Result<()> {
        if next <= self.state {
            Err(ScheduleError::MalformedGraph(format!("cannot move from {:?} back to {next:?}", self.state)))?
        }
        log::debug!("schedule: {:?} -> {next:?}", self.state);
        self.state = next;
        Ok(())
    }

    fn leaf_pos(&self, s: StageId, axis: AxisId) -> Result<usize> {
        let stage = &self.stages[s];
        stage.leaf.iter().position(|a| *a == axis).ok_or_else(|| ScheduleError::InvalidAxis(
            format!("{} is not a leaf axis of {}", self.axes[axis].name, stage.name)))
    }

    /// Split a leaf axis by `factor`. The last inner tile may be partial.
    pub fn split(&mut self, s: StageId, axis: AxisId, factor: usize) -> Result<(AxisId, AxisId)> {
        let pos = self.leaf_pos(s, axis)?;
        let IterVar { name, extent, kind } = self.axes[axis].clone();
        if factor == 0 {
            Err(ScheduleError::InfeasibleTiling { name: name.clone(), extent, outer: 0, inner: 0 })?
        }
        let outer = self.axes.alloc(IterVar { name: format!("{name}.outer"), extent: extent.div_ceil(factor), kind });
        let inner = self.axes.alloc(IterVar { name: format!("{name}.inner"), extent: factor, kind });
        let stage = &mut self.stages[s];
        stage.leaf.splice(pos..=pos, [outer, inner]);
        stage.relations.push(SplitRel { parent: axis, outer, inner, factor });
        log::trace!("{}: split {name} by {factor}", stage.name);
        Ok((outer, inner))
    }

    // permutes the listed axes among the positions they occupy
    pub fn reorder(&mut self, s: StageId, order: &[AxisId]) -> Result<()> {
        let mut pos = order.iter().map(|a| self.leaf_pos(s, *a)).collect::<Result<Vec<_>>>()?;
        pos.sort_unstable();
        if pos.windows(2).any(|w| w[0] == w[1]) {
            Err(ScheduleError::InvalidAxis(format!("duplicate axis in reorder of {}", self.stages[s].name)))?
        }
        let stage = &mut self.stages[s];
        for (p, a) in pos.into_iter().zip(order) {
            stage.leaf[p] = *a;
        }
        log::trace!("{}: reorder {:?}", stage.name, order);
        Ok(())
    }

    pub fn bind(&mut self, s: StageId, axis: AxisId, tag: ThreadTag) -> Result<()> {
        self.leaf_pos(s, axis)?;
        if self.axes[axis].kind == AxisKind::Reduce {
            Err(ScheduleError::InvalidAxis(format!("cannot bind reduction axis {}", self.axes[axis].name)))?
        }
        let stage = &mut self.stages[s];
        if stage.bindings.iter().any(|(a, _)| *a == axis) {
            Err(ScheduleError::InvalidAxis(format!("{} is already bound", self.axes[axis].name)))?
        }
        stage.bindings.push((axis, tag));
        log::trace!("{}: bind {} to {tag}", stage.name, self.axes[axis].name);
        Ok(())
    }

    pub fn compute_at(&mut self, s: StageId, parent: StageId, axis: AxisId) -> Result<()> {
        if s == parent {
            Err(ScheduleError::InvalidAxis(format!("{} cannot be attached to itself", self.stages[s].name)))?
        }
        self.leaf_pos(parent, axis)?;
        // the parent must not already sit inside `s`
        let mut up = parent;
        while let Attach::At { stage, .. } = self.stages[up].attach {
            if stage == s {
                Err(ScheduleError::InvalidAxis(format!(
                    "attaching {} to {} forms a cycle", self.stages[s].name, self.stages[parent].name)))?
            }
            up = stage;
        }
        log::trace!("{}: compute at {}.{}", self.stages[s].name, self.stages[parent].name, self.axes[axis].name);
        self.stages[s].attach = Attach::At { stage: parent, axis };
        Ok(())
    }

    pub fn compute_inline(&mut self, s: StageId) -> Result<()> {
        if s == self.root {
            Err(ScheduleError::MalformedGraph("the output stage cannot be inlined".into()))?
        }
        log::trace!("{}: inline", self.stages[s].name);
        self.stages[s].attach = Attach::Inline;
        Ok(())
    }

    // inline every injective compute stage except the output
    pub fn auto_inline_injective(&mut self, g: &Graph) {
        let root = self.root;
        for (id, stage) in self.stages.iter_mut() {
            if let StageOp::Compute(node) = stage.op {
                if id != root && g.node(node).op.is_injective() {
                    stage.attach = Attach::Inline;
                }
            }
        }
    }

    pub fn set_scope(&mut self, s: StageId, scope: MemScope) {
        log::trace!("{}: scope {scope}", self.stages[s].name);
        self.stages[s].scope = scope;
    }

    // copy of `tensor` in `scope`, read by `readers` instead
    pub fn cache_read(&mut self, g: &Graph, tensor: NodeId, scope: MemScope, readers: &[StageId]) -> Result<StageId> {
        let base = format!("{}.{}", g.node(tensor).name, scope);
        // a tensor cached once per reader gets numbered copies
        let taken = |n: &str| self.stages.iter().any(|(_, st)| st.name == n);
        let mut name = base.clone();
        let mut i = 0;
        while taken(&name) {
            i += 1;
            name = format!("{base}.{i}");
        }
        let s = new_stage(&mut self.stages, &mut self.axes, g, StageOp::CacheRead(tensor), name, &[])?;
        let stage = &mut self.stages[s];
        stage.scope = scope;
        stage.readers = readers.to_vec();
        log::trace!("{}: cache read for {} readers", stage.name, readers.len());
        Ok(s)
    }

    pub fn pragma(&mut self, s: StageId, axis: AxisId, instr: Instr) -> Result<()> {
        self.leaf_pos(s, axis)?;
        if instr == Instr::Gemm {
            Err(ScheduleError::InvalidAxis(format!("{instr} must be tensorized, not a pragma")))?
        }
        self.stages[s].annotations.push(Annotation { axis, instr });
        Ok(())
    }

    // loops from `axis` inwards must match `shape` exactly
    pub fn tensorize(&mut self, s: StageId, axis: AxisId, instr: Instr, shape: &[usize]) -> Result<()> {
        let pos = self.leaf_pos(s, axis)?;
        let stage = &self.stages[s];
        let region = stage.leaf[pos..].iter().map(|a| self.axes[*a].extent).collect::<Vec<_>>();
        if region != shape {
            Err(ScheduleError::IntrinsicMismatch(format!(
                "{instr} on {} expects loops {shape:?}, found {region:?}", stage.name)))?
        }
        log::trace!("{}: tensorize {} as {instr}", stage.name, self.axes[axis].name);
        self.stages[s].annotations.push(Annotation { axis, instr });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalSchedule(Schedule);

impl FinalSchedule {
    pub(crate) fn new(s: Schedule) -> Self {
        let f = FinalSchedule(s);
        if log::log_enabled!(log::Level::Info) {
            log::info!("finalized {} stages at {:?} as {}", f.len(), f.state(), f.kernel_name());
        }
        f
    }
}

impl std::ops::Deref for FinalSchedule {
    type Target = Schedule;
    fn deref(&self) -> &Schedule {
        &self.0
    }
}
