//! Step-level model of the linked queue.
//!
//! Each simulated thread runs a fixed script of `Push(v)` and `Pop`
//! operations. An action is one shared-memory step of the algorithm:
//!
//! | Operation | Steps |
//! |-----------|-------|
//! | push | allocate + read tail, link CAS (walk forward on failure), tail hint store |
//! | pop, multi-consumer | read head, read `head.next`, head CAS, take payload |
//! | pop, single-consumer | read `head.next` and advance head, take payload |
//!
//! Nodes live in an arena that only grows, so a node index is never reused
//! and a stale snapshot can never alias a newer node.
//!
//! Every reachable state is checked for:
//!
//! | Property | Kind |
//! |----------|------|
//! | linearizable | always |
//! | no duplicate pops | always |
//! | sentinel discipline | always |
//! | tail in chain | always |
//! | per-producer order | always |
//! | no loss at quiescence | always |
//! | obstruction free | always |
//! | push retried | sometimes, with two or more pushing threads |
//! | pop retried | sometimes, multi-consumer with two or more popping threads |

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use cq_core::{Counterexample, QueueOp, QueueRet, StateSnapshot};
use stateright::semantics::{ConsistencyTester, LinearizabilityTester, SequentialSpec};
use stateright::{Checker, Model, Property};
use tracing::{info, warn};

/// Properties that must hold in every reachable state.
pub const ALWAYS_PROPERTIES: [&str; 7] = [
    "linearizable",
    "no duplicate pops",
    "sentinel discipline",
    "tail in chain",
    "per-producer order",
    "no loss at quiescence",
    "obstruction free",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Discipline {
    SingleConsumer,
    MultiConsumer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptOp {
    Push(u64),
    Pop,
}

/// Deliberate algorithm bugs, for checking that the checker notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelBug {
    /// Multi-consumer pop stores the successor into head without
    /// comparing against its snapshot
    UnconditionalHeadStore,
}

/// Sequential FIFO reference for the linearizability tester.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FifoSpec(VecDeque<u64>);

impl SequentialSpec for FifoSpec {
    type Op = QueueOp;
    type Ret = QueueRet;

    fn invoke(&mut self, op: &QueueOp) -> QueueRet {
        match *op {
            QueueOp::Push(v) => {
                self.0.push_back(v);
                QueueRet::Pushed
            }
            QueueOp::Pop => QueueRet::Popped(self.0.pop_front()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelNode {
    /// `None` only for the initial sentinel
    pub value: Option<u64>,
    pub next: Option<usize>,
    /// Payload moved out by a pop
    pub taken: bool,
}

/// Where a thread is inside its current operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    PushLink { node: usize, snapshot: usize },
    PushStoreTail { node: usize },
    PopReadNext { snapshot: usize },
    PopCas { snapshot: usize, next: usize },
    PopTake { node: usize },
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadState {
    /// Index of the current script operation
    pub pc: usize,
    pub phase: Phase,
}

#[derive(Debug, Clone, Hash)]
pub struct QueueState {
    pub nodes: Vec<ModelNode>,
    pub head: usize,
    pub tail: usize,
    pub threads: Vec<ThreadState>,
    /// Values returned by pops, in return order
    pub popped: Vec<u64>,
    pub push_retried: bool,
    pub pop_retried: bool,
    pub history: LinearizabilityTester<usize, FifoSpec>,
}

impl QueueState {
    /// The tester refuses a call only when the model itself misuses it
    /// (an invoke while the thread has a call in flight, a return without
    /// one). That is a model bug, so debug builds stop right here.
    fn record_invoke(&mut self, t: usize, op: QueueOp) {
        let recorded = self.history.on_invoke(t, op).is_ok();
        debug_assert!(recorded, "thread {} invoked {:?} with a call in flight", t, op);
    }

    fn record_return(&mut self, t: usize, ret: QueueRet) {
        let recorded = self.history.on_return(t, ret).is_ok();
        debug_assert!(recorded, "thread {} returned {:?} with no call in flight", t, ret);
    }

    /// Node indices reachable from `from`, inclusive.
    fn chain_from(&self, from: usize) -> Vec<usize> {
        let mut out = vec![from];
        let mut cur = from;
        while let Some(next) = self.nodes[cur].next {
            out.push(next);
            cur = next;
        }
        out
    }

    fn sentinel_discipline_holds(&self) -> bool {
        let after_head = self.chain_from(self.head).into_iter().skip(1).all(|n| {
            let node = &self.nodes[n];
            node.value.is_some() && !node.taken
        });
        // Between a winning head CAS and its take the head still holds
        // its payload.
        let head_node = &self.nodes[self.head];
        let head_ok = self.head == 0
            || head_node.taken
            || self
                .threads
                .iter()
                .any(|t| t.phase == Phase::PopTake { node: self.head });
        after_head && head_ok
    }

    fn all_done(&self) -> bool {
        self.threads.iter().all(|t| t.phase == Phase::Done)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueAction {
    /// Allocate a node and read the tail snapshot
    BeginPush(usize),
    LinkCas(usize),
    StoreTail(usize),
    /// Multi-consumer: read the head snapshot
    BeginPop(usize),
    /// Multi-consumer: read the snapshot's successor
    ReadNext(usize),
    HeadCas(usize),
    /// Single-consumer: read `head.next`, advance head if non-null
    AdvanceHead(usize),
    Take(usize),
}

impl QueueAction {
    pub fn thread(&self) -> usize {
        match *self {
            QueueAction::BeginPush(t)
            | QueueAction::LinkCas(t)
            | QueueAction::StoreTail(t)
            | QueueAction::BeginPop(t)
            | QueueAction::ReadNext(t)
            | QueueAction::HeadCas(t)
            | QueueAction::AdvanceHead(t)
            | QueueAction::Take(t) => t,
        }
    }
}

impl fmt::Display for QueueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            QueueAction::BeginPush(_) => "push: read tail",
            QueueAction::LinkCas(_) => "push: link CAS",
            QueueAction::StoreTail(_) => "push: store tail",
            QueueAction::BeginPop(_) => "pop: read head",
            QueueAction::ReadNext(_) => "pop: read next",
            QueueAction::HeadCas(_) => "pop: head CAS",
            QueueAction::AdvanceHead(_) => "pop: advance head",
            QueueAction::Take(_) => "pop: take",
        };
        f.write_str(step)
    }
}

#[derive(Debug, Clone)]
pub struct QueueModel {
    pub discipline: Discipline,
    pub scripts: Vec<Vec<ScriptOp>>,
    pub bug: Option<ModelBug>,
    /// value -> (pushing thread, position among that thread's pushes)
    origins: HashMap<u64, (usize, usize)>,
}

impl QueueModel {
    /// # Panics
    ///
    /// If a value is pushed twice, or a single-consumer model has more
    /// than one popping thread.
    pub fn new(discipline: Discipline, scripts: Vec<Vec<ScriptOp>>) -> Self {
        let mut origins = HashMap::new();
        for (t, script) in scripts.iter().enumerate() {
            let pushes = script.iter().filter_map(|op| match op {
                ScriptOp::Push(v) => Some(*v),
                ScriptOp::Pop => None,
            });
            for (i, v) in pushes.enumerate() {
                assert!(origins.insert(v, (t, i)).is_none(), "value {} pushed twice", v);
            }
        }
        let model = Self {
            discipline,
            scripts,
            bug: None,
            origins,
        };
        assert!(
            discipline == Discipline::MultiConsumer || model.popping_threads() <= 1,
            "single-consumer model with {} popping threads",
            model.popping_threads()
        );
        model
    }

    /// `producers` threads pushing `pushes_each` distinct values, then
    /// `consumers` threads popping `pops_each` times.
    pub fn producers_consumers(
        discipline: Discipline,
        producers: usize,
        pushes_each: usize,
        consumers: usize,
        pops_each: usize,
    ) -> Self {
        let mut scripts: Vec<Vec<ScriptOp>> = (0..producers)
            .map(|p| {
                (0..pushes_each)
                    .map(|i| ScriptOp::Push((p * pushes_each + i + 1) as u64))
                    .collect()
            })
            .collect();
        scripts.extend((0..consumers).map(|_| vec![ScriptOp::Pop; pops_each]));
        Self::new(discipline, scripts)
    }

    #[must_use]
    pub fn with_bug(mut self, bug: ModelBug) -> Self {
        self.bug = Some(bug);
        self
    }

    fn pushing_threads(&self) -> usize {
        self.scripts
            .iter()
            .filter(|s| s.iter().any(|op| matches!(op, ScriptOp::Push(_))))
            .count()
    }

    fn popping_threads(&self) -> usize {
        self.scripts
            .iter()
            .filter(|s| s.contains(&ScriptOp::Pop))
            .count()
    }

    /// Names of the `sometimes` properties this configuration can reach.
    pub fn sometimes_properties(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.pushing_threads() >= 2 {
            names.push("push retried");
        }
        if self.discipline == Discipline::MultiConsumer && self.popping_threads() >= 2 {
            names.push("pop retried");
        }
        names
    }

    fn next_action(&self, state: &QueueState, t: usize) -> Option<QueueAction> {
        let thread = &state.threads[t];
        let action = match thread.phase {
            Phase::Done => return None,
            Phase::Idle => match self.scripts[t].get(thread.pc)? {
                ScriptOp::Push(_) => QueueAction::BeginPush(t),
                ScriptOp::Pop => match self.discipline {
                    Discipline::SingleConsumer => QueueAction::AdvanceHead(t),
                    Discipline::MultiConsumer => QueueAction::BeginPop(t),
                },
            },
            Phase::PushLink { .. } => QueueAction::LinkCas(t),
            Phase::PushStoreTail { .. } => QueueAction::StoreTail(t),
            Phase::PopReadNext { .. } => QueueAction::ReadNext(t),
            Phase::PopCas { .. } => QueueAction::HeadCas(t),
            Phase::PopTake { .. } => QueueAction::Take(t),
        };
        Some(action)
    }

    fn finish_op(&self, state: &mut QueueState, t: usize) {
        let thread = &mut state.threads[t];
        thread.pc += 1;
        thread.phase = if thread.pc < self.scripts[t].len() {
            Phase::Idle
        } else {
            Phase::Done
        };
    }

    /// Thread `t` takes its next step.
    fn step(&self, state: &QueueState, t: usize) -> Option<QueueState> {
        let mut s = state.clone();
        let phase = s.threads[t].phase;
        let pc = s.threads[t].pc;

        match phase {
            Phase::Done => return None,
            Phase::Idle => match *self.scripts[t].get(pc)? {
                ScriptOp::Push(v) => {
                    let node = s.nodes.len();
                    s.nodes.push(ModelNode {
                        value: Some(v),
                        next: None,
                        taken: false,
                    });
                    s.record_invoke(t, QueueOp::Push(v));
                    s.threads[t].phase = Phase::PushLink {
                        node,
                        snapshot: s.tail,
                    };
                }
                ScriptOp::Pop => {
                    s.record_invoke(t, QueueOp::Pop);
                    match self.discipline {
                        Discipline::MultiConsumer => {
                            s.threads[t].phase = Phase::PopReadNext { snapshot: s.head };
                        }
                        Discipline::SingleConsumer => match s.nodes[s.head].next {
                            None => {
                                s.record_return(t, QueueRet::Popped(None));
                                self.finish_op(&mut s, t);
                            }
                            Some(next) => {
                                s.head = next;
                                s.threads[t].phase = Phase::PopTake { node: next };
                            }
                        },
                    }
                }
            },
            Phase::PushLink { node, snapshot } => match s.nodes[snapshot].next {
                None => {
                    s.nodes[snapshot].next = Some(node);
                    s.threads[t].phase = Phase::PushStoreTail { node };
                }
                Some(successor) => {
                    s.push_retried = true;
                    s.threads[t].phase = Phase::PushLink {
                        node,
                        snapshot: successor,
                    };
                }
            },
            Phase::PushStoreTail { node } => {
                s.tail = node;
                s.record_return(t, QueueRet::Pushed);
                self.finish_op(&mut s, t);
            }
            Phase::PopReadNext { snapshot } => match s.nodes[snapshot].next {
                None => {
                    s.record_return(t, QueueRet::Popped(None));
                    self.finish_op(&mut s, t);
                }
                Some(next) => s.threads[t].phase = Phase::PopCas { snapshot, next },
            },
            Phase::PopCas { snapshot, next } => {
                let unconditional = self.bug == Some(ModelBug::UnconditionalHeadStore);
                if s.head == snapshot || unconditional {
                    s.head = next;
                    s.threads[t].phase = Phase::PopTake { node: next };
                } else {
                    s.pop_retried = true;
                    s.threads[t].phase = Phase::PopReadNext { snapshot: s.head };
                }
            }
            Phase::PopTake { node } => {
                let value = s.nodes[node].value;
                s.nodes[node].taken = true;
                s.popped.extend(value);
                s.record_return(t, QueueRet::Popped(value));
                self.finish_op(&mut s, t);
            }
        }
        Some(s)
    }

    /// Run thread `t` alone from `state`; true if its current operation
    /// completes within a bound linear in the chain length.
    fn solo_completes(&self, state: &QueueState, t: usize) -> bool {
        let thread = &state.threads[t];
        if matches!(thread.phase, Phase::Idle | Phase::Done) {
            return true;
        }
        let pc = thread.pc;
        let bound = 3 + 2 * state.nodes.len();
        let mut s = state.clone();
        for _ in 0..bound {
            match self.step(&s, t) {
                Some(next) => s = next,
                None => return false,
            }
            if s.threads[t].pc != pc {
                return true;
            }
        }
        false
    }

    fn per_producer_order_holds(&self, state: &QueueState) -> bool {
        let mut last: HashMap<usize, usize> = HashMap::new();
        state.chain_from(0).into_iter().all(|n| {
            let Some(value) = state.nodes[n].value else {
                return true;
            };
            let Some(&(producer, seq)) = self.origins.get(&value) else {
                return true;
            };
            let ordered = last.get(&producer).map_or(true, |&prev| seq > prev);
            last.insert(producer, seq);
            ordered
        })
    }

    fn no_loss_at_quiescence(&self, state: &QueueState) -> bool {
        if !state.all_done() {
            return true;
        }
        let mut out: Vec<u64> = state.popped.clone();
        out.extend(
            state
                .chain_from(state.head)
                .into_iter()
                .skip(1)
                .filter_map(|n| state.nodes[n].value),
        );
        out.sort_unstable();
        let mut pushed: Vec<u64> = self.origins.keys().copied().collect();
        pushed.sort_unstable();
        out == pushed
    }

    /// Replay `actions` from the initial state as a rendered counterexample.
    pub fn counterexample(&self, actions: &[QueueAction], property: &str) -> Counterexample {
        let mut ce = Counterexample::new().with_description(format!("'{}' violated", property));
        let Some(mut state) = self.init_states().into_iter().next() else {
            return ce;
        };

        for &action in actions {
            let t = action.thread();
            let label = match self.scripts[t].get(state.threads[t].pc) {
                Some(ScriptOp::Push(v)) => format!("push({}): {}", v, strip_op(action)),
                _ => format!("pop(): {}", strip_op(action)),
            };
            let Some(next) = self.next_state(&state, action) else {
                break;
            };
            let success = match action {
                QueueAction::LinkCas(_) => !matches!(next.threads[t].phase, Phase::PushLink { .. }),
                QueueAction::HeadCas(_) => !matches!(next.threads[t].phase, Phase::PopReadNext { .. }),
                _ => true,
            };
            ce.push_action(t as u64, label, success);
            state = next;
        }

        let chain: Vec<u64> = state
            .chain_from(state.head)
            .into_iter()
            .skip(1)
            .filter_map(|n| state.nodes[n].value)
            .collect();
        ce.add_state(StateSnapshot {
            step: actions.len().max(1) as u64,
            description: "final state".to_string(),
            variables: vec![
                ("head".to_string(), state.head.to_string()),
                ("tail".to_string(), state.tail.to_string()),
                ("queued".to_string(), format!("{:?}", chain)),
                ("popped".to_string(), format!("{:?}", state.popped)),
            ],
        });
        ce
    }
}

fn strip_op(action: QueueAction) -> String {
    let full = action.to_string();
    match full.split_once(": ") {
        Some((_, step)) => step.to_string(),
        None => full,
    }
}

impl Model for QueueModel {
    type State = QueueState;
    type Action = QueueAction;

    fn init_states(&self) -> Vec<Self::State> {
        let threads = self
            .scripts
            .iter()
            .map(|script| ThreadState {
                pc: 0,
                phase: if script.is_empty() {
                    Phase::Done
                } else {
                    Phase::Idle
                },
            })
            .collect();
        vec![QueueState {
            nodes: vec![ModelNode {
                value: None,
                next: None,
                taken: false,
            }],
            head: 0,
            tail: 0,
            threads,
            popped: Vec::new(),
            push_retried: false,
            pop_retried: false,
            history: LinearizabilityTester::new(FifoSpec::default()),
        }]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        actions.extend((0..state.threads.len()).filter_map(|t| self.next_action(state, t)));
    }

    fn next_state(&self, last_state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let t = action.thread();
        if self.next_action(last_state, t) != Some(action) {
            return None;
        }
        self.step(last_state, t)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        let mut properties = vec![
            Property::always("linearizable", |_, s: &QueueState| s.history.is_consistent()),
            Property::always("no duplicate pops", |_, s: &QueueState| {
                let mut seen = HashSet::new();
                s.popped.iter().all(|v| seen.insert(*v))
            }),
            Property::always("sentinel discipline", |_, s: &QueueState| {
                s.sentinel_discipline_holds()
            }),
            Property::always("tail in chain", |_, s: &QueueState| {
                s.chain_from(0).contains(&s.tail)
            }),
            Property::always("per-producer order", |m: &QueueModel, s: &QueueState| {
                m.per_producer_order_holds(s)
            }),
            Property::always("no loss at quiescence", |m: &QueueModel, s: &QueueState| {
                m.no_loss_at_quiescence(s)
            }),
            Property::always("obstruction free", |m: &QueueModel, s: &QueueState| {
                (0..s.threads.len()).all(|t| m.solo_completes(s, t))
            }),
        ];
        if self.pushing_threads() >= 2 {
            properties.push(Property::sometimes("push retried", |_, s: &QueueState| {
                s.push_retried
            }));
        }
        if self.discipline == Discipline::MultiConsumer && self.popping_threads() >= 2 {
            properties.push(Property::sometimes("pop retried", |_, s: &QueueState| {
                s.pop_retried
            }));
        }
        properties
    }
}

/// Outcome of exhaustively checking one model configuration.
#[derive(Debug, Clone)]
pub struct ModelReport {
    pub passed: bool,
    pub state_count: usize,
    /// Violated `always` properties with a replayed counterexample
    pub violations: Vec<(&'static str, Counterexample)>,
    /// `sometimes` properties never reached
    pub unreached: Vec<&'static str>,
}

impl ModelReport {
    pub fn format(&self) -> String {
        let status = if self.passed { "PASS" } else { "FAIL" };
        let mut out = format!("[{}] stateright: {} states", status, self.state_count);
        for (name, ce) in &self.violations {
            out.push_str(&format!("\n  Property \"{}\" violated\n", name));
            out.push_str(&ce.render_diagram());
        }
        for name in &self.unreached {
            out.push_str(&format!("\n  Property \"{}\" never reached", name));
        }
        out
    }

    pub fn violated(&self, name: &str) -> Option<&Counterexample> {
        self.violations
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, ce)| ce)
    }
}

/// Breadth-first search of every reachable state.
pub fn check_model(model: QueueModel) -> ModelReport {
    let threads = std::thread::available_parallelism().map_or(1, |n| n.get());
    let replay = model.clone();
    let sometimes = model.sometimes_properties();

    let checker = model.checker().threads(threads).spawn_bfs().join();
    let state_count = checker.unique_state_count();

    let violations: Vec<(&'static str, Counterexample)> = ALWAYS_PROPERTIES
        .iter()
        .filter_map(|&name| {
            let path = checker.discovery(name)?;
            Some((name, replay.counterexample(&path.into_actions(), name)))
        })
        .collect();
    let unreached: Vec<&'static str> = sometimes
        .into_iter()
        .filter(|&name| checker.discovery(name).is_none())
        .collect();

    let report = ModelReport {
        passed: checker.is_done() && violations.is_empty() && unreached.is_empty(),
        state_count,
        violations,
        unreached,
    };
    if report.passed {
        info!(states = state_count, "model check passed");
    } else {
        warn!(states = state_count, "{}", report.format());
    }
    report
}
