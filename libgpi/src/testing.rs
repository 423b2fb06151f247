//! In-memory reference adapter.
//!
//! [`SimImpl`] models a tiny simulator: a design hierarchy keyed by full
//! path, 4-state bit values, a clock, and the five callback classes. It is
//! used by the test-suite and is handy for exercising user scripts without a
//! real simulator.
//!
//! At every time point visited by [`SimImpl::advance`] callbacks run in this
//! order: next-time, timed, read-write, read-only. Value-change callbacks
//! run as soon as a write changes a value.

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use hashbrown::HashMap;

use crate::adapter::GpiImpl;
use crate::callback::{CallbackTrigger, FireOutcome};
use crate::error::{GpiError, GpiResult};
use crate::object::{GpiCbHdl, GpiIterator, GpiObjHdl, GpiSignalObjHdl, IterStep, RawHandle};
use crate::types::{CallbackKind, GpiEdge, GpiIteratorSel, GpiObjType, GpiRangeDir, GpiSetAction};

pub const SIM_PRODUCT: &str = "gpi-sim";
pub const DEFAULT_PRECISION: i32 = -12;

#[derive(Debug, Clone, PartialEq)]
enum SimValue {
    None,
    Bits(String),
    Real(f64),
    Str(Vec<u8>),
}

#[derive(Debug, Clone)]
enum SimChild {
    Native(String),
    Broken,
    Foreign(String),
    ForeignRaw(RawHandle),
}

#[derive(Debug, Clone)]
struct SimNode {
    kind: GpiObjType,
    children: Vec<SimChild>,
    value: SimValue,
    forced: bool,
    is_const: bool,
    range: (i32, i32, GpiRangeDir),
    num_elems: i32,
    indexable: bool,
    definition: Option<(String, String)>,
}

impl SimNode {
    fn new(kind: GpiObjType, value: SimValue) -> Self {
        Self {
            kind,
            children: Vec::new(),
            value,
            forced: false,
            is_const: false,
            range: (0, 0, GpiRangeDir::NoDir),
            num_elems: 1,
            indexable: false,
            definition: None,
        }
    }
}

#[derive(Debug, Clone)]
enum When {
    Timed { due: u64, delay: u64 },
    ValueChange { path: String, edge: GpiEdge },
    ReadOnly,
    NextTime { after: u64 },
    ReadWrite,
}

struct Registration {
    id: u64,
    when: When,
    trigger: CallbackTrigger,
}

#[derive(Default)]
struct SimState {
    adapter: String,
    time: u64,
    precision: i32,
    nodes: HashMap<String, SimNode>,
    roots: Vec<String>,
    packages: Vec<String>,
    raw: HashMap<RawHandle, String>,
    regs: Vec<Registration>,
    next_reg: u64,
    last_trigger: Option<CallbackTrigger>,
    end_sim_calls: u32,
    reject: bool,
    fire_on_register: bool,
}

type SharedState = Rc<RefCell<SimState>>;

fn leaf_name(path: &str) -> &str {
    path.rsplit_once('.').map_or(path, |(_, leaf)| leaf)
}

fn make_object(state: &SharedState, path: &str) -> Option<SimObject> {
    let st = state.borrow();
    let node = st.nodes.get(path)?;
    Some(SimObject {
        adapter: st.adapter.clone(),
        path: path.to_string(),
        kind: node.kind,
        num_elems: node.num_elems,
        range: node.range,
        is_const: node.is_const,
        indexable: node.indexable,
        definition: node.definition.clone(),
        state: Rc::downgrade(state),
    })
}

fn register(state: &SharedState, adapter: &str, kind: CallbackKind, when: When, trigger: CallbackTrigger) -> GpiResult<Box<dyn GpiCbHdl>> {
    let (id, fire_now) = {
        let mut st = state.borrow_mut();
        if st.reject {
            return Err(GpiError::RegistrationFailed {
                kind,
                adapter: adapter.to_string(),
            });
        }
        st.next_reg += 1;
        let id = st.next_reg;
        st.last_trigger = Some(trigger.clone());
        st.regs.push(Registration {
            id,
            when,
            trigger: trigger.clone(),
        });
        (id, st.fire_on_register)
    };

    // The registration stays in place whatever the outcome: the dispatcher
    // retires it through the returned handle.
    if fire_now {
        let _ = trigger.fire();
    }

    Ok(Box::new(SimCbHdl {
        state: Rc::downgrade(state),
        id,
        desc: format!("{kind}#{id}"),
    }))
}

fn remove_registration(state: &SharedState, id: u64) -> bool {
    let mut st = state.borrow_mut();
    let before = st.regs.len();
    st.regs.retain(|r| r.id != id);
    st.regs.len() != before
}

/// Fires every registration matching `pred`. No borrow is held while a
/// trigger runs, so reactions may register, remove or write values.
fn fire_matching<P>(state: &SharedState, pred: P)
where
    P: Fn(&When) -> bool,
{
    let batch: Vec<(u64, CallbackTrigger)> = state
        .borrow()
        .regs
        .iter()
        .filter(|r| pred(&r.when))
        .map(|r| (r.id, r.trigger.clone()))
        .collect();

    for (id, trigger) in batch {
        if !state.borrow().regs.iter().any(|r| r.id == id) {
            continue;
        }
        match trigger.fire() {
            Ok(FireOutcome::Rearmed) => {
                let mut st = state.borrow_mut();
                let now = st.time;
                if let Some(reg) = st.regs.iter_mut().find(|r| r.id == id) {
                    match &mut reg.when {
                        When::Timed { due, delay } => *due = now + (*delay).max(1),
                        When::NextTime { after } => *after = now,
                        _ => {}
                    }
                }
            }
            Ok(FireOutcome::Finished) | Err(_) => {
                remove_registration(state, id);
            }
        }
    }
}

fn int_to_bits(value: i32, width: usize) -> String {
    (0..width)
        .rev()
        .map(|i| {
            let bit = if i >= 32 { value < 0 } else { (value >> i) & 1 == 1 };
            if bit { '1' } else { '0' }
        })
        .collect()
}

/// Writes `value` to `path` and runs the value-change callbacks it wakes.
fn write_value(state: &SharedState, path: &str, value: SimValue, action: GpiSetAction) -> GpiResult<()> {
    let new_bits = {
        let mut st = state.borrow_mut();
        let node = st
            .nodes
            .get_mut(path)
            .ok_or_else(|| GpiError::Simulator(format!("{path} does not exist")))?;

        match action {
            GpiSetAction::Release => {
                node.forced = false;
                return Ok(());
            }
            GpiSetAction::Deposit | GpiSetAction::NoDelay if node.forced => return Ok(()),
            GpiSetAction::Force => node.forced = true,
            _ => {}
        }

        if node.value == value {
            return Ok(());
        }
        node.value = value;
        match &node.value {
            SimValue::Bits(b) => b.clone(),
            _ => String::new(),
        }
    };

    fire_matching(state, |w| match w {
        When::ValueChange { path: p, edge } => p == path && edge.accepts(&new_bits),
        _ => false,
    });
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────────
// Adapter
// ────────────────────────────────────────────────────────────────────────────────

pub struct SimImpl {
    name: String,
    version: String,
    state: SharedState,
}

impl SimImpl {
    pub fn new(name: &str) -> Self {
        let state = SimState {
            adapter: name.to_string(),
            precision: DEFAULT_PRECISION,
            ..Default::default()
        };
        Self {
            name: name.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: Rc::new(RefCell::new(state)),
        }
    }

    fn insert(&self, path: &str, node: SimNode) {
        let mut st = self.state.borrow_mut();
        match path.rsplit_once('.') {
            Some((parent, _)) => {
                if let Some(p) = st.nodes.get_mut(parent) {
                    p.children.push(SimChild::Native(path.to_string()));
                }
            }
            None if node.kind != GpiObjType::Package => st.roots.push(path.to_string()),
            None => {}
        }
        if node.kind == GpiObjType::Package {
            st.packages.push(path.to_string());
        }
        st.nodes.insert(path.to_string(), node);
    }

    fn push_child(&self, parent: &str, child: SimChild) {
        if let Some(p) = self.state.borrow_mut().nodes.get_mut(parent) {
            p.children.push(child);
        }
    }

    // ── design construction ─────────────────────────────────────────────

    /// A scope. Paths without a dot become top-level scopes.
    pub fn add_module(&self, path: &str) {
        self.insert(path, SimNode::new(GpiObjType::Module, SimValue::None));
    }

    pub fn add_package(&self, path: &str) {
        self.insert(path, SimNode::new(GpiObjType::Package, SimValue::None));
    }

    /// A logic signal, initialised to all zeros.
    pub fn add_signal(&self, path: &str, width: usize) {
        let width = width.max(1);
        let kind = if width == 1 { GpiObjType::Logic } else { GpiObjType::LogicArray };
        let mut node = SimNode::new(kind, SimValue::Bits("0".repeat(width)));
        node.num_elems = width as i32;
        if width > 1 {
            node.range = (width as i32 - 1, 0, GpiRangeDir::Down);
            node.indexable = true;
        }
        self.insert(path, node);
    }

    pub fn add_integer(&self, path: &str, value: i32, is_const: bool) {
        let mut node = SimNode::new(GpiObjType::Integer, SimValue::Bits(int_to_bits(value, 32)));
        node.is_const = is_const;
        self.insert(path, node);
    }

    pub fn add_real(&self, path: &str, value: f64) {
        self.insert(path, SimNode::new(GpiObjType::Real, SimValue::Real(value)));
    }

    pub fn add_string(&self, path: &str, value: &[u8]) {
        self.insert(path, SimNode::new(GpiObjType::String, SimValue::Str(value.to_vec())));
    }

    /// An unpacked array of `len` single-bit elements named `path[i]`.
    pub fn add_array(&self, path: &str, len: usize) {
        let mut node = SimNode::new(GpiObjType::Array, SimValue::None);
        node.num_elems = len as i32;
        node.range = (0, len as i32 - 1, GpiRangeDir::Up);
        node.indexable = true;
        self.insert(path, node);

        let mut st = self.state.borrow_mut();
        for i in 0..len {
            let elem = format!("{path}[{i}]");
            st.nodes.insert(elem.clone(), SimNode::new(GpiObjType::Logic, SimValue::Bits("0".into())));
            if let Some(p) = st.nodes.get_mut(path) {
                p.children.push(SimChild::Native(elem));
            }
        }
    }

    pub fn set_definition(&self, path: &str, name: &str, file: &str) {
        if let Some(node) = self.state.borrow_mut().nodes.get_mut(path) {
            node.definition = Some((name.to_string(), file.to_string()));
        }
    }

    /// A child this adapter finds while iterating but cannot set up.
    pub fn add_broken_child(&self, parent: &str) {
        self.push_child(parent, SimChild::Broken);
    }

    /// A child this adapter only knows by name.
    pub fn add_foreign_child(&self, parent: &str, name: &str) {
        self.push_child(parent, SimChild::Foreign(name.to_string()));
    }

    /// A child this adapter only knows by raw handle.
    pub fn add_foreign_raw_child(&self, parent: &str, raw: RawHandle) {
        self.push_child(parent, SimChild::ForeignRaw(raw));
    }

    /// Lets this adapter resolve `raw` to the object at `path`.
    pub fn map_raw(&self, raw: RawHandle, path: &str) {
        self.state.borrow_mut().raw.insert(raw, path.to_string());
    }

    pub fn set_precision(&self, precision: i32) {
        self.state.borrow_mut().precision = precision;
    }

    /// Makes every following callback registration fail.
    pub fn reject_registrations(&self, reject: bool) {
        self.state.borrow_mut().reject = reject;
    }

    /// Fires every following callback once from inside its registration,
    /// before the native handle is returned.
    pub fn fire_during_registration(&self, enable: bool) {
        self.state.borrow_mut().fire_on_register = enable;
    }

    // ── driving ─────────────────────────────────────────────────────────

    /// Moves time forward by `delta`, visiting every timed-callback due time
    /// on the way and the target time itself.
    pub fn advance(&self, delta: u64) {
        let target = self.time() + delta;
        loop {
            let next_due = self
                .state
                .borrow()
                .regs
                .iter()
                .filter_map(|r| match r.when {
                    When::Timed { due, .. } if due < target => Some(due),
                    _ => None,
                })
                .min();
            let t = next_due.unwrap_or(target).max(self.time());
            self.step(t);
            if t >= target {
                break;
            }
        }
    }

    fn step(&self, t: u64) {
        self.state.borrow_mut().time = t;
        fire_matching(&self.state, |w| matches!(w, When::NextTime { after } if *after < t));
        fire_matching(&self.state, |w| matches!(w, When::Timed { due, .. } if *due <= t));
        fire_matching(&self.state, |w| matches!(w, When::ReadWrite));
        fire_matching(&self.state, |w| matches!(w, When::ReadOnly));
    }

    /// The design drives `path` to the bit string `bits`.
    pub fn drive(&self, path: &str, bits: &str) -> GpiResult<()> {
        write_value(&self.state, path, SimValue::Bits(bits.to_string()), GpiSetAction::Force)?;
        if let Some(node) = self.state.borrow_mut().nodes.get_mut(path) {
            node.forced = false;
        }
        Ok(())
    }

    // ── observation ─────────────────────────────────────────────────────

    pub fn time(&self) -> u64 {
        self.state.borrow().time
    }

    pub fn bits_of(&self, path: &str) -> Option<String> {
        match &self.state.borrow().nodes.get(path)?.value {
            SimValue::Bits(b) => Some(b.clone()),
            _ => None,
        }
    }

    pub fn end_sim_calls(&self) -> u32 {
        self.state.borrow().end_sim_calls
    }

    pub fn pending_registrations(&self) -> usize {
        self.state.borrow().regs.len()
    }

    /// Trigger of the most recent registration, kept even after it retired.
    pub fn last_trigger(&self) -> Option<CallbackTrigger> {
        self.state.borrow().last_trigger.clone()
    }
}

impl GpiImpl for SimImpl {
    fn name(&self) -> &str {
        &self.name
    }

    fn end_sim(&self) {
        self.state.borrow_mut().end_sim_calls += 1;
    }

    fn sim_time(&self) -> u64 {
        self.time()
    }

    fn sim_precision(&self) -> i32 {
        self.state.borrow().precision
    }

    fn simulator_product(&self) -> &str {
        SIM_PRODUCT
    }

    fn simulator_version(&self) -> &str {
        &self.version
    }

    fn native_check_create_by_name(&self, name: &str, parent: &dyn GpiObjHdl) -> Option<Box<dyn GpiObjHdl>> {
        let path = format!("{}.{}", parent.full_name(), name);
        make_object(&self.state, &path).map(|o| Box::new(o) as Box<dyn GpiObjHdl>)
    }

    fn native_check_create_by_index(&self, index: i32, parent: &dyn GpiObjHdl) -> Option<Box<dyn GpiObjHdl>> {
        let path = format!("{}[{}]", parent.full_name(), index);
        make_object(&self.state, &path).map(|o| Box::new(o) as Box<dyn GpiObjHdl>)
    }

    fn native_check_create_by_raw(&self, raw: RawHandle, _parent: &dyn GpiObjHdl) -> Option<Box<dyn GpiObjHdl>> {
        let path = self.state.borrow().raw.get(&raw).cloned()?;
        make_object(&self.state, &path).map(|o| Box::new(o) as Box<dyn GpiObjHdl>)
    }

    fn get_root_handle(&self, name: Option<&str>) -> Option<Box<dyn GpiObjHdl>> {
        let root = {
            let st = self.state.borrow();
            match name {
                None => st.roots.first().cloned(),
                Some(n) => st.roots.iter().find(|r| *r == n).cloned(),
            }
        }?;
        make_object(&self.state, &root).map(|o| Box::new(o) as Box<dyn GpiObjHdl>)
    }

    fn iterate_handle(&self, parent: Option<&dyn GpiObjHdl>, sel: GpiIteratorSel) -> Option<Box<dyn GpiIterator>> {
        let st = self.state.borrow();
        let items: VecDeque<SimChild> = match (sel, parent) {
            (GpiIteratorSel::Objects, Some(p)) => st.nodes.get(p.full_name())?.children.iter().cloned().collect(),
            (GpiIteratorSel::PackageScopes, None) if !st.packages.is_empty() => {
                st.packages.iter().cloned().map(SimChild::Native).collect()
            }
            _ => return None,
        };
        Some(Box::new(SimIterator {
            adapter: self.name.clone(),
            state: Rc::downgrade(&self.state),
            items,
        }))
    }

    fn register_timed_callback(&self, time: u64, trigger: CallbackTrigger) -> GpiResult<Box<dyn GpiCbHdl>> {
        let due = self.time() + time;
        register(&self.state, &self.name, CallbackKind::Timed, When::Timed { due, delay: time }, trigger)
    }

    fn register_readonly_callback(&self, trigger: CallbackTrigger) -> GpiResult<Box<dyn GpiCbHdl>> {
        register(&self.state, &self.name, CallbackKind::ReadOnly, When::ReadOnly, trigger)
    }

    fn register_nexttime_callback(&self, trigger: CallbackTrigger) -> GpiResult<Box<dyn GpiCbHdl>> {
        let after = self.time();
        register(&self.state, &self.name, CallbackKind::NextTime, When::NextTime { after }, trigger)
    }

    fn register_readwrite_callback(&self, trigger: CallbackTrigger) -> GpiResult<Box<dyn GpiCbHdl>> {
        register(&self.state, &self.name, CallbackKind::ReadWrite, When::ReadWrite, trigger)
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Objects
// ────────────────────────────────────────────────────────────────────────────────

pub struct SimObject {
    adapter: String,
    path: String,
    kind: GpiObjType,
    num_elems: i32,
    range: (i32, i32, GpiRangeDir),
    is_const: bool,
    indexable: bool,
    definition: Option<(String, String)>,
    state: Weak<RefCell<SimState>>,
}

impl SimObject {
    /// An object detached from any simulator; its values cannot be accessed.
    pub fn new(path: &str, kind: GpiObjType) -> Self {
        Self {
            adapter: SIM_PRODUCT.to_string(),
            path: path.to_string(),
            kind,
            num_elems: 1,
            range: (0, 0, GpiRangeDir::NoDir),
            is_const: false,
            indexable: false,
            definition: None,
            state: Weak::new(),
        }
    }

    fn state(&self) -> GpiResult<SharedState> {
        self.state
            .upgrade()
            .ok_or_else(|| GpiError::Simulator(format!("{} is detached", self.path)))
    }

    fn value(&self) -> GpiResult<SimValue> {
        let state = self.state()?;
        let st = state.borrow();
        st.nodes
            .get(&self.path)
            .map(|n| n.value.clone())
            .ok_or_else(|| GpiError::Simulator(format!("{} does not exist", self.path)))
    }

    fn width(&self) -> usize {
        self.num_elems.max(1) as usize
    }

    fn type_error(&self, what: &'static str) -> GpiError {
        GpiError::Simulator(format!("{what} is not supported by {} ({})", self.path, self.kind))
    }
}

impl GpiObjHdl for SimObject {
    fn kind(&self) -> GpiObjType {
        self.kind
    }

    fn num_elems(&self) -> i32 {
        self.num_elems
    }

    fn range_left(&self) -> i32 {
        self.range.0
    }

    fn range_right(&self) -> i32 {
        self.range.1
    }

    fn range_dir(&self) -> GpiRangeDir {
        self.range.2
    }

    fn is_const(&self) -> bool {
        self.is_const
    }

    fn is_indexable(&self) -> bool {
        self.indexable
    }

    fn definition_name(&self) -> Option<&str> {
        self.definition.as_ref().map(|(n, _)| n.as_str())
    }

    fn definition_file(&self) -> Option<&str> {
        self.definition.as_ref().map(|(_, f)| f.as_str())
    }

    fn full_name(&self) -> &str {
        &self.path
    }

    fn name(&self) -> &str {
        leaf_name(&self.path)
    }

    fn as_signal(&self) -> Option<&dyn GpiSignalObjHdl> {
        match self.kind {
            GpiObjType::Logic
            | GpiObjType::LogicArray
            | GpiObjType::Integer
            | GpiObjType::Real
            | GpiObjType::String
            | GpiObjType::Enum => Some(self),
            _ => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl GpiSignalObjHdl for SimObject {
    fn value_binstr(&self) -> GpiResult<String> {
        match self.value()? {
            SimValue::Bits(b) => Ok(b),
            _ => Err(self.type_error("binary string access")),
        }
    }

    fn value_str(&self) -> GpiResult<Vec<u8>> {
        match self.value()? {
            SimValue::Str(s) => Ok(s),
            SimValue::Bits(b) => Ok(b.into_bytes()),
            _ => Err(self.type_error("string access")),
        }
    }

    fn value_real(&self) -> GpiResult<f64> {
        match self.value()? {
            SimValue::Real(r) => Ok(r),
            SimValue::Bits(_) => Ok(self.value_long()? as f64),
            _ => Err(self.type_error("real access")),
        }
    }

    fn value_long(&self) -> GpiResult<i64> {
        let bits = match self.value()? {
            SimValue::Bits(b) => b,
            SimValue::Real(r) => return Ok(r as i64),
            _ => return Err(self.type_error("integer access")),
        };
        let tail = &bits[bits.len().saturating_sub(64)..];
        u64::from_str_radix(tail, 2)
            .map(|v| v as i64)
            .map_err(|_| GpiError::InvalidValue {
                what: "integer conversion",
                value: bits.clone(),
            })
    }

    fn set_value_int(&self, value: i32, action: GpiSetAction) -> GpiResult<()> {
        let new = match self.value()? {
            SimValue::Bits(_) => SimValue::Bits(int_to_bits(value, self.width())),
            SimValue::Real(_) => SimValue::Real(value as f64),
            _ => return Err(self.type_error("integer write")),
        };
        write_value(&self.state()?, &self.path, new, action)
    }

    fn set_value_real(&self, value: f64, action: GpiSetAction) -> GpiResult<()> {
        match self.value()? {
            SimValue::Real(_) => write_value(&self.state()?, &self.path, SimValue::Real(value), action),
            _ => Err(self.type_error("real write")),
        }
    }

    fn set_value_str(&self, value: &[u8], action: GpiSetAction) -> GpiResult<()> {
        match self.value()? {
            SimValue::Str(_) => write_value(&self.state()?, &self.path, SimValue::Str(value.to_vec()), action),
            _ => Err(self.type_error("string write")),
        }
    }

    fn set_value_binstr(&self, value: &str, action: GpiSetAction) -> GpiResult<()> {
        if !matches!(self.value()?, SimValue::Bits(_)) {
            return Err(self.type_error("binary string write"));
        }
        let valid = value.len() == self.width()
            && value.chars().all(|c| matches!(c, '0' | '1' | 'x' | 'X' | 'z' | 'Z'));
        if !valid {
            return Err(GpiError::InvalidValue {
                what: "binary string",
                value: value.to_string(),
            });
        }
        write_value(&self.state()?, &self.path, SimValue::Bits(value.to_string()), action)
    }

    fn register_value_change_callback(&self, edge: GpiEdge, trigger: CallbackTrigger) -> GpiResult<Box<dyn GpiCbHdl>> {
        let state = self.state()?;
        let when = When::ValueChange {
            path: self.path.clone(),
            edge,
        };
        register(&state, &self.adapter, CallbackKind::ValueChange, when, trigger)
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Iterators and callback handles
// ────────────────────────────────────────────────────────────────────────────────

struct SimIterator {
    adapter: String,
    state: Weak<RefCell<SimState>>,
    items: VecDeque<SimChild>,
}

impl GpiIterator for SimIterator {
    fn repr(&self) -> String {
        format!("SimIterator({}, {} left)", self.adapter, self.items.len())
    }

    fn next_handle(&mut self) -> IterStep {
        let Some(state) = self.state.upgrade() else {
            return IterStep::End;
        };
        match self.items.pop_front() {
            None => IterStep::End,
            Some(SimChild::Native(path)) => match make_object(&state, &path) {
                Some(obj) => IterStep::Native(Box::new(obj)),
                None => IterStep::NativeNoName,
            },
            Some(SimChild::Broken) => IterStep::NativeNoName,
            Some(SimChild::Foreign(name)) => IterStep::NotNative(name),
            Some(SimChild::ForeignRaw(raw)) => IterStep::NotNativeNoName(raw),
        }
    }
}

struct SimCbHdl {
    state: Weak<RefCell<SimState>>,
    id: u64,
    desc: String,
}

impl GpiCbHdl for SimCbHdl {
    fn repr(&self) -> String {
        self.desc.clone()
    }

    fn remove(self: Box<Self>) -> GpiResult<()> {
        let removed = self
            .state
            .upgrade()
            .is_some_and(|state| remove_registration(&state, self.id));
        if removed {
            Ok(())
        } else {
            Err(GpiError::Simulator(format!("{} is not registered", self.desc)))
        }
    }

    fn cleanup(self: Box<Self>) {
        if let Some(state) = self.state.upgrade() {
            remove_registration(&state, self.id);
        }
    }
}
