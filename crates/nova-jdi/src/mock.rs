//! Deterministic in-process [`VirtualMachine`] for tests.
//!
//! `MockVm` keeps a scripted model of threads, stacks, loaded classes and the
//! event request table, and enforces the JDI rules the stepping engine relies
//! on: one step request per thread, class filters only on disabled requests,
//! enabling a request for a dead thread fails, and every call after
//! [`MockVm::disconnect`] fails with [`JdiError::VmDisconnected`].

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::poison::{lock, wait_timeout};
use crate::{
    ClassInfo, Event, EventKind, EventSet, JdiError, Location, MethodInfo, RequestId,
    RequestKind, RequestSpec, Result, SuspendPolicy, ThreadId, ThreadStatus, Value,
    VirtualMachine,
};

/// Operations that accept injected failures via [`MockVm::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    ThreadStatus,
    IsSuspended,
    Frames,
    SuspendThread,
    ResumeThread,
    SuspendAll,
    ResumeAll,
    PopFrames,
    ClassesByName,
    LocationsOfLine,
    CreateRequest,
    AddClassExclusion,
    EnableRequest,
    DisableRequest,
    DeleteRequest,
}

/// Snapshot of one entry in the mock request table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRequest {
    pub id: RequestId,
    pub spec: RequestSpec,
    pub enabled: bool,
    pub class_exclusions: Vec<String>,
}

#[derive(Debug, Clone)]
struct MockThread {
    name: String,
    status: ThreadStatus,
    suspended: bool,
    frames: Vec<Location>,
}

#[derive(Default)]
struct State {
    threads: BTreeMap<ThreadId, MockThread>,
    classes: BTreeMap<String, ClassInfo>,
    line_locations: HashMap<(String, i32), Vec<Location>>,
    absent_information: HashSet<String>,
    requests: BTreeMap<RequestId, MockRequest>,
    next_request: RequestId,
    events: VecDeque<EventSet>,
    failures: HashMap<MockOp, VecDeque<JdiError>>,
    disconnected: bool,
    disposed: bool,
    return_values: bool,
    thread_resumes: HashMap<ThreadId, usize>,
    vm_resumes: usize,
    vm_suspends: usize,
    popped: Vec<(ThreadId, usize)>,
}

impl State {
    fn check(&mut self, op: MockOp) -> Result<()> {
        if self.disconnected {
            return Err(JdiError::VmDisconnected);
        }
        if let Some(err) = self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(())
    }

    fn thread(&self, thread: ThreadId) -> Result<&MockThread> {
        self.threads
            .get(&thread)
            .ok_or(JdiError::ObjectCollected(thread))
    }

    fn thread_mut(&mut self, thread: ThreadId) -> Result<&mut MockThread> {
        self.threads
            .get_mut(&thread)
            .ok_or(JdiError::ObjectCollected(thread))
    }

    fn suspend_for(&mut self, policy: SuspendPolicy, thread: ThreadId) {
        match policy {
            SuspendPolicy::All => {
                self.vm_suspends += 1;
                for t in self.threads.values_mut() {
                    if t.status != ThreadStatus::Zombie {
                        t.suspended = true;
                    }
                }
            }
            SuspendPolicy::EventThread => {
                if let Some(t) = self.threads.get_mut(&thread) {
                    t.suspended = true;
                }
            }
            SuspendPolicy::None => {}
        }
    }

    fn enabled_request(&self, pred: impl Fn(&MockRequest) -> bool) -> Option<&MockRequest> {
        self.requests.values().find(|r| r.enabled && pred(r))
    }
}

/// Stable method id derived from the declaring type and method name.
pub fn method_id(declaring_type: &str, name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    declaring_type.hash(&mut hasher);
    name.hash(&mut hasher);
    hasher.finish()
}

/// Builds a location in `declaring_type.method` with a stable method id.
pub fn location(declaring_type: &str, method: &str, line: i32, code_index: u64) -> Location {
    let info = MethodInfo::new(method_id(declaring_type, method), declaring_type, method, "()V");
    Location::new(info, line, code_index)
}

#[derive(Default)]
pub struct MockVm {
    state: Mutex<State>,
    events_ready: Condvar,
}

impl MockVm {
    pub fn new() -> Self {
        let vm = Self::default();
        lock(&vm.state, "MockVm::new").next_request = 1;
        vm
    }

    pub fn set_can_get_method_return_values(&self, value: bool) {
        lock(&self.state, "MockVm::set_can_get_method_return_values").return_values = value;
    }

    pub fn add_thread(&self, thread: ThreadId, name: impl Into<String>) {
        lock(&self.state, "MockVm::add_thread").threads.insert(
            thread,
            MockThread {
                name: name.into(),
                status: ThreadStatus::Running,
                suspended: false,
                frames: Vec::new(),
            },
        );
    }

    /// Replaces the stack of `thread` (innermost frame first).
    pub fn set_frames(&self, thread: ThreadId, frames: Vec<Location>) {
        if let Some(t) = lock(&self.state, "MockVm::set_frames").threads.get_mut(&thread) {
            t.frames = frames;
        }
    }

    pub fn set_suspended(&self, thread: ThreadId, suspended: bool) {
        if let Some(t) = lock(&self.state, "MockVm::set_suspended").threads.get_mut(&thread) {
            t.suspended = suspended;
        }
    }

    pub fn kill_thread(&self, thread: ThreadId) {
        if let Some(t) = lock(&self.state, "MockVm::kill_thread").threads.get_mut(&thread) {
            t.status = ThreadStatus::Zombie;
            t.suspended = false;
            t.frames.clear();
        }
    }

    pub fn load_class(&self, class: ClassInfo) {
        lock(&self.state, "MockVm::load_class")
            .classes
            .insert(class.name.clone(), class);
    }

    pub fn set_line_locations(&self, class_name: &str, line: i32, locations: Vec<Location>) {
        lock(&self.state, "MockVm::set_line_locations")
            .line_locations
            .insert((class_name.to_string(), line), locations);
    }

    /// Marks `class_name` as compiled without a line number table.
    pub fn set_absent_information(&self, class_name: &str) {
        lock(&self.state, "MockVm::set_absent_information")
            .absent_information
            .insert(class_name.to_string());
    }

    /// Makes the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: MockOp, err: JdiError) {
        lock(&self.state, "MockVm::fail_next")
            .failures
            .entry(op)
            .or_default()
            .push_back(err);
    }

    /// Simulates the debuggee going away: a `VmDisconnect` event is queued and
    /// every later call fails.
    pub fn disconnect(&self) {
        let mut state = lock(&self.state, "MockVm::disconnect");
        if state.disconnected {
            return;
        }
        state.disconnected = true;
        state.events.push_back(EventSet::single(
            SuspendPolicy::None,
            Event {
                request: None,
                thread: None,
                kind: EventKind::VmDisconnect,
            },
        ));
        self.events_ready.notify_all();
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.state, "MockVm::is_disposed").disposed
    }

    pub fn requests(&self) -> Vec<MockRequest> {
        lock(&self.state, "MockVm::requests")
            .requests
            .values()
            .cloned()
            .collect()
    }

    pub fn request(&self, id: RequestId) -> Option<MockRequest> {
        lock(&self.state, "MockVm::request").requests.get(&id).cloned()
    }

    pub fn step_requests_for(&self, thread: ThreadId) -> Vec<MockRequest> {
        lock(&self.state, "MockVm::step_requests_for")
            .requests
            .values()
            .filter(|r| matches!(r.spec.kind, RequestKind::Step { thread: t, .. } if t == thread))
            .cloned()
            .collect()
    }

    pub fn thread_resumes(&self, thread: ThreadId) -> usize {
        lock(&self.state, "MockVm::thread_resumes")
            .thread_resumes
            .get(&thread)
            .copied()
            .unwrap_or(0)
    }

    pub fn vm_resumes(&self) -> usize {
        lock(&self.state, "MockVm::vm_resumes").vm_resumes
    }

    pub fn vm_suspends(&self) -> usize {
        lock(&self.state, "MockVm::vm_suspends").vm_suspends
    }

    pub fn popped_frames(&self) -> Vec<(ThreadId, usize)> {
        lock(&self.state, "MockVm::popped_frames").popped.clone()
    }

    pub fn thread_is_suspended(&self, thread: ThreadId) -> bool {
        lock(&self.state, "MockVm::thread_is_suspended")
            .threads
            .get(&thread)
            .map(|t| t.suspended)
            .unwrap_or(false)
    }

    /// Fires the enabled step request of `thread` at its current top frame.
    pub fn step_event(&self, thread: ThreadId) -> Option<EventSet> {
        let mut state = lock(&self.state, "MockVm::step_event");
        let request = state
            .enabled_request(|r| matches!(r.spec.kind, RequestKind::Step { thread: t, .. } if t == thread))?
            .clone();
        let location = state.threads.get(&thread)?.frames.first()?.clone();
        state.suspend_for(request.spec.suspend_policy, thread);
        Some(EventSet::single(
            request.spec.suspend_policy,
            Event {
                request: Some(request.id),
                thread: Some(thread),
                kind: EventKind::Step { location },
            },
        ))
    }

    /// Fires breakpoint `request` on `thread`, making the breakpoint location
    /// the thread's top frame.
    pub fn breakpoint_event(&self, request: RequestId, thread: ThreadId) -> Option<EventSet> {
        let mut state = lock(&self.state, "MockVm::breakpoint_event");
        let record = state.enabled_request(|r| r.id == request)?.clone();
        let RequestKind::Breakpoint { location } = record.spec.kind.clone() else {
            return None;
        };
        let t = state.threads.get_mut(&thread)?;
        match t.frames.first_mut() {
            Some(top) => *top = location.clone(),
            None => t.frames.push(location.clone()),
        }
        state.suspend_for(record.spec.suspend_policy, thread);
        Some(EventSet::single(
            record.spec.suspend_policy,
            Event {
                request: Some(request),
                thread: Some(thread),
                kind: EventKind::Breakpoint { location },
            },
        ))
    }

    /// Loads `class` and fires the first enabled class-prepare request whose
    /// filter matches it.
    pub fn class_prepare_event(&self, thread: ThreadId, class: ClassInfo) -> Option<EventSet> {
        let mut state = lock(&self.state, "MockVm::class_prepare_event");
        let class_name = class.name.clone();
        state.classes.insert(class_name.clone(), class);
        let record = state
            .enabled_request(|r| {
                matches!(&r.spec.kind, RequestKind::ClassPrepare { class_filter } if class_filter == &class_name)
            })?
            .clone();
        state.suspend_for(record.spec.suspend_policy, thread);
        Some(EventSet::single(
            record.spec.suspend_policy,
            Event {
                request: Some(record.id),
                thread: Some(thread),
                kind: EventKind::ClassPrepare { class_name },
            },
        ))
    }

    /// Fires the enabled method-exit request bound to `thread` at its top
    /// frame.
    pub fn method_exit_event(&self, thread: ThreadId, value: Value) -> Option<EventSet> {
        let mut state = lock(&self.state, "MockVm::method_exit_event");
        let record = state
            .enabled_request(|r| {
                matches!(r.spec.kind, RequestKind::MethodExit { thread: Some(t), .. } if t == thread)
            })?
            .clone();
        let location = state.threads.get(&thread)?.frames.first()?.clone();
        state.suspend_for(record.spec.suspend_policy, thread);
        Some(EventSet::single(
            record.spec.suspend_policy,
            Event {
                request: Some(record.id),
                thread: Some(thread),
                kind: EventKind::MethodExit {
                    location,
                    return_value: Some(value),
                },
            },
        ))
    }

    pub fn push_event_set(&self, set: EventSet) {
        lock(&self.state, "MockVm::push_event_set").events.push_back(set);
        self.events_ready.notify_all();
    }
}

impl VirtualMachine for MockVm {
    fn can_get_method_return_values(&self) -> bool {
        lock(&self.state, "MockVm::can_get_method_return_values").return_values
    }

    fn thread_name(&self, thread: ThreadId) -> Result<String> {
        let state = lock(&self.state, "MockVm::thread_name");
        if state.disconnected {
            return Err(JdiError::VmDisconnected);
        }
        Ok(state.thread(thread)?.name.clone())
    }

    fn thread_status(&self, thread: ThreadId) -> Result<ThreadStatus> {
        let mut state = lock(&self.state, "MockVm::thread_status");
        state.check(MockOp::ThreadStatus)?;
        Ok(state.thread(thread)?.status)
    }

    fn is_suspended(&self, thread: ThreadId) -> Result<bool> {
        let mut state = lock(&self.state, "MockVm::is_suspended");
        state.check(MockOp::IsSuspended)?;
        Ok(state.thread(thread)?.suspended)
    }

    fn frames(&self, thread: ThreadId) -> Result<Vec<Location>> {
        let mut state = lock(&self.state, "MockVm::frames");
        state.check(MockOp::Frames)?;
        let t = state.thread(thread)?;
        if t.status == ThreadStatus::Zombie {
            return Err(JdiError::IllegalThreadState(thread));
        }
        if !t.suspended {
            return Err(JdiError::IncompatibleThreadState(thread));
        }
        Ok(t.frames.clone())
    }

    fn suspend_thread(&self, thread: ThreadId) -> Result<()> {
        let mut state = lock(&self.state, "MockVm::suspend_thread");
        state.check(MockOp::SuspendThread)?;
        state.thread_mut(thread)?.suspended = true;
        Ok(())
    }

    fn resume_thread(&self, thread: ThreadId) -> Result<()> {
        let mut state = lock(&self.state, "MockVm::resume_thread");
        state.check(MockOp::ResumeThread)?;
        state.thread_mut(thread)?.suspended = false;
        *state.thread_resumes.entry(thread).or_default() += 1;
        Ok(())
    }

    fn suspend_all(&self) -> Result<()> {
        let mut state = lock(&self.state, "MockVm::suspend_all");
        state.check(MockOp::SuspendAll)?;
        state.vm_suspends += 1;
        for t in state.threads.values_mut() {
            if t.status != ThreadStatus::Zombie {
                t.suspended = true;
            }
        }
        Ok(())
    }

    fn resume_all(&self) -> Result<()> {
        let mut state = lock(&self.state, "MockVm::resume_all");
        state.check(MockOp::ResumeAll)?;
        state.vm_resumes += 1;
        for t in state.threads.values_mut() {
            t.suspended = false;
        }
        Ok(())
    }

    fn pop_frames(&self, thread: ThreadId, count: usize) -> Result<()> {
        let mut state = lock(&self.state, "MockVm::pop_frames");
        state.check(MockOp::PopFrames)?;
        let t = state.thread_mut(thread)?;
        if !t.suspended {
            return Err(JdiError::IncompatibleThreadState(thread));
        }
        if count >= t.frames.len() {
            return Err(JdiError::InvalidStackFrame);
        }
        t.frames.drain(..count);
        state.popped.push((thread, count));
        Ok(())
    }

    fn classes_by_name(&self, name: &str) -> Result<Vec<ClassInfo>> {
        let mut state = lock(&self.state, "MockVm::classes_by_name");
        state.check(MockOp::ClassesByName)?;
        Ok(state.classes.get(name).cloned().into_iter().collect())
    }

    fn locations_of_line(&self, class_name: &str, line: i32) -> Result<Vec<Location>> {
        let mut state = lock(&self.state, "MockVm::locations_of_line");
        state.check(MockOp::LocationsOfLine)?;
        if !state.classes.contains_key(class_name) {
            return Err(JdiError::ClassNotPrepared(class_name.to_string()));
        }
        if state.absent_information.contains(class_name) {
            return Err(JdiError::AbsentInformation(class_name.to_string()));
        }
        Ok(state
            .line_locations
            .get(&(class_name.to_string(), line))
            .cloned()
            .unwrap_or_default())
    }

    fn create_request(&self, spec: RequestSpec) -> Result<RequestId> {
        let mut state = lock(&self.state, "MockVm::create_request");
        state.check(MockOp::CreateRequest)?;
        if let RequestKind::Step { thread, .. } = spec.kind {
            state.thread(thread)?;
            let duplicate = state
                .requests
                .values()
                .any(|r| matches!(r.spec.kind, RequestKind::Step { thread: t, .. } if t == thread));
            if duplicate {
                return Err(JdiError::DuplicateStepRequest(thread));
            }
        }
        let id = state.next_request.max(1);
        state.next_request = id + 1;
        state.requests.insert(
            id,
            MockRequest {
                id,
                spec,
                enabled: false,
                class_exclusions: Vec::new(),
            },
        );
        Ok(id)
    }

    fn add_class_exclusion(&self, request: RequestId, pattern: &str) -> Result<()> {
        let mut state = lock(&self.state, "MockVm::add_class_exclusion");
        state.check(MockOp::AddClassExclusion)?;
        let record = state
            .requests
            .get_mut(&request)
            .ok_or(JdiError::InvalidRequestState(request))?;
        if record.enabled {
            return Err(JdiError::InvalidRequestState(request));
        }
        record.class_exclusions.push(pattern.to_string());
        Ok(())
    }

    fn enable_request(&self, request: RequestId) -> Result<()> {
        let mut state = lock(&self.state, "MockVm::enable_request");
        state.check(MockOp::EnableRequest)?;
        let thread = state
            .requests
            .get(&request)
            .ok_or(JdiError::InvalidRequestState(request))?
            .spec
            .thread();
        if let Some(thread) = thread {
            if state.thread(thread)?.status == ThreadStatus::Zombie {
                return Err(JdiError::IllegalThreadState(thread));
            }
        }
        if let Some(record) = state.requests.get_mut(&request) {
            record.enabled = true;
        }
        Ok(())
    }

    fn disable_request(&self, request: RequestId) -> Result<()> {
        let mut state = lock(&self.state, "MockVm::disable_request");
        state.check(MockOp::DisableRequest)?;
        let record = state
            .requests
            .get_mut(&request)
            .ok_or(JdiError::InvalidRequestState(request))?;
        record.enabled = false;
        Ok(())
    }

    fn delete_request(&self, request: RequestId) -> Result<()> {
        let mut state = lock(&self.state, "MockVm::delete_request");
        state.check(MockOp::DeleteRequest)?;
        state.requests.remove(&request);
        Ok(())
    }

    fn step_requests(&self) -> Result<Vec<(RequestId, ThreadId)>> {
        let state = lock(&self.state, "MockVm::step_requests");
        if state.disconnected {
            return Err(JdiError::VmDisconnected);
        }
        Ok(state
            .requests
            .values()
            .filter_map(|r| match r.spec.kind {
                RequestKind::Step { thread, .. } => Some((r.id, thread)),
                _ => None,
            })
            .collect())
    }

    fn remove_event_set(&self, timeout: Duration) -> Result<Option<EventSet>> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state, "MockVm::remove_event_set");
        loop {
            if let Some(set) = state.events.pop_front() {
                return Ok(Some(set));
            }
            if state.disconnected {
                return Err(JdiError::VmDisconnected);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            state = wait_timeout(
                &self.events_ready,
                state,
                remaining,
                "MockVm::remove_event_set",
            );
        }
    }

    fn dispose(&self) -> Result<()> {
        {
            let mut state = lock(&self.state, "MockVm::dispose");
            if state.disposed {
                return Ok(());
            }
            state.disposed = true;
        }
        self.disconnect();
        Ok(())
    }
}
