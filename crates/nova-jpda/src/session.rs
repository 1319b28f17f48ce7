use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nova_config::{DebuggerConfig, SteppingConfig, SuspendMode};
use nova_jdi::{
    EventKind, EventSet, JdiError, RequestId, SuspendPolicy, ThreadId, VirtualMachine,
};
use nova_scheduler::{Scheduler, SchedulerConfig};
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use tokio::sync::watch;

use crate::editor::{EditorContext, MethodChooser, TechnologyBridge};
use crate::error::{DebugResult, DebuggerError};
use crate::filter::SmartSteppingFilter;
use crate::operator::{EventOutcome, Operator};
use crate::policy::CompoundSmartSteppingListener;
use crate::step::abandon_or_fail;
use crate::step_into_next::StepIntoNextMethod;
use crate::synchronizer::ActionsSynchronizer;
use crate::thread::JpdaThread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggerState {
    Starting,
    Running,
    Stopped,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HiddenBreakpointKind {
    ClassLoad { class_name: String },
    Line { class_name: String, line: i32 },
}

/// Breakpoint the debugger submits for its own purposes; never shown to the
/// user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiddenBreakpoint {
    pub request: RequestId,
    pub kind: HiddenBreakpointKind,
}

pub type MessageSink = Arc<dyn Fn(&str) + Send + Sync>;

const SUSPEND_POLLS: u32 = 10;
const SUSPEND_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One attached debuggee and everything the stepping engine keeps for it.
pub struct DebugSession {
    vm: Arc<dyn VirtualMachine>,
    operator: Operator,
    synchronizer: Arc<ActionsSynchronizer>,
    filter: Arc<SmartSteppingFilter>,
    policies: CompoundSmartSteppingListener,
    options: RwLock<SteppingConfig>,
    access: RwLock<()>,
    threads: Mutex<HashMap<ThreadId, Arc<JpdaThread>>>,
    current_thread: Mutex<Option<ThreadId>>,
    state: watch::Sender<DebuggerState>,
    hidden_breakpoints: Mutex<Vec<HiddenBreakpoint>>,
    messages: Option<MessageSink>,
    editor: Option<Arc<dyn EditorContext>>,
    technology_bridge: Option<Arc<dyn TechnologyBridge>>,
    chooser: Option<Arc<dyn MethodChooser>>,
    scheduler: Scheduler,
    step_into: Arc<StepIntoNextMethod>,
    finished: AtomicBool,
}

pub struct DebugSessionBuilder {
    vm: Arc<dyn VirtualMachine>,
    config: DebuggerConfig,
    policies: Option<CompoundSmartSteppingListener>,
    messages: Option<MessageSink>,
    editor: Option<Arc<dyn EditorContext>>,
    technology_bridge: Option<Arc<dyn TechnologyBridge>>,
    chooser: Option<Arc<dyn MethodChooser>>,
    scheduler: Option<Scheduler>,
}

impl DebugSessionBuilder {
    pub fn config(mut self, config: DebuggerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn policies(mut self, policies: CompoundSmartSteppingListener) -> Self {
        self.policies = Some(policies);
        self
    }

    pub fn message_sink(mut self, sink: MessageSink) -> Self {
        self.messages = Some(sink);
        self
    }

    pub fn editor(mut self, editor: Arc<dyn EditorContext>) -> Self {
        self.editor = Some(editor);
        self
    }

    pub fn technology_bridge(mut self, bridge: Arc<dyn TechnologyBridge>) -> Self {
        self.technology_bridge = Some(bridge);
        self
    }

    pub fn method_chooser(mut self, chooser: Arc<dyn MethodChooser>) -> Self {
        self.chooser = Some(chooser);
        self
    }

    pub fn scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> Arc<DebugSession> {
        let scheduler = self.scheduler.unwrap_or_else(|| {
            Scheduler::new(SchedulerConfig {
                worker_threads: self.config.actions.worker_threads,
                ..SchedulerConfig::default()
            })
        });
        let (state, _) = watch::channel(DebuggerState::Starting);
        Arc::new(DebugSession {
            vm: self.vm,
            operator: Operator::new(),
            synchronizer: Arc::new(ActionsSynchronizer::new()),
            filter: Arc::new(SmartSteppingFilter::with_patterns(
                &self.config.stepping.exclusion_patterns,
            )),
            policies: self.policies.unwrap_or_default(),
            options: RwLock::new(self.config.stepping),
            access: RwLock::new(()),
            threads: Mutex::new(HashMap::new()),
            current_thread: Mutex::new(None),
            state,
            hidden_breakpoints: Mutex::new(Vec::new()),
            messages: self.messages,
            editor: self.editor,
            technology_bridge: self.technology_bridge,
            chooser: self.chooser,
            scheduler,
            step_into: StepIntoNextMethod::new(),
            finished: AtomicBool::new(false),
        })
    }
}

impl DebugSession {
    pub fn builder(vm: Arc<dyn VirtualMachine>) -> DebugSessionBuilder {
        DebugSessionBuilder {
            vm,
            config: DebuggerConfig::default(),
            policies: None,
            messages: None,
            editor: None,
            technology_bridge: None,
            chooser: None,
            scheduler: None,
        }
    }

    pub fn vm(&self) -> &Arc<dyn VirtualMachine> {
        &self.vm
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    pub fn synchronizer(&self) -> &Arc<ActionsSynchronizer> {
        &self.synchronizer
    }

    /// Session-wide smart-stepping exclusions.
    pub fn filter(&self) -> &Arc<SmartSteppingFilter> {
        &self.filter
    }

    pub fn policies(&self) -> &CompoundSmartSteppingListener {
        &self.policies
    }

    pub fn options(&self) -> SteppingConfig {
        self.options.read().clone()
    }

    pub fn set_options(&self, options: SteppingConfig) {
        *self.options.write() = options;
    }

    pub fn suspend_policy(&self) -> SuspendPolicy {
        match self.options.read().suspend {
            SuspendMode::All => SuspendPolicy::All,
            SuspendMode::EventThread => SuspendPolicy::EventThread,
        }
    }

    pub fn editor(&self) -> Option<&Arc<dyn EditorContext>> {
        self.editor.as_ref()
    }

    pub fn technology_bridge(&self) -> Option<&Arc<dyn TechnologyBridge>> {
        self.technology_bridge.as_ref()
    }

    pub fn method_chooser(&self) -> Option<&Arc<dyn MethodChooser>> {
        self.chooser.as_ref()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn step_into_next(&self) -> &Arc<StepIntoNextMethod> {
        &self.step_into
    }

    /// Debugger state of `thread`, created on first use.
    pub fn thread(&self, thread: ThreadId) -> Arc<JpdaThread> {
        self.threads
            .lock()
            .entry(thread)
            .or_insert_with(|| Arc::new(JpdaThread::new(thread)))
            .clone()
    }

    fn forget_thread(&self, thread: ThreadId) {
        self.threads.lock().remove(&thread);
        let mut current = self.current_thread.lock();
        if *current == Some(thread) {
            *current = None;
        }
    }

    pub fn current_thread(&self) -> Option<ThreadId> {
        *self.current_thread.lock()
    }

    pub fn set_current_thread(&self, thread: Option<ThreadId>) {
        *self.current_thread.lock() = thread;
    }

    pub fn state(&self) -> DebuggerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<DebuggerState> {
        self.state.subscribe()
    }

    pub fn set_state(&self, state: DebuggerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(target: "nova.jpda.operator", ?previous, ?state, "debugger state");
        }
    }

    /// The lock guarding step transitions of `thread`: the thread's own lock
    /// when only event threads suspend, the session lock otherwise.
    pub fn step_lock<'a>(&'a self, thread: &'a JpdaThread) -> &'a RwLock<()> {
        match self.suspend_policy() {
            SuspendPolicy::EventThread => thread.access_lock(),
            SuspendPolicy::All | SuspendPolicy::None => &self.access,
        }
    }

    /// Takes the step lock once `thread` is actually suspended, polling a
    /// bounded number of times and re-checking under the lock.
    ///
    /// `Ok(None)` means the action was abandoned because the thread or the VM
    /// went away while waiting; a disconnect has already finished the session.
    pub(crate) fn lock_suspended<'a>(
        &'a self,
        thread: &'a JpdaThread,
    ) -> DebugResult<Option<RwLockWriteGuard<'a, ()>>> {
        let lock = self.step_lock(thread);
        for attempt in 0..=SUSPEND_POLLS {
            let guard = lock.write();
            match self.vm.is_suspended(thread.id()) {
                Ok(true) => return Ok(Some(guard)),
                Ok(false) => {}
                Err(err) => {
                    drop(guard);
                    abandon_or_fail(self, err)?;
                    return Ok(None);
                }
            }
            drop(guard);
            if attempt == SUSPEND_POLLS {
                break;
            }
            tracing::trace!(
                target: "nova.jpda.step",
                thread = thread.id(),
                attempt,
                "waiting for thread to suspend"
            );
            std::thread::sleep(SUSPEND_POLL_INTERVAL);
        }
        Err(DebuggerError::NotSuspended(thread.id()))
    }

    /// Lets the debuggee run after an action, per the suspend policy.
    pub(crate) fn resume_after_action(&self, thread: ThreadId) -> Result<(), JdiError> {
        match self.suspend_policy() {
            SuspendPolicy::EventThread => self.vm.resume_thread(thread)?,
            SuspendPolicy::All | SuspendPolicy::None => self.vm.resume_all()?,
        }
        self.set_state(DebuggerState::Running);
        Ok(())
    }

    /// Routes an event set to its executors and resumes or stops.
    ///
    /// The set resumes only if every executor asks for it; any stop wins over
    /// an ignore. Executors run outside the registration table lock.
    pub fn dispatch(&self, set: &EventSet) -> EventOutcome {
        let mut resume = true;
        let mut ignored = false;
        for event in &set.events {
            if event.is_vm_gone() {
                self.mark_disconnected();
                return EventOutcome::Stop;
            }
            if let EventKind::ThreadDeath = event.kind {
                if let Some(thread) = event.thread {
                    self.forget_thread(thread);
                }
                continue;
            }
            let Some(request) = event.request else {
                continue;
            };
            match self.operator.executor(request) {
                Some(executor) => match executor.exec(self, event) {
                    EventOutcome::Resume => {}
                    EventOutcome::Stop => resume = false,
                    EventOutcome::Ignore => ignored = true,
                },
                None if matches!(event.kind, EventKind::ClassPrepare { .. }) => {}
                None => {
                    tracing::debug!(
                        target: "nova.jpda.operator",
                        request,
                        "event for unregistered request"
                    );
                    resume = false;
                }
            }
        }

        if self.is_finished() {
            return EventOutcome::Ignore;
        }
        if resume && ignored {
            return EventOutcome::Ignore;
        }
        if set.suspend_policy == SuspendPolicy::None {
            return if resume {
                EventOutcome::Resume
            } else {
                EventOutcome::Stop
            };
        }

        if resume {
            let result = match (set.suspend_policy, set.thread()) {
                (SuspendPolicy::EventThread, Some(thread)) => self.vm.resume_thread(thread),
                _ => self.vm.resume_all(),
            };
            if let Err(err) = result {
                if err.is_disconnect() {
                    self.mark_disconnected();
                } else {
                    tracing::warn!(target: "nova.jpda.operator", error = %err, "failed to resume");
                }
                return EventOutcome::Stop;
            }
            EventOutcome::Resume
        } else {
            if let Some(thread) = set.thread() {
                self.set_current_thread(Some(thread));
            }
            self.set_state(DebuggerState::Stopped);
            EventOutcome::Stop
        }
    }

    pub fn hidden_breakpoints(&self) -> Vec<HiddenBreakpoint> {
        self.hidden_breakpoints.lock().clone()
    }

    pub(crate) fn add_hidden_breakpoint(&self, breakpoint: HiddenBreakpoint) {
        self.hidden_breakpoints.lock().push(breakpoint);
    }

    pub(crate) fn remove_hidden_breakpoint(&self, request: RequestId) -> bool {
        let mut breakpoints = self.hidden_breakpoints.lock();
        let before = breakpoints.len();
        breakpoints.retain(|bp| bp.request != request);
        breakpoints.len() != before
    }

    /// Surfaces a message to the user (and the log).
    pub fn message(&self, text: &str) {
        tracing::info!(target: "nova.jpda.step", message = text, "debugger message");
        if let Some(sink) = &self.messages {
            sink(text);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_disconnected(&self) {
        self.set_state(DebuggerState::Disconnected);
        self.finish();
    }

    /// Tears the session down: unregisters every executor, drops thread
    /// state and hidden breakpoints and releases blocked actions.
    pub fn finish(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.operator.clear();
        self.hidden_breakpoints.lock().clear();
        self.threads.lock().clear();
        self.set_current_thread(None);
        self.synchronizer.release();
        self.set_state(DebuggerState::Disconnected);
        tracing::debug!(target: "nova.jpda.operator", "session finished");
    }

    /// Terminates the debuggee connection and finishes the session.
    pub fn kill(&self) {
        if let Err(err) = self.vm.dispose() {
            tracing::debug!(target: "nova.jpda.operator", error = %err, "dispose failed");
        }
        self.finish();
    }
}
