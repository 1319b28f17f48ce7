//! Session start-up and teardown.

use std::sync::Arc;
use std::time::Duration;

use nova_config::DebuggerConfig;
use nova_jdi::{JdiError, VirtualMachine};
use nova_scheduler::{BlockingTask, CancellationToken, Scheduler};
use parking_lot::Mutex;

use crate::action::ActionKind;
use crate::error::{DebugResult, DebuggerError};
use crate::operator::spawn_event_loop;
use crate::provider::ActionProvider;
use crate::session::{DebugSession, DebugSessionBuilder, DebuggerState};

const STOP_LISTENING_ATTEMPTS: usize = 5;
const STOP_LISTENING_INTERVAL: Duration = Duration::from_millis(20);

/// Attaches to (or launches, or listens for) a debuggee.
pub trait Connector: Send + Sync {
    /// Blocks until a VM is connected. Implementations should give up once
    /// `cancel` is cancelled.
    fn connect(&self, cancel: &CancellationToken) -> Result<Arc<dyn VirtualMachine>, JdiError>;

    /// Interrupts a pending listening accept. Returns `true` if one was
    /// interrupted; an attempt made before the accept started returns
    /// `false`.
    fn stop_listening(&self) -> bool {
        false
    }
}

type Configure = Box<dyn Fn(DebugSessionBuilder) -> DebugSessionBuilder + Send + Sync>;

pub struct StartActionProvider {
    connector: Arc<dyn Connector>,
    config: DebuggerConfig,
    configure: Option<Configure>,
    token: CancellationToken,
    session: Mutex<Option<Arc<DebugSession>>>,
}

impl StartActionProvider {
    pub fn new(connector: Arc<dyn Connector>, config: DebuggerConfig) -> Self {
        Self {
            connector,
            config,
            configure: None,
            token: CancellationToken::new(),
            session: Mutex::new(None),
        }
    }

    /// Customizes every session this provider builds (editor, chooser, ...).
    pub fn with_session_builder(
        mut self,
        configure: impl Fn(DebugSessionBuilder) -> DebugSessionBuilder + Send + Sync + 'static,
    ) -> Self {
        self.configure = Some(Box::new(configure));
        self
    }

    pub fn session(&self) -> Option<Arc<DebugSession>> {
        self.session.lock().clone()
    }

    /// Connects, starts dispatching events and lets the debuggee run.
    ///
    /// Failures after the connection is up kill the new session in the
    /// background and are reported as [`DebuggerError::Start`].
    pub fn start(&self) -> DebugResult<Arc<DebugSession>> {
        if self.token.is_cancelled() {
            return Err(DebuggerError::Start("cancelled".to_owned()));
        }
        let vm = self
            .connector
            .connect(&self.token)
            .map_err(|err| DebuggerError::Start(err.to_string()))?;
        if self.token.is_cancelled() {
            if let Err(err) = vm.dispose() {
                tracing::debug!(target: "nova.jpda.operator", error = %err, "dispose after cancel failed");
            }
            return Err(DebuggerError::Start("cancelled".to_owned()));
        }

        let mut builder = DebugSession::builder(vm).config(self.config.clone());
        if let Some(configure) = &self.configure {
            builder = configure(builder);
        }
        let session = builder.build();
        *self.session.lock() = Some(session.clone());

        match Self::launch(&session) {
            Ok(()) => {
                tracing::info!(target: "nova.jpda.operator", "debugger started");
                Ok(session)
            }
            Err(err) => {
                tracing::warn!(target: "nova.jpda.operator", error = %err, "start failed; killing session");
                let doomed = session.clone();
                // The task handle is dropped; the kill still runs.
                let _ = session.scheduler().spawn(move |_| {
                    doomed.kill();
                    Ok(())
                });
                Err(DebuggerError::Start(err.to_string()))
            }
        }
    }

    fn launch(session: &Arc<DebugSession>) -> DebugResult<()> {
        spawn_event_loop(session.clone()).map_err(|err| DebuggerError::Start(err.to_string()))?;
        session.vm().resume_all()?;
        session.set_state(DebuggerState::Running);
        Ok(())
    }

    /// [`start`](Self::start) on `scheduler`.
    pub fn post_start(self: &Arc<Self>, scheduler: &Scheduler) -> BlockingTask<DebugResult<Arc<DebugSession>>> {
        let provider = Arc::clone(self);
        scheduler.spawn_blocking(self.token.clone(), move |_| Ok(provider.start()))
    }

    /// Interrupts an in-flight start. The connector is asked to stop
    /// listening several times since an early attempt can be missed.
    pub fn cancel(&self) {
        self.token.cancel();
        for attempt in 0..STOP_LISTENING_ATTEMPTS {
            if self.connector.stop_listening() {
                tracing::debug!(target: "nova.jpda.operator", attempt, "stopped listening");
                return;
            }
            std::thread::sleep(STOP_LISTENING_INTERVAL);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Terminates the debuggee connection.
pub struct KillActionProvider;

impl ActionProvider for KillActionProvider {
    fn actions(&self) -> &'static [ActionKind] {
        &[ActionKind::Kill]
    }

    fn is_enabled(&self, session: &DebugSession, _action: ActionKind) -> bool {
        !session.is_finished()
    }

    fn do_action(&self, session: &Arc<DebugSession>, _action: ActionKind) -> DebugResult<()> {
        session.kill();
        Ok(())
    }
}
