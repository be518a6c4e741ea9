//! Debugger engine: session state machine, breakpoint registry, event
//! dispatch and the public operation surface.
//!
//! All engine state lives in one [`Session`] behind a mutex. Public
//! operations run synchronously on the caller thread; a dedicated dispatch
//! thread blocks on the event stream outside the lock and handles each
//! event set under it.

pub mod breakpoint;
pub mod error;
pub mod eval;
pub mod process;
pub mod snapshot;

use crate::analyzer::symbol::Symbol;
use crate::analyzer::Analyzer;
use crate::config::Config;
use crate::jdwp::event::{Event, EventKind};
use crate::jdwp::types::{
    event_kind, signature_from_class_name, step, suspend_policy, Location as CodeIndex, RequestId,
    ThreadId,
};
use crate::jdwp::{Client, EventReceiver};
use crate::{muted_error, weak_error};
use breakpoint::{class_name_of, Breakpoint, BreakpointRegistry};
use error::Error;
use eval::{EvalContext, EvalValue};
use log::{debug, info, warn};
use process::{ConsoleBuffer, LaunchedProcess};
use serde::Serialize;
use snapshot::{CallStack, ClassMetaCache, Location, Snapshot, Variable};
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
pub enum DebuggerState {
    /// No debuggee.
    #[default]
    Idle,
    /// Debuggee attached and running.
    Running,
    /// Debuggee suspended at a breakpoint or step location.
    Breaking,
}

/// Mutable engine state, one per debug session.
#[derive(Default)]
struct Session {
    state: DebuggerState,
    client: Option<Client>,
    process: Option<LaunchedProcess>,
    breakpoints: BreakpointRegistry,
    cache: ClassMetaCache,
    snapshot: Option<Snapshot>,
    suspended_thread: Option<ThreadId>,
    step_request: Option<RequestId>,
    class_prepare_request: Option<RequestId>,
}

pub struct Debugger {
    config: Config,
    session: Arc<Mutex<Session>>,
    console: Arc<ConsoleBuffer>,
    analyzer: Analyzer,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl Debugger {
    pub fn new(config: Config) -> Self {
        let console = Arc::new(ConsoleBuffer::new(config.max_console_lines));
        Self {
            config,
            session: Arc::new(Mutex::new(Session::default())),
            console,
            analyzer: Analyzer::default(),
            dispatch: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().expect("session poisoned")
    }

    /// Launch `main_class` under the debug agent and attach to it.
    ///
    /// `launch_args` is a JSON object; `-classpath` is required, every other
    /// entry is ignored. The debuggee starts suspended, the dispatch loop
    /// releases it when the VM start event arrives.
    pub fn start(&self, main_class: &str, launch_args: &str) -> Result<(), Error> {
        let mut session = self.lock();
        if session.state != DebuggerState::Idle {
            return Err(Error::AlreadyRun);
        }

        let args: HashMap<String, String> = serde_json::from_str(launch_args)?;
        let classpath = args
            .get("-classpath")
            .ok_or_else(|| Error::LaunchArgs("-classpath entry is required".to_string()))?;

        let mut command = Command::new(&self.config.java);
        command
            .arg("-classpath")
            .arg(classpath)
            .arg(format!(
                "-agentlib:jdwp=transport=dt_socket,server=y,suspend=y,address={}",
                self.config.port
            ))
            .arg(main_class);

        let mut process = LaunchedProcess::start(command, self.console.clone())?;
        thread::sleep(Duration::from_millis(self.config.attach_initial_delay_ms));

        let attached = Client::attach(
            &self.config.host,
            self.config.port,
            self.config.attach_retries,
            Duration::from_millis(self.config.attach_retry_delay_ms),
        );
        let (client, receiver) = match attached {
            Ok(attached) => attached,
            Err(e) => {
                process.stop();
                return Err(e.into());
            }
        };

        // one unfiltered class-prepare request serves every deferred
        // breakpoint of the session
        session.class_prepare_request = Some(client.set_event_request(
            event_kind::CLASS_PREPARE,
            suspend_policy::EVENT_THREAD,
            &[],
        )?);

        for key in session.breakpoints.keys() {
            muted_error!(try_resolve(&mut session, &client, &key));
        }

        session.client = Some(client.clone());
        session.process = Some(process);
        session.state = DebuggerState::Running;
        drop(session);

        let dispatch_session = self.session.clone();
        let handle = thread::Builder::new()
            .name("event-dispatch".into())
            .spawn(move || dispatch_loop(dispatch_session, client, receiver))?;
        *self.dispatch.lock().expect("dispatch handle poisoned") = Some(handle);

        info!(target: "debugger", "debuggee {main_class} started");
        Ok(())
    }

    /// Tear the session down: kill the debuggee, drop the connection, join
    /// the dispatch thread. Idempotent.
    pub fn stop(&self) -> Result<(), Error> {
        {
            let mut session = self.lock();
            if let Some(client) = session.client.take() {
                muted_error!(client.dispose());
                client.close();
            }
            if let Some(mut process) = session.process.take() {
                process.stop();
            }
        }

        // closing the socket ends the dispatch loop, which finishes the
        // teardown under its own lock
        let handle = self.dispatch.lock().expect("dispatch handle poisoned").take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(target: "debugger", "dispatch thread panicked");
            }
        }
        Ok(())
    }

    /// Suspending a running debuggee on demand is not part of the protocol
    /// subset the engine drives.
    pub fn suspend(&self) -> Result<(), Error> {
        Err(Error::Unsupported("suspend"))
    }

    pub fn resume(&self) -> Result<(), Error> {
        let mut session = self.lock();
        if session.state != DebuggerState::Breaking {
            return Err(Error::UnexpectedState(session.state));
        }
        client_of(&session)?.clone().resume()?;
        session.snapshot = None;
        session.suspended_thread = None;
        session.state = DebuggerState::Running;
        Ok(())
    }

    pub fn step_into(&self) -> Result<(), Error> {
        self.step(step::DEPTH_INTO)
    }

    pub fn step_over(&self) -> Result<(), Error> {
        self.step(step::DEPTH_OVER)
    }

    pub fn step_out(&self) -> Result<(), Error> {
        self.step(step::DEPTH_OUT)
    }

    fn step(&self, depth: i32) -> Result<(), Error> {
        let mut session = self.lock();
        if session.state != DebuggerState::Breaking {
            return Err(Error::UnexpectedState(session.state));
        }
        let thread = session.suspended_thread.ok_or(Error::NoSuspendedThread)?;
        let client = client_of(&session)?.clone();

        if let Some(request) = session.step_request.take() {
            muted_error!(client.clear_event_request(event_kind::SINGLE_STEP, request));
        }
        let request = client.set_event_request(
            event_kind::SINGLE_STEP,
            suspend_policy::EVENT_THREAD,
            &[
                crate::jdwp::command::Modifier::Step {
                    thread,
                    size: step::SIZE_LINE,
                    depth,
                },
                crate::jdwp::command::Modifier::Count(1),
            ],
        )?;
        session.step_request = Some(request);
        session.state = DebuggerState::Running;
        client.resume()?;
        Ok(())
    }

    /// Register a breakpoint, replacing any previous one on the same line.
    /// Resolution happens now when the class is already loaded, at its
    /// class-prepare event otherwise.
    pub fn add_breakpoint(&self, source_path: &str, line: u32) -> bool {
        let mut session = self.lock();
        let bp = Breakpoint::new(source_path, line);
        let key = bp.key();

        if let Some(old) = session.breakpoints.get_mut(&key) {
            if let (Some(request), Some(client)) = (old.request.take(), session.client.clone()) {
                muted_error!(client.clear_event_request(event_kind::BREAKPOINT, request));
            }
        }
        session.breakpoints.insert(bp);

        if let Some(client) = session.client.clone() {
            // failure drops the bookkeeping, the add itself still succeeded
            muted_error!(try_resolve(&mut session, &client, &key));
        }
        true
    }

    /// Remove a breakpoint. False when nothing was registered on that line.
    pub fn delete_breakpoint(&self, source_path: &str, line: u32) -> bool {
        let mut session = self.lock();
        let key = format!("{}:{line}", class_name_of(source_path));
        let Some(bp) = session.breakpoints.remove(&key) else {
            return false;
        };
        if let (Some(request), Some(client)) = (bp.request, session.client.clone()) {
            muted_error!(client.clear_event_request(event_kind::BREAKPOINT, request));
        }
        true
    }

    pub fn delete_all_breakpoints(&self) {
        let mut session = self.lock();
        let client = session.client.clone();
        for bp in session.breakpoints.iter_mut() {
            if let (Some(request), Some(client)) = (bp.request.take(), client.as_ref()) {
                muted_error!(client.clear_event_request(event_kind::BREAKPOINT, request));
            }
        }
        session.breakpoints.clear();
    }

    /// Toggle a breakpoint. Disabling reports whether a live protocol
    /// request was cleared; enabling reports whether one backs it now.
    pub fn set_breakpoint_enabled(&self, source_path: &str, line: u32, enabled: bool) -> bool {
        let mut session = self.lock();
        let key = format!("{}:{line}", class_name_of(source_path));
        let Some(bp) = session.breakpoints.get_mut(&key) else {
            return false;
        };
        bp.enabled = enabled;

        if !enabled {
            let Some(request) = bp.request.take() else {
                return false;
            };
            bp.active = false;
            if let Some(client) = session.client.clone() {
                muted_error!(client.clear_event_request(event_kind::BREAKPOINT, request));
            }
            return true;
        }

        if let Some(client) = session.client.clone() {
            muted_error!(try_resolve(&mut session, &client, &key));
        }
        session
            .breakpoints
            .get_mut(&key)
            .is_some_and(|bp| bp.active)
    }

    pub fn state(&self) -> DebuggerState {
        self.lock().state
    }

    /// Stop location of the suspended debuggee.
    pub fn location(&self) -> Option<Location> {
        self.lock().snapshot.as_ref().map(|s| s.location.clone())
    }

    /// Call stack of the suspended debuggee, innermost frame first.
    pub fn stack(&self) -> Option<CallStack> {
        self.lock().snapshot.as_ref().map(|s| s.stack.clone())
    }

    /// Values visible at the stop location.
    pub fn variables(&self) -> Option<Vec<Variable>> {
        self.lock().snapshot.as_ref().map(|s| s.variables.clone())
    }

    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.lock().breakpoints.snapshot()
    }

    /// Return and clear the captured debuggee output.
    pub fn take_console(&self) -> Vec<String> {
        self.console.drain()
    }

    /// Evaluate an expression in the innermost frame of the suspended
    /// thread.
    pub fn evaluate(&self, expression: &str) -> Result<EvalValue, Error> {
        let mut session = self.lock();
        if session.state != DebuggerState::Breaking {
            return Err(Error::UnexpectedState(session.state));
        }
        let thread = session.suspended_thread.ok_or(Error::NoSuspendedThread)?;
        let client = client_of(&session)?.clone();
        let frame = *client
            .frames(thread)?
            .first()
            .ok_or(Error::NoSuspendedThread)?;

        let mut ctx = EvalContext {
            client: &client,
            cache: &mut session.cache,
            thread,
            frame,
        };
        Ok(eval::evaluate(&mut ctx, expression)?)
    }

    /// Rebuild the symbol table from a source tree.
    pub fn analyze(&self, root: &Path) -> Result<(), Error> {
        self.analyzer.analyze(root)?;
        Ok(())
    }

    /// Declaration of the symbol under a cursor.
    pub fn declaration_symbol(
        &self,
        path: &str,
        line: usize,
        column: usize,
    ) -> Result<Symbol, Error> {
        Ok(self.analyzer.declaration_symbol(path, line, column)?)
    }

    /// Live value of the variable whose declaration sits under a cursor.
    pub fn symbol_value(&self, path: &str, line: usize, column: usize) -> Result<Variable, Error> {
        let symbol = self.analyzer.declaration_symbol(path, line, column)?;
        let key = symbol.key.to_string();

        let session = self.lock();
        if session.state != DebuggerState::Breaking {
            return Err(Error::UnexpectedState(session.state));
        }
        session
            .snapshot
            .as_ref()
            .and_then(|s| {
                s.variables
                    .iter()
                    .find(|v| key.starts_with(&v.key.to_string()))
            })
            .cloned()
            .ok_or(Error::NoSymbolValue(key))
    }
}

impl Drop for Debugger {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn client_of<'a>(session: &'a Session) -> Result<&'a Client, Error> {
    session
        .client
        .as_ref()
        .ok_or(Error::UnexpectedState(DebuggerState::Idle))
}

/// Resolve one registered breakpoint against a loaded class. A breakpoint
/// whose line has no executable location is dropped from the registry.
fn try_resolve(session: &mut Session, client: &Client, key: &str) -> Result<(), Error> {
    let Some(bp) = session.breakpoints.get_mut(key) else {
        return Ok(());
    };
    if bp.request.is_some() || !bp.enabled {
        return Ok(());
    }
    let signature = signature_from_class_name(&bp.class_name);
    let classes = client.classes_by_signature(&signature)?;
    let Some(class) = classes.into_iter().next() else {
        // not loaded yet, the class-prepare handler will come back to it
        return Ok(());
    };
    resolve_at_class(session, client, key, class.ref_type_tag, class.type_id)
}

fn resolve_at_class(
    session: &mut Session,
    client: &Client,
    key: &str,
    type_tag: u8,
    type_id: u64,
) -> Result<(), Error> {
    let line = match session.breakpoints.get_mut(key) {
        Some(bp) if bp.enabled && bp.request.is_none() => bp.line,
        _ => return Ok(()),
    };

    let meta = session.cache.meta(client, type_id)?;
    let mut location = None;
    for method in &meta.methods {
        let table = match session.cache.line_table(client, type_id, method.id) {
            Ok(table) => table,
            // typically ABSENT_INFORMATION on native or synthetic methods
            Err(e) => {
                debug!(target: "debugger", "line table of {}: {e:#}", method.name);
                continue;
            }
        };
        if let Some(index) = table.index_of_line(line) {
            location = Some(CodeIndex {
                type_tag,
                class: type_id,
                method: method.id,
                index,
            });
            break;
        }
    }

    let Some(location) = location else {
        warn!(target: "debugger", "breakpoint {key} has no executable location, dropped");
        session.breakpoints.remove(key);
        return Ok(());
    };

    let request = client.set_event_request(
        event_kind::BREAKPOINT,
        suspend_policy::EVENT_THREAD,
        &[crate::jdwp::command::Modifier::LocationOnly(location)],
    )?;
    if let Some(bp) = session.breakpoints.get_mut(key) {
        bp.request = Some(request);
        bp.active = true;
        debug!(target: "debugger", "breakpoint {key} resolved at index {}", location.index);
    }
    Ok(())
}

fn dispatch_loop(session: Arc<Mutex<Session>>, client: Client, receiver: EventReceiver) {
    loop {
        let set = match receiver.next() {
            Ok(set) => set,
            Err(e) => {
                debug!(target: "debugger", "event stream closed: {e:#}");
                break;
            }
        };

        let mut session = session.lock().expect("session poisoned");
        let event_thread = set.events.iter().find_map(|e| e.kind.thread());
        let mut auto_resume = true;
        for event in set.events {
            if let Err(e) = handle_event(&mut session, &client, event, &mut auto_resume) {
                warn!(target: "debugger", "event handler failed: {e:#}");
            }
        }
        // resume only what the set suspended: an EVENT_THREAD set must not
        // touch the suspend count of a thread stopped at a breakpoint
        if auto_resume {
            match set.suspend_policy {
                suspend_policy::EVENT_THREAD => {
                    if let Some(thread) = event_thread {
                        muted_error!(client.thread_resume(thread), "auto-resume:");
                    }
                }
                suspend_policy::ALL => {
                    muted_error!(client.resume(), "auto-resume:");
                }
                _ => {}
            }
        }
    }

    teardown(&mut session.lock().expect("session poisoned"));
}

fn handle_event(
    session: &mut Session,
    client: &Client,
    event: Event,
    auto_resume: &mut bool,
) -> Result<(), Error> {
    match event.kind {
        EventKind::VmStart { .. } => {
            debug!(target: "debugger", "target vm started");
        }
        EventKind::VmDeath => {
            debug!(target: "debugger", "target vm died");
        }
        EventKind::ClassPrepare {
            ref_type_tag,
            type_id,
            signature,
            ..
        } => {
            let class_name = crate::jdwp::types::class_name_from_signature(&signature);
            for key in session.breakpoints.pending_for_class(&class_name) {
                // per-breakpoint failures only drop that breakpoint
                weak_error!(resolve_at_class(session, client, &key, ref_type_tag, type_id));
            }
        }
        EventKind::Breakpoint { thread, .. } => {
            *auto_resume = false;
            suspend_at(session, client, thread)?;
            info!(target: "debugger", "hit breakpoint in thread {thread}");
        }
        EventKind::SingleStep { thread, .. } => {
            *auto_resume = false;
            if let Some(request) = session.step_request.take() {
                muted_error!(client.clear_event_request(event_kind::SINGLE_STEP, request));
            }
            suspend_at(session, client, thread)?;
        }
        EventKind::MethodEntry { .. } | EventKind::MethodExit { .. } => {}
        EventKind::Unknown(kind) => {
            debug!(target: "debugger", "unhandled event kind {kind}");
        }
    }
    Ok(())
}

fn suspend_at(session: &mut Session, client: &Client, thread: ThreadId) -> Result<(), Error> {
    let snapshot = snapshot::build(client, &mut session.cache, thread)?;
    session.snapshot = Some(snapshot);
    session.suspended_thread = Some(thread);
    session.state = DebuggerState::Breaking;
    Ok(())
}

/// Reset the session after connection loss. Breakpoints keep their
/// bookkeeping but lose their live requests.
fn teardown(session: &mut Session) {
    for bp in session.breakpoints.iter_mut() {
        bp.request = None;
        bp.active = false;
    }
    session.step_request = None;
    session.class_prepare_request = None;
    session.snapshot = None;
    session.suspended_thread = None;
    session.cache.clear();
    if let Some(client) = session.client.take() {
        client.close();
    }
    if let Some(mut process) = session.process.take() {
        process.stop();
    }
    session.state = DebuggerState::Idle;
    info!(target: "debugger", "session closed");
}
