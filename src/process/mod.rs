//! Lazy Process Manager (SPEC_FULL.md §4.H).
//!
//! Guest "commands" are backed by lazily-loaded "modules"; a command maps
//! to exactly one module, and a module may serve several commands (a
//! transpiler, a shell, a demo TUI). Module loading and command execution
//! both run on a dedicated multi-thread runtime the manager owns, the same
//! role the teacher crate's `async_api::tokio` backend plays for blocking
//! FUSE replies.

use crate::config::Config;
use crate::stdio::{OutputSink, StdinQueue};
use async_trait::async_trait;
use log::{error, trace, warn};
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::{Notify, OnceCell};

pub const SIGINT: i32 = 2;
pub const SIGTERM: i32 = 15;

/// The environment a spawned command runs with.
#[derive(Clone, Debug, Default)]
pub struct ProcessEnv {
    pub cwd: String,
    pub vars: Vec<(String, String)>,
}

/// A lazily loaded guest component implementing one or more commands.
#[async_trait]
pub trait GuestModule: Send + Sync {
    /// Runs `command` to completion against the given stdio, returning its
    /// exit code. Host wrappers never let a panic here escape: the process
    /// manager converts one into stderr text plus `exit_code = 1` (§4.H).
    async fn run(
        &self,
        command: &str,
        args: &[String],
        env: &ProcessEnv,
        stdin: StdinQueue,
        stdout: OutputSink,
        stderr: OutputSink,
    ) -> i32;
}

/// Loads a named module from wherever the embedder stores compiled guest
/// components. The manager never talks to storage directly.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(&self, module_name: &str) -> std::io::Result<Arc<dyn GuestModule>>;
}

/// A handle over a single module-level invocation (§4.H). Synchronous
/// guest modules resolve immediately; asynchronous ones resolve when their
/// background task completes.
#[derive(Clone)]
pub struct CommandHandle {
    exit_code: Arc<AtomicI32>,
    done: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

const PENDING: i32 = i32::MIN;

impl CommandHandle {
    fn pending() -> Self {
        CommandHandle {
            exit_code: Arc::new(AtomicI32::new(PENDING)),
            done: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    fn resolved(code: i32) -> Self {
        let handle = CommandHandle::pending();
        handle.complete(code);
        handle
    }

    fn complete(&self, code: i32) {
        self.exit_code.store(code, Ordering::SeqCst);
        self.done.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn poll(&self) -> Option<i32> {
        self.done
            .load(Ordering::SeqCst)
            .then(|| self.exit_code.load(Ordering::SeqCst))
    }

    pub async fn resolve(&self) -> i32 {
        while !self.done.load(Ordering::SeqCst) {
            self.notify.notified().await;
        }
        self.exit_code.load(Ordering::SeqCst)
    }
}

/// State machine: `created -> started -> exited`; transitions are one-way
/// (§3 LazyProcess invariant).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ProcessState {
    Created,
    Started,
    Exited,
}

/// A handle over a guest command executed on demand, with buffered stdio
/// and an exit code (§3, §4.H).
pub struct LazyProcess {
    stdin: StdinQueue,
    stdout: Arc<SyncMutex<Vec<u8>>>,
    stderr: Arc<SyncMutex<Vec<u8>>>,
    exit_code: Arc<SyncMutex<Option<i32>>>,
    state: Arc<SyncMutex<ProcessState>>,
    terminal_size: SyncMutex<(u16, u16)>,
    raw_mode: AtomicBool,
    completion: Arc<Notify>,
    stdout_chunk: usize,
    stderr_chunk: usize,
}

impl LazyProcess {
    fn new(terminal_size: (u16, u16), stdout_chunk: usize, stderr_chunk: usize) -> Self {
        LazyProcess {
            stdin: StdinQueue::new(),
            stdout: Arc::new(SyncMutex::new(Vec::new())),
            stderr: Arc::new(SyncMutex::new(Vec::new())),
            exit_code: Arc::new(SyncMutex::new(None)),
            state: Arc::new(SyncMutex::new(ProcessState::Created)),
            terminal_size: SyncMutex::new(terminal_size),
            raw_mode: AtomicBool::new(false),
            completion: Arc::new(Notify::new()),
            stdout_chunk,
            stderr_chunk,
        }
    }

    /// Batch mode: queues a chunk of stdin without starting execution.
    pub fn write_stdin_batch(&self, data: &[u8]) {
        self.stdin.push(data);
    }

    /// Interactive mode: writes live stdin; no-op once exited (§3).
    pub fn write_stdin(&self, data: &[u8]) -> u64 {
        if *self.state.lock() == ProcessState::Exited {
            return 0;
        }
        self.stdin.push(data);
        data.len() as u64
    }

    pub fn close_stdin(&self) {
        self.stdin.close();
    }

    pub fn read_stdout(&self, max: usize) -> Vec<u8> {
        drain_capped(&self.stdout, max.min(self.stdout_chunk))
    }

    pub fn read_stderr(&self, max: usize) -> Vec<u8> {
        drain_capped(&self.stderr, max.min(self.stderr_chunk))
    }

    pub fn poll(&self) -> Option<i32> {
        *self.exit_code.lock()
    }

    pub async fn resolve(&self) -> i32 {
        loop {
            if let Some(code) = *self.exit_code.lock() {
                return code;
            }
            self.completion.notified().await;
        }
    }

    pub fn set_terminal_size(&self, cols: u16, rows: u16) {
        *self.terminal_size.lock() = (cols, rows);
    }

    pub fn get_terminal_size(&self) -> (u16, u16) {
        *self.terminal_size.lock()
    }

    pub fn set_raw_mode(&self, raw: bool) {
        self.raw_mode.store(raw, Ordering::SeqCst);
    }

    pub fn is_raw_mode(&self) -> bool {
        self.raw_mode.load(Ordering::SeqCst)
    }

    /// SIGINT (2) injects `0x03` into live stdin; SIGTERM (15) marks the
    /// process for exit with `128 + n` and is idempotent (§4.H).
    pub fn send_signal(&self, signal: i32) {
        match signal {
            SIGINT => {
                self.stdin.push(&[0x03]);
            }
            SIGTERM => {
                let mut exit_code = self.exit_code.lock();
                if exit_code.is_none() {
                    *exit_code = Some(128 + SIGTERM);
                    *self.state.lock() = ProcessState::Exited;
                    self.completion.notify_waiters();
                }
            }
            other => warn!("send_signal: unsupported signal {other}"),
        }
    }

    /// Marks execution as having begun; a no-op once the process has
    /// already exited, so a late signal can't resurrect a finished process
    /// into `Started` (§3: transitions are one-way).
    fn mark_started(&self) {
        let mut state = self.state.lock();
        if *state == ProcessState::Created {
            *state = ProcessState::Started;
        }
    }

    fn finish(&self, code: i32) {
        let mut exit_code = self.exit_code.lock();
        if exit_code.is_none() {
            *exit_code = Some(code);
        }
        *self.state.lock() = ProcessState::Exited;
        self.completion.notify_waiters();
    }
}

fn drain_capped(buf: &Arc<SyncMutex<Vec<u8>>>, max: usize) -> Vec<u8> {
    let mut buf = buf.lock();
    let take = max.min(buf.len());
    buf.drain(..take).collect()
}

/// Command name -> module name, on-demand module loading with single-flight
/// deduplication, and `LazyProcess` spawning (§4.H).
pub struct ProcessManager {
    loader: Arc<dyn ModuleLoader>,
    commands: HashMap<String, String>,
    modules: SyncMutex<HashMap<String, Arc<OnceCell<Option<Arc<dyn GuestModule>>>>>>,
    runtime: Runtime,
    stdout_chunk: usize,
    stderr_chunk: usize,
    default_terminal_size: (u16, u16),
}

impl ProcessManager {
    pub fn new(loader: Arc<dyn ModuleLoader>, commands: HashMap<String, String>, config: &Config) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread().worker_threads(2).enable_all().build()?;
        Ok(ProcessManager {
            loader,
            commands,
            modules: SyncMutex::new(HashMap::new()),
            runtime,
            stdout_chunk: config.stdout_chunk,
            stderr_chunk: config.stderr_chunk,
            default_terminal_size: (config.terminal_cols, config.terminal_rows),
        })
    }

    pub fn get_lazy_module(&self, command: &str) -> Option<String> {
        self.commands.get(command).cloned()
    }

    /// Loads `module_name`, deduplicating concurrent loaders onto the same
    /// in-flight future (§4.H). Returns `None` if loading failed.
    fn load(&self, module_name: &str) -> Option<Arc<dyn GuestModule>> {
        let cell = {
            let mut modules = self.modules.lock();
            modules
                .entry(module_name.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        let loader = self.loader.clone();
        let owned_name = module_name.to_string();
        self.runtime
            .block_on(cell.get_or_init(|| async move {
                match loader.load(&owned_name).await {
                    Ok(module) => Some(module),
                    Err(err) => {
                        error!("module load failed for {owned_name}: {err}");
                        None
                    }
                }
            }))
            .clone()
    }

    /// Loads every mapped module eagerly and in parallel, for the
    /// no-stack-switch tier (§4.H).
    pub fn load_all_eager(&self) {
        let names: Vec<String> = self.commands.values().cloned().collect();
        self.runtime.block_on(async {
            let loader = self.loader.clone();
            let mut tasks = tokio::task::JoinSet::new();
            for name in names {
                let loader = loader.clone();
                tasks.spawn(async move {
                    if let Err(err) = loader.load(&name).await {
                        error!("eager load failed for {name}: {err}");
                    }
                });
            }
            while tasks.join_next().await.is_some() {}
        });
    }

    /// Runs a module's `run` entry point once, outside the `LazyProcess`
    /// stdio machinery, and returns a `CommandHandle` bound to it (§4.H).
    /// A host-side wrapper that already has its result in hand (module
    /// unavailable, or a module that completes synchronously) can instead
    /// build one directly with `CommandHandle::resolved`.
    pub fn invoke_once(&self, command: &str, args: Vec<String>, env: ProcessEnv) -> CommandHandle {
        let Some(module) = self.load(self.get_lazy_module(command).as_deref().unwrap_or(command)) else {
            return CommandHandle::resolved(127);
        };
        let handle = CommandHandle::pending();
        let completion = handle.clone();
        let command = command.to_string();
        self.runtime.spawn(async move {
            let stdin = StdinQueue::new();
            stdin.close();
            // Isolated on its own task so a panicking module surfaces as a
            // JoinError instead of taking the manager's runtime down.
            let join = tokio::spawn(async move {
                module
                    .run(&command, &args, &env, stdin, OutputSink::new(|_| {}), OutputSink::new(|_| {}))
                    .await
            });
            let code = match join.await {
                Ok(code) => code,
                Err(join_err) => {
                    if join_err.is_panic() {
                        error!("guest module panicked: {}", panic_message(join_err.into_panic()));
                    } else {
                        error!("guest module task was cancelled");
                    }
                    1
                }
            };
            completion.complete(code);
        });
        handle
    }

    /// Spawns a process in batch mode: execution starts once the embedder
    /// calls `close_stdin` and the returned handle's background task is
    /// scheduled (§4.H).
    pub fn spawn_batch(&self, command: &str, args: Vec<String>, env: ProcessEnv) -> Arc<LazyProcess> {
        let process = Arc::new(LazyProcess::new(self.default_terminal_size, self.stdout_chunk, self.stderr_chunk));
        trace!("spawn_batch {command}");
        let module = self.load(self.get_lazy_module(command).as_deref().unwrap_or(command));
        let stdin = process.stdin.clone();
        let stdout_buf = process.stdout.clone();
        let stderr_buf = process.stderr.clone();
        let proc_for_task = process.clone();
        let command = command.to_string();
        self.runtime.spawn(async move {
            // Batch mode waits for the stdin queue to close before the
            // guest's stdin reader observes EOF.
            while !stdin.is_closed() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
            run_module(module, &command, &args, &env, stdin, stdout_buf, stderr_buf, proc_for_task).await;
        });
        process
    }

    /// Spawns and immediately executes in interactive mode: stdin is read
    /// live, and `raw_mode` is set for the process's lifetime (§4.H).
    pub fn spawn_interactive(&self, command: &str, args: Vec<String>, env: ProcessEnv, terminal_size: (u16, u16)) -> Arc<LazyProcess> {
        let process = Arc::new(LazyProcess::new(terminal_size, self.stdout_chunk, self.stderr_chunk));
        process.set_raw_mode(true);
        trace!("spawn_interactive {command}");
        let module = self.load(self.get_lazy_module(command).as_deref().unwrap_or(command));
        let stdin = process.stdin.clone();
        let stdout_buf = process.stdout.clone();
        let stderr_buf = process.stderr.clone();
        let proc_for_task = process.clone();
        let command = command.to_string();
        self.runtime.spawn(async move {
            run_module(module, &command, &args, &env, stdin, stdout_buf, stderr_buf, proc_for_task).await;
        });
        process
    }
}

async fn run_module(
    module: Option<Arc<dyn GuestModule>>,
    command: &str,
    args: &[String],
    env: &ProcessEnv,
    stdin: StdinQueue,
    stdout_buf: Arc<SyncMutex<Vec<u8>>>,
    stderr_buf: Arc<SyncMutex<Vec<u8>>>,
    process: Arc<LazyProcess>,
) {
    let Some(module) = module else {
        let message = format!("module unavailable for command {command}\n");
        stderr_buf.lock().extend_from_slice(message.as_bytes());
        process.finish(127);
        return;
    };

    process.mark_started();

    let stdout_sink_buf = stdout_buf.clone();
    let stdout = OutputSink::new(move |data| stdout_sink_buf.lock().extend_from_slice(data));
    let stderr_sink_buf = stderr_buf.clone();
    let stderr = OutputSink::new(move |data| stderr_sink_buf.lock().extend_from_slice(data));

    let command_owned = command.to_string();
    let args_owned = args.to_vec();
    let env_owned = env.clone();
    // Isolated on its own task so a panicking module surfaces as a
    // JoinError instead of taking the manager's runtime down with it.
    let join = tokio::spawn(async move {
        module.run(&command_owned, &args_owned, &env_owned, stdin, stdout, stderr).await
    });
    match join.await {
        Ok(code) => process.finish(code),
        Err(join_err) => {
            let text = if join_err.is_panic() {
                panic_message(join_err.into_panic())
            } else {
                "guest module task was cancelled".to_string()
            };
            stderr_buf.lock().extend_from_slice(format!("{text}\n").as_bytes());
            process.finish(1);
        }
    }
}

/// Extracts a human-readable message from a caught panic payload, falling
/// back to a generic message for payloads that aren't `&str`/`String`.
fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "guest module panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoModule;

    #[async_trait]
    impl GuestModule for EchoModule {
        async fn run(
            &self,
            _command: &str,
            _args: &[String],
            _env: &ProcessEnv,
            stdin: StdinQueue,
            stdout: OutputSink,
            _stderr: OutputSink,
        ) -> i32 {
            loop {
                let chunk = stdin.blocking_read(64, std::time::Duration::from_millis(50));
                if !chunk.is_empty() {
                    stdout.write(&chunk);
                }
                if stdin.is_closed() && stdin.read(1).is_empty() {
                    break;
                }
            }
            0
        }
    }

    struct PanicModule;

    #[async_trait]
    impl GuestModule for PanicModule {
        async fn run(
            &self,
            _command: &str,
            _args: &[String],
            _env: &ProcessEnv,
            _stdin: StdinQueue,
            _stdout: OutputSink,
            _stderr: OutputSink,
        ) -> i32 {
            panic!("exploded");
        }
    }

    struct StaticLoader(Arc<dyn GuestModule>);

    #[async_trait]
    impl ModuleLoader for StaticLoader {
        async fn load(&self, _module_name: &str) -> std::io::Result<Arc<dyn GuestModule>> {
            Ok(self.0.clone())
        }
    }

    fn manager() -> ProcessManager {
        let mut commands = HashMap::new();
        commands.insert("echo".to_string(), "echo-module".to_string());
        ProcessManager::new(Arc::new(StaticLoader(Arc::new(EchoModule))), commands, &Config::default()).unwrap()
    }

    #[test]
    fn batch_mode_drains_after_close() {
        let manager = manager();
        let process = manager.spawn_batch("echo", vec![], ProcessEnv::default());
        process.write_stdin_batch(b"ok\n");
        process.close_stdin();
        let code = manager.runtime.block_on(process.resolve());
        assert_eq!(code, 0);
        assert_eq!(process.read_stdout(100), b"ok\n");
    }

    #[test]
    fn unknown_command_exits_127() {
        let manager = manager();
        let process = manager.spawn_batch("missing", vec![], ProcessEnv::default());
        process.close_stdin();
        let code = manager.runtime.block_on(process.resolve());
        assert_eq!(code, 127);
    }

    #[test]
    fn sigterm_sets_exit_code_and_is_idempotent() {
        let process = Arc::new(LazyProcess::new((80, 24), 8192, 1024));
        process.send_signal(SIGTERM);
        assert_eq!(process.poll(), Some(128 + SIGTERM));
        process.send_signal(SIGTERM);
        assert_eq!(process.poll(), Some(128 + SIGTERM));
    }

    #[test]
    fn exit_code_is_monotonic_once_set() {
        let process = LazyProcess::new((80, 24), 8192, 1024);
        process.finish(0);
        process.finish(1);
        assert_eq!(process.poll(), Some(0));
    }

    #[test]
    fn command_handle_resolved_is_immediately_ready() {
        let handle = CommandHandle::resolved(0);
        assert_eq!(handle.poll(), Some(0));
    }

    #[test]
    fn panicking_module_finishes_the_process_instead_of_hanging() {
        let mut commands = HashMap::new();
        commands.insert("boom".to_string(), "boom-module".to_string());
        let manager = ProcessManager::new(Arc::new(StaticLoader(Arc::new(PanicModule))), commands, &Config::default()).unwrap();
        let process = manager.spawn_batch("boom", vec![], ProcessEnv::default());
        process.close_stdin();
        let code = manager.runtime.block_on(process.resolve());
        assert_eq!(code, 1);
        assert!(process.read_stderr(1024).starts_with(b"exploded"));
    }

    #[test]
    fn mark_started_moves_created_to_started_but_never_resurrects_exited() {
        let process = LazyProcess::new((80, 24), 8192, 1024);
        assert_eq!(*process.state.lock(), ProcessState::Created);
        process.mark_started();
        assert_eq!(*process.state.lock(), ProcessState::Started);
        process.finish(0);
        assert_eq!(*process.state.lock(), ProcessState::Exited);
        process.mark_started();
        assert_eq!(*process.state.lock(), ProcessState::Exited);
    }

    #[test]
    fn run_module_marks_process_started_before_running() {
        let manager = manager();
        let process = manager.spawn_batch("echo", vec![], ProcessEnv::default());
        process.close_stdin();
        manager.runtime.block_on(process.resolve());
        assert_eq!(*process.state.lock(), ProcessState::Exited);
    }

    #[test]
    fn invoke_once_resolves_through_the_shared_runtime() {
        let manager = manager();
        let handle = manager.invoke_once("echo", vec![], ProcessEnv::default());
        let code = manager.runtime.block_on(handle.resolve());
        assert_eq!(code, 0);
    }
}
