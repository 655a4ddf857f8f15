//! Embedded V8 isolate transport.
//!
//! Programs run in a fresh isolate and context per execution, on a blocking
//! worker thread. The context exposes the shell functions fuzzing builds of
//! engine shells provide: `print`, the crash-sentinel function, `enqueueJob`
//! and `drainJobQueue`. Every isolate runs under a heap limit; reaching it
//! terminates the program instead of aborting the process.

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Once, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::convert::{self, ConvertError};
use super::{ExecutionResult, ExitStatus, Transport};
use crate::differential::{InvokeError, OracleParams, Probe, TieredFunction};
use crate::error::TransportError;
use crate::launch::LaunchDescriptor;
use crate::sentinel::{SentinelProtocol, PRINT_ACTION};
use crate::value::Value;

static INIT: Once = Once::new();
static FLAGS: OnceLock<String> = OnceLock::new();

pub const DEFAULT_HEAP_LIMIT: usize = 256 * 1024 * 1024;

/// Initialize the V8 platform once per process. Engine flags only take
/// effect on the first call; an empty string keeps whatever is active.
pub fn initialize_v8(flags: &str) {
    INIT.call_once(|| {
        let _ = FLAGS.set(flags.to_string());
        if !flags.is_empty() {
            v8::V8::set_flags_from_string(flags);
        }
        let platform = v8::new_default_platform(0, false).make_shared();
        v8::V8::initialize_platform(platform);
        v8::V8::initialize();
    });
    if let Some(active) = FLAGS.get() {
        if !flags.is_empty() && active != flags {
            tracing::warn!(active = %active, requested = %flags, "V8 already initialized, flags ignored");
        }
    }
}

// ── Host state ──────────────────────────────────────────────────────────

#[derive(Default)]
struct HostState {
    crash_action: String,
    stdout: String,
    sentinel: Option<u32>,
}

thread_local! {
    static HOST: RefCell<HostState> = RefCell::new(HostState::default());
}

fn reset_host(sentinel: &SentinelProtocol) {
    HOST.with(|host| {
        *host.borrow_mut() = HostState {
            crash_action: sentinel.action.clone(),
            ..Default::default()
        }
    });
}

fn take_host() -> HostState {
    HOST.with(|host| std::mem::take(&mut *host.borrow_mut()))
}

fn host_println(line: &str) {
    HOST.with(|host| {
        let mut host = host.borrow_mut();
        host.stdout.push_str(line);
        host.stdout.push('\n');
    });
}

// ── Host functions ──────────────────────────────────────────────────────

fn display(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> String {
    match value.to_string(scope) {
        Some(s) => s.to_rust_string_lossy(scope),
        None => String::new(),
    }
}

fn throw_type_error(scope: &mut v8::HandleScope, message: &str) {
    if let Some(message) = v8::String::new(scope, message) {
        let exception = v8::Exception::type_error(scope, message);
        scope.throw_exception(exception);
    }
}

fn print_callback(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    _rv: v8::ReturnValue,
) {
    let parts: Vec<String> = (0..args.length()).map(|i| display(scope, args.get(i))).collect();
    host_println(&parts.join(" "));
}

fn sentinel_callback(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    _rv: v8::ReturnValue,
) {
    let action = display(scope, args.get(0));
    let is_crash = HOST.with(|host| host.borrow().crash_action == action);
    if is_crash {
        let discriminant = args.get(1).int32_value(scope).unwrap_or(0).max(0) as u32;
        HOST.with(|host| host.borrow_mut().sentinel = Some(discriminant));
        scope.terminate_execution();
    } else if action == PRINT_ACTION {
        let text = display(scope, args.get(1));
        host_println(&text);
    }
}

fn enqueue_job_callback(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    _rv: v8::ReturnValue,
) {
    match v8::Local::<v8::Function>::try_from(args.get(0)) {
        Ok(job) => scope.enqueue_microtask(job),
        Err(_) => throw_type_error(scope, "enqueueJob expects a function"),
    }
}

fn drain_job_queue_callback(
    scope: &mut v8::HandleScope,
    _args: v8::FunctionCallbackArguments,
    _rv: v8::ReturnValue,
) {
    scope.perform_microtask_checkpoint();
}

fn set_global(
    scope: &mut v8::HandleScope,
    global: v8::Local<v8::Object>,
    name: &str,
    template: v8::Local<v8::FunctionTemplate>,
) -> Result<(), TransportError> {
    let function = template
        .get_function(scope)
        .ok_or_else(|| TransportError::Engine(format!("failed to instantiate '{}'", name)))?;
    let key = v8::String::new(scope, name)
        .ok_or_else(|| TransportError::Engine(format!("failed to allocate name '{}'", name)))?;
    global.set(scope, key.into(), function.into());
    Ok(())
}

fn install_host_functions(
    scope: &mut v8::HandleScope,
    context: v8::Local<v8::Context>,
    sentinel_identifier: &str,
) -> Result<(), TransportError> {
    let global = context.global(scope);
    let print = v8::FunctionTemplate::new(scope, print_callback);
    set_global(scope, global, "print", print)?;
    let sentinel = v8::FunctionTemplate::new(scope, sentinel_callback);
    set_global(scope, global, sentinel_identifier, sentinel)?;
    let enqueue = v8::FunctionTemplate::new(scope, enqueue_job_callback);
    set_global(scope, global, "enqueueJob", enqueue)?;
    let drain = v8::FunctionTemplate::new(scope, drain_job_queue_callback);
    set_global(scope, global, "drainJobQueue", drain)?;
    Ok(())
}

// ── Evaluation helpers ──────────────────────────────────────────────────

fn eval<'s>(scope: &mut v8::HandleScope<'s>, code: &str) -> Option<v8::Local<'s, v8::Value>> {
    let scope = &mut v8::EscapableHandleScope::new(scope);
    let source = v8::String::new(scope, code)?;
    let script = v8::Script::compile(scope, source, None)?;
    let result = script.run(scope)?;
    Some(scope.escape(result))
}

fn exception_message(tc: &mut v8::TryCatch<v8::HandleScope>) -> String {
    match tc.exception() {
        Some(exception) => display(tc, exception),
        None => "unknown exception".to_string(),
    }
}

/// Terminates execution on `isolate` once `timeout` elapses unless disarmed.
struct Watchdog {
    cancel: mpsc::Sender<()>,
    thread: JoinHandle<()>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    fn arm(isolate: &mut v8::Isolate, timeout: Duration) -> Self {
        let handle = isolate.thread_safe_handle();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let (cancel, rx) = mpsc::channel::<()>();
        let thread = std::thread::spawn(move || {
            if let Err(mpsc::RecvTimeoutError::Timeout) = rx.recv_timeout(timeout) {
                flag.store(true, Ordering::SeqCst);
                handle.terminate_execution();
            }
        });
        Self { cancel, thread, fired }
    }

    /// Stop the watchdog and report whether it terminated execution.
    fn disarm(self) -> bool {
        let _ = self.cancel.send(());
        let _ = self.thread.join();
        self.fired.load(Ordering::SeqCst)
    }
}

// ── Heap limit ──────────────────────────────────────────────────────────

struct HeapLimitCallbackData {
    isolate_ptr: *mut v8::Isolate,
    oom_flag: Arc<AtomicBool>,
}

unsafe extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    let cb_data = unsafe { &*(data as *const HeapLimitCallbackData) };
    cb_data.oom_flag.store(true, Ordering::SeqCst);
    let isolate = unsafe { &mut *cb_data.isolate_ptr };
    isolate.terminate_execution();
    // Headroom for the termination to unwind.
    current_heap_limit * 2
}

fn create_params(heap_limit: usize) -> v8::CreateParams {
    v8::CreateParams::default().heap_limits(0, heap_limit)
}

/// Near-heap-limit callback registration. Must be dropped after the isolate
/// it was installed on.
struct HeapLimit {
    data: *mut HeapLimitCallbackData,
    oom_flag: Arc<AtomicBool>,
}

impl HeapLimit {
    fn install(isolate: &mut v8::Isolate) -> Self {
        let oom_flag = Arc::new(AtomicBool::new(false));
        let data = Box::into_raw(Box::new(HeapLimitCallbackData {
            isolate_ptr: isolate as *mut v8::Isolate,
            oom_flag: oom_flag.clone(),
        }));
        isolate.add_near_heap_limit_callback(near_heap_limit_callback, data as *mut std::ffi::c_void);
        Self { data, oom_flag }
    }

    fn reached(&self) -> bool {
        self.oom_flag.load(Ordering::SeqCst)
    }
}

impl Drop for HeapLimit {
    fn drop(&mut self) {
        unsafe { drop(Box::from_raw(self.data)) };
    }
}

/// An isolate and its heap-limit registration. Field order drops the
/// isolate first.
struct LimitedIsolate {
    isolate: v8::OwnedIsolate,
    heap: HeapLimit,
}

fn new_isolate(heap_limit: usize) -> LimitedIsolate {
    let mut isolate = v8::Isolate::new(create_params(heap_limit));
    isolate.set_microtasks_policy(v8::MicrotasksPolicy::Explicit);
    let heap = HeapLimit::install(&mut isolate);
    LimitedIsolate { isolate, heap }
}

// ── Stateless program execution ─────────────────────────────────────────

fn run_program(
    source: &str,
    sentinel: &SentinelProtocol,
    timeout: Duration,
    heap_limit: usize,
) -> Result<ExecutionResult, TransportError> {
    reset_host(sentinel);

    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut engine = new_isolate(heap_limit);
        let watchdog = Watchdog::arm(&mut engine.isolate, timeout);

        let outcome = {
            let scope = &mut v8::HandleScope::new(&mut engine.isolate);
            let context = v8::Context::new(scope, Default::default());
            let scope = &mut v8::ContextScope::new(scope, context);
            install_host_functions(scope, context, &sentinel.identifier)?;

            let tc = &mut v8::TryCatch::new(scope);
            match eval(tc, source) {
                Some(_) => {
                    tc.perform_microtask_checkpoint();
                    Ok(())
                }
                None if tc.has_terminated() => Err(None),
                None => Err(Some(exception_message(tc))),
            }
        };

        let timed_out = watchdog.disarm();
        let out_of_memory = engine.heap.reached();
        Ok::<_, TransportError>((outcome, timed_out, out_of_memory))
    }));

    let (outcome, timed_out, out_of_memory) = match result {
        Ok(inner) => inner?,
        Err(_) => return Err(TransportError::Engine("V8 execution panicked".to_string())),
    };
    let host = take_host();

    if let Some(discriminant) = host.sentinel {
        return Ok(ExecutionResult {
            status: ExitStatus::Sentinel(discriminant),
            stdout: host.stdout,
            stderr: String::new(),
            timed_out: false,
        });
    }
    if out_of_memory {
        return Ok(ExecutionResult {
            status: ExitStatus::OutOfMemory,
            stdout: host.stdout,
            stderr: format!("heap limit of {} bytes reached\n", heap_limit),
            timed_out: false,
        });
    }
    if timed_out {
        return Ok(ExecutionResult {
            stdout: host.stdout,
            ..ExecutionResult::timed_out()
        });
    }

    let (status, stderr) = match outcome {
        Ok(()) => (ExitStatus::Exited(0), String::new()),
        Err(Some(message)) => (ExitStatus::Exited(1), format!("uncaught exception: {}\n", message)),
        Err(None) => (ExitStatus::Killed, String::new()),
    };
    Ok(ExecutionResult {
        status,
        stdout: host.stdout,
        stderr,
        timed_out: false,
    })
}

pub struct IsolateTransport {
    sentinel: SentinelProtocol,
    heap_limit: usize,
    executions: u64,
}

impl IsolateTransport {
    pub fn new(descriptor: &LaunchDescriptor, sentinel: SentinelProtocol) -> Self {
        initialize_v8(&descriptor.flag_string());
        if !descriptor.environment.is_empty() {
            tracing::debug!("launch environment has no effect on an embedded isolate");
        }
        Self {
            sentinel,
            heap_limit: DEFAULT_HEAP_LIMIT,
            executions: 0,
        }
    }

    /// Maximum V8 heap size in bytes for each execution.
    pub fn with_heap_limit(mut self, bytes: usize) -> Self {
        self.heap_limit = bytes;
        self
    }

    pub fn executions(&self) -> u64 {
        self.executions
    }
}

#[async_trait]
impl Transport for IsolateTransport {
    async fn launch(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn execute(
        &mut self,
        source: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, TransportError> {
        let source = source.to_string();
        let sentinel = self.sentinel.clone();
        let heap_limit = self.heap_limit;
        self.executions += 1;
        tokio::task::spawn_blocking(move || run_program(&source, &sentinel, timeout, heap_limit))
            .await
            .map_err(|e| TransportError::Engine(format!("isolate worker failed: {}", e)))?
    }

    async fn restart(&mut self) -> Result<(), TransportError> {
        // Every execution already starts from a fresh isolate.
        Ok(())
    }

    fn describe(&self) -> String {
        "embedded v8 isolate".to_string()
    }
}

// ── Host-driven candidate ───────────────────────────────────────────────

/// A candidate function compiled once into a long-lived isolate so that the
/// host can call it repeatedly and observe tier-up.
pub struct IsolateFunction {
    context: v8::Global<v8::Context>,
    function: v8::Global<v8::Function>,
    probes: [v8::Global<v8::Value>; 3],
    object_to_string: v8::Global<v8::Function>,
    engine: LimitedIsolate,
}

impl IsolateFunction {
    /// Compile `function <candidate>(<parameter>) { body }` in a new isolate.
    pub fn define(
        body: &str,
        params: &OracleParams,
        sentinel: &SentinelProtocol,
    ) -> Result<Self, TransportError> {
        Self::define_with_heap_limit(body, params, sentinel, DEFAULT_HEAP_LIMIT)
    }

    pub fn define_with_heap_limit(
        body: &str,
        params: &OracleParams,
        sentinel: &SentinelProtocol,
        heap_limit: usize,
    ) -> Result<Self, TransportError> {
        initialize_v8("");
        reset_host(sentinel);
        let mut engine = new_isolate(heap_limit);

        let (context, function, probes, object_to_string) = {
            let scope = &mut v8::HandleScope::new(&mut engine.isolate);
            let context = v8::Context::new(scope, Default::default());
            let scope = &mut v8::ContextScope::new(scope, context);
            install_host_functions(scope, context, &sentinel.identifier)?;

            let tc = &mut v8::TryCatch::new(scope);
            let object_to_string = eval(tc, "Object.prototype.toString")
                .and_then(|value| v8::Local::<v8::Function>::try_from(value).ok())
                .ok_or_else(|| TransportError::Engine("Object.prototype.toString is unavailable".to_string()))?;

            let source = format!(
                "(function {}({}) {{\n{}\n}})",
                params.candidate, params.parameter, body
            );
            let value = eval(tc, &source)
                .ok_or_else(|| TransportError::Engine(exception_message(tc)))?;
            let function = v8::Local::<v8::Function>::try_from(value)
                .map_err(|_| TransportError::Engine("candidate did not compile to a function".to_string()))?;

            let mut probes = Vec::with_capacity(3);
            for probe in [Probe::Truthy, Probe::Falsy, Probe::Warmup] {
                let expression = format!("({})", probe.expression(params));
                let value = eval(tc, &expression)
                    .ok_or_else(|| TransportError::Engine(exception_message(tc)))?;
                probes.push(v8::Global::new(tc, value));
            }
            let probes: [v8::Global<v8::Value>; 3] = probes
                .try_into()
                .map_err(|_| TransportError::Engine("probe evaluation failed".to_string()))?;

            (
                v8::Global::new(tc, context),
                v8::Global::new(tc, function),
                probes,
                v8::Global::new(tc, object_to_string),
            )
        };

        Ok(Self {
            context,
            function,
            probes,
            object_to_string,
            engine,
        })
    }
}

impl TieredFunction for IsolateFunction {
    fn invoke(&mut self, probe: Probe, deadline: Instant) -> Result<Value, InvokeError> {
        if self.engine.heap.reached() {
            return Err(InvokeError::OutOfMemory);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(InvokeError::TimedOut);
        }
        let slot = match probe {
            Probe::Truthy => 0,
            Probe::Falsy => 1,
            Probe::Warmup => 2,
        };

        let watchdog = Watchdog::arm(&mut self.engine.isolate, remaining);
        let result = {
            let scope = &mut v8::HandleScope::with_context(&mut self.engine.isolate, &self.context);
            let function = v8::Local::new(scope, &self.function);
            let argument = v8::Local::new(scope, &self.probes[slot]);
            let object_to_string = v8::Local::new(scope, &self.object_to_string);
            let receiver: v8::Local<v8::Value> = v8::undefined(scope).into();

            let tc = &mut v8::TryCatch::new(scope);
            match function.call(tc, receiver, &[argument]) {
                Some(value) => match convert::to_value(tc, value, object_to_string, deadline) {
                    Ok(value) => Ok(value),
                    Err(ConvertError::Deadline) => Err(InvokeError::TimedOut),
                    Err(e) => Err(InvokeError::Threw(e.to_string())),
                },
                None if tc.has_terminated() => Err(InvokeError::Engine(
                    "candidate invoked the crash sentinel".to_string(),
                )),
                None => Err(InvokeError::Threw(exception_message(tc))),
            }
        };

        let timed_out = watchdog.disarm();
        let sentinel = HOST.with(|host| host.borrow_mut().sentinel.take()).is_some();
        if timed_out || sentinel || self.engine.heap.reached() {
            self.engine.isolate.cancel_terminate_execution();
        }
        if self.engine.heap.reached() {
            return Err(InvokeError::OutOfMemory);
        }
        if timed_out {
            return Err(InvokeError::TimedOut);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> ExecutionResult {
        initialize_v8("");
        run_program(source, &SentinelProtocol::default(), Duration::from_secs(5), DEFAULT_HEAP_LIMIT).unwrap()
    }

    #[test]
    fn test_print_is_captured() {
        let result = run("print('a', 1, true); fuzzilli('FUZZILLI_PRINT', 'b');");
        assert_eq!(result.status, ExitStatus::Exited(0));
        assert_eq!(result.stdout, "a 1 true\nb\n");
    }

    #[test]
    fn test_sentinel_stops_execution() {
        let result = run("print('before'); fuzzilli('FUZZILLI_CRASH', 2); print('after');");
        assert_eq!(result.status, ExitStatus::Sentinel(2));
        assert_eq!(result.stdout, "before\n");
    }

    #[test]
    fn test_uncaught_exception_exits_nonzero() {
        let result = run("throw new RangeError('boom');");
        assert_eq!(result.status, ExitStatus::Exited(1));
        assert!(result.stderr.contains("RangeError: boom"));
    }

    #[test]
    fn test_job_queue() {
        let result = run("enqueueJob(() => print('job')); print('sync'); drainJobQueue(); print('done');");
        assert_eq!(result.stdout, "sync\njob\ndone\n");
    }

    #[test]
    fn test_infinite_loop_times_out() {
        initialize_v8("");
        let result = run_program(
            "while (true) {}",
            &SentinelProtocol::default(),
            Duration::from_millis(100),
            DEFAULT_HEAP_LIMIT,
        )
        .unwrap();
        assert!(result.timed_out);
        assert_eq!(result.status, ExitStatus::Killed);
    }

    #[test]
    fn test_heap_exhaustion_terminates_program() {
        initialize_v8("");
        let result = run_program(
            "let a = []; while (true) a.push(new Array(10000).fill(a.length));",
            &SentinelProtocol::default(),
            Duration::from_secs(10),
            32 * 1024 * 1024,
        )
        .unwrap();
        assert_eq!(result.status, ExitStatus::OutOfMemory);
        assert!(!result.timed_out);
    }
}
