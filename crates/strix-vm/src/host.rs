//! Host contract
//!
//! The embedding supplies arguments, environment and an event wait
//! primitive. Script code asks to stop through `exit`; the request is a
//! flag the interpreter observes at calls and backward jumps, or in
//! standalone mode with a nonzero status an immediate process exit.

use crate::defaults::EVENT_SLICE;
use crate::error::{VmError, VmResult};
use crate::helpers::operators::{display_string, to_number};
use crate::interpreter::Interpreter;
use crate::options::HostMode;
use crate::value::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Services the embedding provides to an interpreter
pub trait Host: Send + Sync {
    /// Command line arguments visible to scripts
    fn args(&self) -> Vec<String>;

    /// Environment variable lookup
    fn env(&self, key: &str) -> Option<String>;

    /// Wait up to `timeout` for one event and service it. Returns true when
    /// an event was serviced.
    fn wait_for_event(&self, timeout: Duration) -> bool;
}

/// Host backed by the current process. It has no event sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessHost;

impl Host for ProcessHost {
    fn args(&self) -> Vec<String> {
        std::env::args().collect()
    }

    fn env(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn wait_for_event(&self, timeout: Duration) -> bool {
        std::thread::sleep(timeout.min(EVENT_SLICE));
        false
    }
}

/// Request a graceful stop from any thread
#[derive(Debug, Clone, Default)]
pub struct ExitHandle(Arc<AtomicBool>);

impl ExitHandle {
    /// Ask the interpreter to stop
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once a stop was requested
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear a request
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Interpreter {
    // =========================================================================
    // Exit
    // =========================================================================

    /// Ask to terminate with `status`
    ///
    /// In standalone mode a nonzero status ends the process at once.
    /// Otherwise the status is recorded and the exiting flag set.
    pub fn exit(&mut self, status: i32) {
        if self.options.mode == HostMode::Standalone && status != 0 {
            info!(status, "exiting process");
            std::process::exit(status);
        }
        debug!(id = self.id().as_u64(), status, "exit requested");
        self.exit_status = Some(status);
        self.exit.request();
    }

    /// Status passed to the last [`Self::exit`]
    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    /// Handle other threads can use to stop this interpreter
    pub fn exit_handle(&self) -> ExitHandle {
        self.exit.clone()
    }

    /// True once a stop was requested
    pub fn is_exiting(&self) -> bool {
        self.exit.is_requested()
    }

    /// Clear the exiting flag and status so the interpreter can run again
    pub fn reset_exit(&mut self) {
        self.exit_status = None;
        self.exit.reset();
    }

    /// Replace the host
    pub fn set_host(&mut self, host: Arc<dyn Host>) {
        self.host = host;
    }

    /// Current host
    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    /// Service host events until exit is requested, `timeout` passes, or
    /// with `one_event` set the first event was serviced. Returns true when
    /// at least one event was serviced.
    pub fn run_events(&mut self, timeout: Option<Duration>, one_event: bool) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut serviced = false;
        while !self.is_exiting() {
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    deadline - now
                }
                None => EVENT_SLICE,
            };
            if self.host.wait_for_event(remaining) {
                serviced = true;
                if one_event {
                    break;
                }
            }
        }
        serviced
    }

    /// Block for `delay` while still servicing events. Returns early when
    /// exit is requested.
    pub fn sleep(&mut self, delay: Duration) {
        self.run_events(Some(delay), false);
    }

    /// Service events until exit is requested
    pub fn wait_for_exit(&mut self) {
        self.run_events(None, false);
    }

    // =========================================================================
    // Script-visible functions
    // =========================================================================

    /// Define `exit`, `sleep`, `args` and `getenv` on the global object
    pub fn install_host_functions(&mut self) -> VmResult<()> {
        self.define_global_function("exit", native_exit, 1)?;
        self.define_global_function("sleep", native_sleep, 1)?;
        self.define_global_function("args", native_args, 0)?;
        self.define_global_function("getenv", native_getenv, 1)?;
        Ok(())
    }
}

fn native_exit(interp: &mut Interpreter, _this: Value, args: &[Value]) -> VmResult<Value> {
    let status = match args.first() {
        Some(value) => to_number(interp, value)?,
        None => 0.0,
    };
    interp.exit(status as i32);
    Err(VmError::Exiting)
}

/// `sleep(delay = -1)`: a missing or negative delay sleeps until exit
fn native_sleep(interp: &mut Interpreter, _this: Value, args: &[Value]) -> VmResult<Value> {
    let millis = match args.first() {
        Some(value) => to_number(interp, value)?,
        None => -1.0,
    };
    if millis.is_nan() {
        return Err(VmError::argument_error("sleep needs a numeric delay"));
    }
    if millis < 0.0 {
        interp.wait_for_exit();
    } else {
        interp.sleep(Duration::from_millis(millis as u64));
    }
    Ok(Value::Undefined)
}

fn native_args(interp: &mut Interpreter, _this: Value, _args: &[Value]) -> VmResult<Value> {
    let elements = interp
        .host
        .args()
        .iter()
        .map(|arg| Value::String(interp.intern(arg)))
        .collect();
    interp.new_array(elements)
}

fn native_getenv(interp: &mut Interpreter, _this: Value, args: &[Value]) -> VmResult<Value> {
    let Some(key) = args.first() else {
        return Err(VmError::argument_error("getenv needs a name"));
    };
    let key = display_string(interp, key)?;
    Ok(match interp.host.env(&key) {
        Some(value) => Value::String(interp.intern(&value)),
        None => Value::Null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Service;
    use crate::options::VmOptions;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct MockHost {
        events: AtomicUsize,
        waits: AtomicUsize,
        stop_after: Mutex<Option<(usize, ExitHandle)>>,
    }

    impl Host for MockHost {
        fn args(&self) -> Vec<String> {
            vec!["app".to_string(), "--fast".to_string()]
        }

        fn env(&self, key: &str) -> Option<String> {
            (key == "HOME").then(|| "/home/app".to_string())
        }

        fn wait_for_event(&self, _timeout: Duration) -> bool {
            let waits = self.waits.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((limit, handle)) = &*self.stop_after.lock() {
                if waits >= *limit {
                    handle.request();
                }
            }
            if self.events.load(Ordering::SeqCst) > 0 {
                self.events.fetch_sub(1, Ordering::SeqCst);
                return true;
            }
            false
        }
    }

    fn interp() -> Interpreter {
        Interpreter::new(Arc::new(Service::new()), VmOptions::default()).unwrap()
    }

    #[test]
    fn test_embedded_exit_sets_flag_and_status() {
        let mut interp = interp();
        assert!(!interp.is_exiting());
        interp.exit(3);
        assert!(interp.is_exiting());
        assert_eq!(interp.exit_status(), Some(3));
        interp.reset_exit();
        assert!(!interp.is_exiting());
        assert_eq!(interp.exit_status(), None);
    }

    #[test]
    fn test_run_events_stops_after_one_event() {
        let mut interp = interp();
        let host = Arc::new(MockHost::default());
        host.events.store(2, Ordering::SeqCst);
        interp.set_host(host.clone());
        assert!(interp.run_events(None, true));
        assert_eq!(host.waits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_events_observes_exit_handle() {
        let mut interp = interp();
        let host = Arc::new(MockHost::default());
        *host.stop_after.lock() = Some((3, interp.exit_handle()));
        interp.set_host(host.clone());
        assert!(!interp.run_events(None, false));
        assert_eq!(host.waits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_sleep_returns_after_deadline() {
        let mut interp = interp();
        interp.set_host(Arc::new(MockHost::default()));
        let start = Instant::now();
        interp.sleep(Duration::from_millis(5));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_sleep_without_delay_waits_for_exit() {
        let mut interp = interp();
        let host = Arc::new(MockHost::default());
        *host.stop_after.lock() = Some((4, interp.exit_handle()));
        interp.set_host(host.clone());
        interp.install_host_functions().unwrap();

        let sleep = interp.get_global("sleep").unwrap();
        let slept = interp.run_function(&sleep, Value::Undefined, &[]).unwrap();
        assert_eq!(slept, Value::Undefined);
        assert!(interp.is_exiting());
        assert_eq!(host.waits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_sleep_with_negative_delay_waits_for_exit() {
        let mut interp = interp();
        let host = Arc::new(MockHost::default());
        *host.stop_after.lock() = Some((2, interp.exit_handle()));
        interp.set_host(host.clone());
        interp.install_host_functions().unwrap();

        let sleep = interp.get_global("sleep").unwrap();
        interp.run_function(&sleep, Value::Undefined, &[Value::Number(-1.0)]).unwrap();
        assert!(interp.is_exiting());
        assert_eq!(host.waits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_script_exit_stops_execution() {
        let mut interp = interp();
        interp.install_host_functions().unwrap();
        let exit = interp.get_global("exit").unwrap();
        let outcome = interp.run_function(&exit, Value::Undefined, &[Value::Number(0.0)]);
        assert!(matches!(outcome, Err(VmError::Exiting)));
        assert_eq!(interp.exit_status(), Some(0));
        let sleep = interp.get_global("sleep").unwrap();
        assert!(matches!(
            interp.run_function(&sleep, Value::Undefined, &[]),
            Err(VmError::Exiting)
        ));
    }

    #[test]
    fn test_getenv_and_args_use_host() {
        let mut interp = interp();
        interp.set_host(Arc::new(MockHost::default()));
        interp.install_host_functions().unwrap();

        let getenv = interp.get_global("getenv").unwrap();
        let home = interp.intern("HOME");
        let found = interp.run_function(&getenv, Value::Undefined, &[Value::String(home)]).unwrap();
        assert_eq!(found.as_istr().map(|s| s.as_str()), Some("/home/app"));
        let missing = interp.intern("NOPE");
        let found = interp.run_function(&getenv, Value::Undefined, &[Value::String(missing)]).unwrap();
        assert_eq!(found, Value::Null);

        let args = interp.get_global("args").unwrap();
        let list = interp.run_function(&args, Value::Undefined, &[]).unwrap();
        let first = interp.get_property(&list, 0).unwrap();
        assert_eq!(first.as_istr().map(|s| s.as_str()), Some("app"));
    }
}
