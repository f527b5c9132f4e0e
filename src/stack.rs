//! Stack capture behind the `save-stack` flag on `captureFieldWrite`.
//!
//! A real Java agent walks the call stack by throwing and immediately
//! catching an exception; the equivalent here is native unwinding. Capture
//! is behind a trait so tests and the demo binary can supply deterministic
//! frames instead of depending on whatever the optimizer left of the real
//! call stack.

use backtrace::Backtrace;

/// One frame of a captured stack: `(class-name, method-name, line-number)`.
/// `line_number` is `-1` when the symbolizer could not recover one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackFrame {
    pub class_name: String,
    pub method_name: String,
    pub line_number: i32,
}

impl StackFrame {
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>, line_number: i32) -> Self {
        StackFrame {
            class_name: class_name.into(),
            method_name: method_name.into(),
            line_number,
        }
    }
}

/// Captures the current thread's call stack, innermost frame first.
/// Implementations must exclude frames belonging to the agent's own code:
/// no frame's class name should begin with the agent package prefix.
pub trait StackCapture: Send + Sync {
    fn capture(&self) -> Vec<StackFrame>;
}

/// Captures the real native call stack via `backtrace::Backtrace`, splits
/// each symbol's mangled name into a class-like and method-like half, and
/// drops frames under `agent_package_prefix`.
pub struct NativeStackCapture {
    agent_package_prefix: String,
}

impl NativeStackCapture {
    pub fn new(agent_package_prefix: impl Into<String>) -> Self {
        NativeStackCapture {
            agent_package_prefix: agent_package_prefix.into(),
        }
    }
}

impl Default for NativeStackCapture {
    fn default() -> Self {
        NativeStackCapture::new("fieldwatch::")
    }
}

impl StackCapture for NativeStackCapture {
    fn capture(&self) -> Vec<StackFrame> {
        let backtrace = Backtrace::new();
        let mut frames = Vec::new();
        for frame in backtrace.frames() {
            for symbol in frame.symbols() {
                let raw_name = match symbol.name() {
                    Some(name) => name.to_string(),
                    None => continue,
                };
                let (class_name, method_name) = split_symbol(&raw_name);
                if class_name.starts_with(&self.agent_package_prefix) {
                    continue;
                }
                let line_number = symbol.lineno().map(|l| l as i32).unwrap_or(-1);
                frames.push(StackFrame::new(class_name, method_name, line_number));
            }
        }
        frames
    }
}

/// Splits a mangled-demangled symbol like `some::module::Type::method` into
/// its leading path (treated as the "class name") and trailing segment
/// (the "method name"). A symbol with no `::` is reported with an empty
/// class name.
fn split_symbol(raw: &str) -> (String, String) {
    match raw.rfind("::") {
        Some(idx) => (raw[..idx].to_owned(), raw[idx + 2..].to_owned()),
        None => (String::new(), raw.to_owned()),
    }
}

/// A fixed, pre-recorded stack, used by tests and by
/// `Agent::emulate_field_watchpoint`'s demo callers so scenarios are
/// reproducible without depending on the optimizer's inlining decisions.
#[derive(Clone, Default)]
pub struct SyntheticStackCapture {
    frames: Vec<StackFrame>,
}

impl SyntheticStackCapture {
    pub fn new(frames: Vec<StackFrame>) -> Self {
        SyntheticStackCapture { frames }
    }
}

impl StackCapture for SyntheticStackCapture {
    fn capture(&self) -> Vec<StackFrame> {
        self.frames.clone()
    }
}
