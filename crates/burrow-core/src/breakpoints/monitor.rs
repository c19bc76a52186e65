//! # Monitors
//!
//! Declarative breakpoints: describe what to capture on every hit and let the
//! engine turn it into an executable pipeline.
//!
//! A [`MonitorSpec`] is compiled once, when the monitor is armed, into a
//! [`MonitorPlan`]: a validated, ordered list of [`MonitorAction`]s plus a
//! final [`Disposition`]. On every hit the plan runs, in this order:
//!
//! 1. backend commands (`cmd`)
//! 2. register captures (`regs`)
//! 3. expression captures (`exprs`)
//! 4. return value capture (`retval`), after stepping out of the function;
//!    skipped when `force_return` is set
//! 5. backtrace (`bt`)
//! 6. forced return (`force_return`)
//! 7. resume, unless `stop` was requested
//!
//! A failing action (unreadable register, formatter error, even a panicking
//! formatter) is caught, logged at `warn` and written into the hit report;
//! the remaining actions and the resume/stop decision still run.
//!
//! ## Example
//!
//! ```rust,no_run
//! use burrow_core::{Client, MonitorSpec, ValueFormat};
//!
//! # fn demo(client: &mut Client) -> burrow_core::Result<()> {
//! let open = client.resolve("open")?;
//! let spec = MonitorSpec::new()
//!     .with_register("x0", ValueFormat::CString)
//!     .with_register("x1", ValueFormat::custom(|_, flags| Ok(format!("flags={:o}", flags.value()))))
//!     .with_return_value(ValueFormat::Hex)
//!     .with_backtrace();
//! open.monitor(client, spec)?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::str::FromStr;

use tracing::{info, warn};

use super::{BreakpointId, HitContext};
use crate::client::Client;
use crate::error::{BurrowError, Result};
use crate::symbols::Symbol;
use crate::types::{Address, Architecture, ThreadId};

/// Signature of a caller-supplied formatter: receives the client and the live
/// value and returns its rendering.
pub type FormatterFn = dyn Fn(&mut Client, Symbol) -> std::result::Result<String, Box<dyn std::error::Error>>;

/// How a captured value is rendered in a hit report.
#[derive(Clone)]
pub enum ValueFormat
{
    /// `0x…` hexadecimal (`x`).
    Hex,
    /// NUL-terminated string at the value (`s`).
    CString,
    /// The runtime's own description via `CFCopyDescription` (`cf`).
    Describe,
    /// The backend's print-object rendering (`po`).
    PrintObject,
    /// Caller-supplied formatter.
    Custom(Rc<FormatterFn>),
}

impl ValueFormat
{
    /// Wrap a closure as a formatter.
    pub fn custom<F>(formatter: F) -> Self
    where
        F: Fn(&mut Client, Symbol) -> std::result::Result<String, Box<dyn std::error::Error>> + 'static,
    {
        Self::Custom(Rc::new(formatter))
    }

    /// Render `value`.
    ///
    /// ## Errors
    ///
    /// Whatever reading or describing the value fails with; custom formatter
    /// errors and panics become `Format`.
    pub fn render(&self, client: &mut Client, value: Symbol) -> Result<String>
    {
        match self {
            Self::Hex => Ok(format!("0x{:x}", value.value())),
            Self::CString => {
                if value.value() == 0 {
                    Ok("NULL".to_string())
                } else {
                    value.peek_str(client)
                }
            }
            Self::Describe => {
                let describe = client.resolve("CFCopyDescription")?;
                let description = describe.call(client, &[value.into()])?;
                description.po(client, None)
            }
            Self::PrintObject => value.po(client, None),
            Self::Custom(formatter) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| formatter(client, value)));
                match outcome {
                    Ok(Ok(rendered)) => Ok(rendered),
                    Ok(Err(err)) => Err(BurrowError::Format(err.to_string())),
                    Err(payload) => Err(BurrowError::Format(format!("formatter panicked: {}", panic_message(&*payload)))),
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String
{
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl FromStr for ValueFormat
{
    type Err = BurrowError;

    fn from_str(s: &str) -> Result<Self>
    {
        match s.trim() {
            "x" | "hex" => Ok(Self::Hex),
            "s" | "str" | "cstring" => Ok(Self::CString),
            "cf" | "describe" => Ok(Self::Describe),
            "po" => Ok(Self::PrintObject),
            other => Err(BurrowError::InvalidArgument(format!(
                "unknown value format {other:?}; use x, s, cf or po"
            ))),
        }
    }
}

impl fmt::Debug for ValueFormat
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Hex => f.write_str("Hex"),
            Self::CString => f.write_str("CString"),
            Self::Describe => f.write_str("Describe"),
            Self::PrintObject => f.write_str("PrintObject"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Declarative description of what a monitor does on every hit.
///
/// Built fluently; fields are public so that specs can also be assembled or
/// tweaked directly (the jar does this to fill in per-member names).
#[derive(Debug, Clone, Default)]
pub struct MonitorSpec
{
    /// Registers to capture, in order.
    pub regs: Vec<(String, ValueFormat)>,
    /// Expressions to evaluate and capture, in order.
    pub exprs: Vec<(String, ValueFormat)>,
    /// Capture the return value after the function returns.
    pub retval: Option<ValueFormat>,
    /// Backend commands to run first.
    pub cmd: Vec<String>,
    /// Leave the target stopped after the hit.
    pub stop: bool,
    /// Capture a backtrace.
    pub bt: bool,
    /// Return immediately with this value.
    pub force_return: Option<u64>,
    /// Display label instead of the derived one.
    pub name: Option<String>,
    /// Replace an existing monitor at the same address.
    pub override_existing: bool,
    /// Survive bulk removal unless explicitly included.
    pub guarded: bool,
    /// Free-form description kept with the breakpoint.
    pub description: Option<String>,
}

impl MonitorSpec
{
    /// An empty spec: log the hit and resume.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Capture register `name` rendered with `format`.
    #[must_use]
    pub fn with_register(mut self, name: impl Into<String>, format: ValueFormat) -> Self
    {
        self.regs.push((name.into(), format));
        self
    }

    /// Evaluate `expression` on every hit and render the result with `format`.
    #[must_use]
    pub fn with_expression(mut self, expression: impl Into<String>, format: ValueFormat) -> Self
    {
        self.exprs.push((expression.into(), format));
        self
    }

    /// Capture the return value.
    #[must_use]
    pub fn with_return_value(mut self, format: ValueFormat) -> Self
    {
        self.retval = Some(format);
        self
    }

    /// Run a backend command on every hit.
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self
    {
        self.cmd.push(command.into());
        self
    }

    /// Leave the target stopped after each hit.
    #[must_use]
    pub fn stop_on_hit(mut self) -> Self
    {
        self.stop = true;
        self
    }

    /// Capture a backtrace on every hit.
    #[must_use]
    pub fn with_backtrace(mut self) -> Self
    {
        self.bt = true;
        self
    }

    /// Make the function return `value` without running its body.
    #[must_use]
    pub fn with_forced_return(mut self, value: u64) -> Self
    {
        self.force_return = Some(value);
        self
    }

    /// Use `name` as the display label.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self
    {
        self.name = Some(name.into());
        self
    }

    /// Replace any monitor already armed at the address.
    #[must_use]
    pub fn override_existing(mut self) -> Self
    {
        self.override_existing = true;
        self
    }

    /// Keep the monitor through bulk removal.
    #[must_use]
    pub fn guarded(mut self) -> Self
    {
        self.guarded = true;
        self
    }

    /// Attach a description.
    #[must_use]
    pub fn described(mut self, description: impl Into<String>) -> Self
    {
        self.description = Some(description.into());
        self
    }

    /// For an Objective-C method name such as `-[NSString initWithFormat:arguments:]`,
    /// add a `po` capture of every selector argument. Other names are returned
    /// unchanged.
    #[must_use]
    pub fn with_selector_arguments(mut self, method_name: &str, architecture: Architecture) -> Self
    {
        let Some(selector) = selector_of(method_name) else {
            return self;
        };
        let count = selector.matches(':').count();
        for index in 0..count {
            // Arguments 0 and 1 are self and _cmd.
            let register = architecture.argument_register(index + 2);
            let expression = format!("${}", register.trim_start_matches('$'));
            if !self.exprs.iter().any(|(existing, _)| *existing == expression) {
                self.exprs.push((expression, ValueFormat::PrintObject));
            }
        }
        self
    }
}

fn selector_of(method_name: &str) -> Option<&str>
{
    let body = method_name
        .strip_prefix("-[")
        .or_else(|| method_name.strip_prefix("+["))?
        .strip_suffix(']')?;
    let (_, selector) = body.split_once(' ')?;
    Some(selector)
}

/// One step of a compiled monitor.
#[derive(Debug, Clone)]
pub enum MonitorAction
{
    /// Run a backend command.
    Command(String),
    /// Capture a register.
    Register
    {
        /// Register name.
        name: String,
        /// Rendering.
        format: ValueFormat,
    },
    /// Evaluate and capture an expression.
    Expression
    {
        /// Expression source.
        source: String,
        /// Rendering.
        format: ValueFormat,
    },
    /// Step out of the function and capture its return value.
    ReturnValue(ValueFormat),
    /// Capture the call stack.
    Backtrace,
    /// Return immediately with the given value.
    ForceReturn(u64),
}

/// What happens to the target once all actions ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition
{
    /// Let the target continue.
    Resume,
    /// Leave the target stopped.
    Stop,
}

/// What a hit actually did to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitOutcome
{
    /// The target was resumed.
    Resumed,
    /// The target is still stopped.
    Stopped,
}

/// Validated, ordered pipeline compiled from a [`MonitorSpec`].
#[derive(Debug, Clone)]
pub struct MonitorPlan
{
    label: Option<String>,
    actions: Vec<MonitorAction>,
    disposition: Disposition,
}

impl MonitorPlan
{
    /// Validate `spec` and order its actions.
    ///
    /// ## Errors
    ///
    /// `InvalidArgument` for empty register names, expressions or commands, and
    /// for a register listed twice.
    pub fn compile(spec: &MonitorSpec) -> Result<Self>
    {
        let mut actions = Vec::new();

        for command in &spec.cmd {
            if command.trim().is_empty() {
                return Err(BurrowError::InvalidArgument("monitor command must not be empty".to_string()));
            }
            actions.push(MonitorAction::Command(command.clone()));
        }

        for (index, (name, format)) in spec.regs.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(BurrowError::InvalidArgument("register name must not be empty".to_string()));
            }
            if spec.regs[..index].iter().any(|(earlier, _)| earlier == name) {
                return Err(BurrowError::InvalidArgument(format!("register {name} listed twice")));
            }
            actions.push(MonitorAction::Register { name: name.clone(), format: format.clone() });
        }

        for (source, format) in &spec.exprs {
            if source.trim().is_empty() {
                return Err(BurrowError::InvalidArgument("monitor expression must not be empty".to_string()));
            }
            actions.push(MonitorAction::Expression { source: source.clone(), format: format.clone() });
        }

        if let Some(format) = &spec.retval {
            if spec.force_return.is_none() {
                actions.push(MonitorAction::ReturnValue(format.clone()));
            }
        }

        if spec.bt {
            actions.push(MonitorAction::Backtrace);
        }

        if let Some(value) = spec.force_return {
            actions.push(MonitorAction::ForceReturn(value));
        }

        let disposition = if spec.stop { Disposition::Stop } else { Disposition::Resume };
        Ok(Self { label: spec.name.clone(), actions, disposition })
    }

    /// Compiled actions in execution order.
    #[must_use]
    pub fn actions(&self) -> &[MonitorAction]
    {
        &self.actions
    }

    /// Final resume/stop decision.
    #[must_use]
    pub const fn disposition(&self) -> Disposition
    {
        self.disposition
    }

    /// Label configured in the spec, if any.
    #[must_use]
    pub fn label(&self) -> Option<&str>
    {
        self.label.as_deref()
    }

    /// Execute the plan for one hit.
    ///
    /// Only session-ending errors abort the pipeline; everything else is
    /// recorded in the report.
    pub(crate) fn run(&self, client: &mut Client, context: &HitContext) -> Result<HitReport>
    {
        let mut report = HitReport::new(context);
        let thread = context.thread;

        for action in &self.actions {
            let outcome = match action {
                MonitorAction::Command(command) => client.handle_command(command).map(|output| {
                    report.lines.push(format!("$ {command}"));
                    report.lines.extend(output.lines().map(str::to_string));
                }),
                MonitorAction::Register { name, format } => client
                    .read_thread_register(thread, name)
                    .and_then(|value| format.render(client, value))
                    .map(|rendered| report.lines.push(format!("{name} = {rendered}"))),
                MonitorAction::Expression { source, format } => client
                    .evaluate(source)
                    .and_then(|value| format.render(client, value))
                    .map(|rendered| report.lines.push(format!("{source} = {rendered}"))),
                MonitorAction::ReturnValue(format) => capture_return_value(client, thread, format)
                    .map(|rendered| report.lines.push(format!("returned: {rendered}"))),
                MonitorAction::Backtrace => capture_backtrace(client, thread).map(|frames| {
                    report.lines.push("backtrace:".to_string());
                    report.lines.extend(frames);
                }),
                MonitorAction::ForceReturn(value) => client
                    .force_return_thread(thread, *value)
                    .map(|()| report.lines.push(format!("forced return: 0x{value:x}"))),
            };

            if let Err(err) = outcome {
                if err.is_fatal() {
                    return Err(err);
                }
                report.record_failure(action_name(action), &err);
            }
        }

        report.outcome = match self.disposition {
            Disposition::Stop => HitOutcome::Stopped,
            Disposition::Resume => match client.resume() {
                Ok(()) => HitOutcome::Resumed,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    report.record_failure("resume", &err);
                    HitOutcome::Stopped
                }
            },
        };

        info!("{report}");
        Ok(report)
    }
}

fn capture_return_value(client: &mut Client, thread: ThreadId, format: &ValueFormat) -> Result<String>
{
    client.step_out_thread(thread)?;
    let register = client.architecture().return_register();
    let value = client.read_thread_register(thread, register)?;
    format.render(client, value)
}

fn capture_backtrace(client: &mut Client, thread: ThreadId) -> Result<Vec<String>>
{
    let frames = client.backtrace_thread(thread)?;
    Ok(frames
        .iter()
        .map(|frame| {
            let file_address = client.file_address(frame.pc).ok();
            let function = frame.function.as_deref().unwrap_or("???");
            match file_address {
                Some(static_address) if static_address != frame.pc => {
                    format!("#{} {} ({}) {function}", frame.index, frame.pc, static_address)
                }
                _ => format!("#{} {} {function}", frame.index, frame.pc),
            }
        })
        .collect())
}

fn action_name(action: &MonitorAction) -> String
{
    match action {
        MonitorAction::Command(command) => format!("$ {command}"),
        MonitorAction::Register { name, .. } => name.clone(),
        MonitorAction::Expression { source, .. } => source.clone(),
        MonitorAction::ReturnValue(_) => "returned".to_string(),
        MonitorAction::Backtrace => "backtrace".to_string(),
        MonitorAction::ForceReturn(_) => "forced return".to_string(),
    }
}

/// Everything one breakpoint hit produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitReport
{
    /// Breakpoint that fired.
    pub breakpoint: BreakpointId,
    /// Its address.
    pub address: Address,
    /// Thread that hit it.
    pub thread: ThreadId,
    /// Display label.
    pub label: String,
    /// Hit count including this hit.
    pub hit_count: u64,
    /// Rendered captures, in pipeline order.
    pub lines: Vec<String>,
    /// Caught failures, also present in `lines`.
    pub failures: Vec<String>,
    /// Whether the target was resumed.
    pub outcome: HitOutcome,
}

impl HitReport
{
    pub(crate) fn new(context: &HitContext) -> Self
    {
        Self {
            breakpoint: context.breakpoint,
            address: context.address,
            thread: context.thread,
            label: context.label.clone(),
            hit_count: context.hit_count,
            lines: Vec::new(),
            failures: Vec::new(),
            outcome: HitOutcome::Stopped,
        }
    }

    pub(crate) fn record_failure(&mut self, what: impl Into<String>, err: &BurrowError)
    {
        let what = what.into();
        warn!("#{} {}: {what} failed: {err}", self.breakpoint, self.label);
        self.lines.push(format!("{what} = <error: {err}>"));
        self.failures.push(format!("{what}: {err}"));
    }

    /// Whether any action failed.
    #[must_use]
    pub fn has_failures(&self) -> bool
    {
        !self.failures.is_empty()
    }
}

impl fmt::Display for HitReport
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "#{} {} {} - thread {}", self.breakpoint, self.address, self.label, self.thread)?;
        for line in &self.lines {
            write!(f, "\n\t{line}")?;
        }
        Ok(())
    }
}
