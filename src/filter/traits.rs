//! The filter trait.

use super::context::FilterContext;
use super::events::{EventTarget, FilterEvent};
use crate::error::{Error, Result};
use crate::pid::PidInstance;
use crate::props::PropertyValue;

/// Outcome of a [`Filter::process`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Work was done or more work may come; the session decides when to
    /// call again.
    Ok,
    /// The filter is done: its output pids get end of stream and it is not
    /// called again until new input arrives.
    Eos,
}

/// The private state and callbacks of a filter instance.
///
/// Every callback of one instance runs on one thread at a time; different
/// filters run in parallel. Only [`process`](Self::process) is required.
///
/// # Example
///
/// ```rust,ignore
/// struct Counter {
///     pid: Option<Pid>,
///     left: u32,
/// }
///
/// impl Filter for Counter {
///     fn process(&mut self, ctx: &mut FilterContext<'_>) -> Result<ProcessStatus> {
///         let pid = match &self.pid {
///             Some(pid) => pid.clone(),
///             None => {
///                 let pid = ctx.new_pid("counter")?;
///                 pid.set_property(codes::STREAM_TYPE, stream_type::FILE)?;
///                 self.pid.insert(pid).clone()
///             }
///         };
///         if self.left == 0 {
///             return Ok(ProcessStatus::Eos);
///         }
///         let mut pck = match pid.new_alloc(4) {
///             Ok(pck) => pck,
///             Err(Error::WouldBlock) => return Ok(ProcessStatus::Ok),
///             Err(e) => return Err(e),
///         };
///         pck.data_mut().unwrap().copy_from_slice(&self.left.to_be_bytes());
///         pck.send()?;
///         self.left -= 1;
///         Ok(ProcessStatus::Ok)
///     }
/// }
/// ```
pub trait Filter: Send + 'static {
    /// Called once after construction, before any other callback.
    fn initialize(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Called once before the instance is destroyed.
    fn finalize(&mut self, ctx: &mut FilterContext<'_>) {
        let _ = ctx;
    }

    /// Accept, reconfigure or release an input.
    ///
    /// Returning [`Error::RequiresNewInstance`] asks the session to clone
    /// the filter and connect the pid to the clone instead;
    /// [`Error::NotSupported`] makes the pid look for another destination.
    fn configure_pid(&mut self, ctx: &mut FilterContext<'_>, pid: &PidInstance, is_remove: bool) -> Result<()> {
        let _ = (ctx, pid, is_remove);
        Ok(())
    }

    /// Consume input and produce output.
    fn process(&mut self, ctx: &mut FilterContext<'_>) -> Result<ProcessStatus>;

    /// Handle an event. Returning `true` cancels its propagation.
    fn process_event(&mut self, ctx: &mut FilterContext<'_>, event: &FilterEvent, target: &EventTarget) -> bool {
        let _ = (ctx, event, target);
        false
    }

    /// Apply a new value of an updatable argument.
    fn update_arg(&mut self, ctx: &mut FilterContext<'_>, name: &str, value: &PropertyValue) -> Result<()> {
        let _ = (ctx, value);
        Err(Error::NotSupported(format!("argument '{name}' cannot be updated")))
    }

    /// A filter this one feeds failed to set up. Returning `true` means the
    /// failure was handled.
    fn on_setup_error(&mut self, ctx: &mut FilterContext<'_>, failed: &str, error: &Error) -> bool {
        let _ = (ctx, failed, error);
        false
    }
}
