//! Structured exception handling without native unwinding.
//!
//! A throw never unwinds the Rust stack. It records the exception object in
//! the innermost exception frame of the current thread and returns [`Thrown`];
//! managed code propagates it outward through `Control<T>` results and `?`.
//! [`GuardedRegion`] is the try/catch/finally construct: it owns one frame,
//! dispatches to the first matching handler, always runs the finally block,
//! and hands a still-propagating exception to the enclosing frame on exit.

use sable_core::{ObjRef, TypeHandle, is_assignable_from};

use crate::errors::messages;
use crate::runtime::Runtime;

/// Marker that an exception is in flight on the current thread. The object
/// itself is reachable through the frame chain; see
/// [`Runtime::current_exception`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thrown;

/// Outcome of managed code: a value, or an exception propagating outward.
pub type Control<T> = Result<T, Thrown>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExceptionState {
    #[default]
    None,
    /// An exception is propagating toward this frame's handlers.
    Throwing,
    /// A handler of this frame is running; rethrow resumes propagation.
    Handled,
}

/// One entry in a thread's exception frame chain. Frames keep in-flight
/// exceptions reachable for the collector.
#[derive(Debug, Default)]
pub(crate) struct ExceptionFrame {
    pub(crate) in_flight: ObjRef,
    pub(crate) state: ExceptionState,
}

struct Handler<'rt, T> {
    /// `None` catches everything.
    matches: Option<TypeHandle>,
    run: Box<dyn FnOnce(&Runtime, ObjRef) -> Control<T> + 'rt>,
}

/// Builder for a guarded region. Handlers are tried in registration order;
/// a handler matches when its type is the thrown type or a base of it.
pub struct GuardedRegion<'rt, T> {
    rt: &'rt Runtime,
    body: Box<dyn FnOnce(&Runtime) -> Control<T> + 'rt>,
    handlers: Vec<Handler<'rt, T>>,
    finally_block: Option<Box<dyn FnOnce(&Runtime) + 'rt>>,
}

impl Runtime {
    pub fn guarded<'rt, T>(
        &'rt self,
        body: impl FnOnce(&Runtime) -> Control<T> + 'rt,
    ) -> GuardedRegion<'rt, T> {
        GuardedRegion {
            rt: self,
            body: Box::new(body),
            handlers: Vec::new(),
            finally_block: None,
        }
    }
}

impl<'rt, T> GuardedRegion<'rt, T> {
    pub fn catch(
        mut self,
        ty: &TypeHandle,
        handler: impl FnOnce(&Runtime, ObjRef) -> Control<T> + 'rt,
    ) -> Self {
        self.handlers.push(Handler {
            matches: Some(ty.clone()),
            run: Box::new(handler),
        });
        self
    }

    pub fn catch_all(mut self, handler: impl FnOnce(&Runtime, ObjRef) -> Control<T> + 'rt) -> Self {
        self.handlers.push(Handler {
            matches: None,
            run: Box::new(handler),
        });
        self
    }

    /// Runs after the body and any handler, whether or not an exception is
    /// still propagating. A throw inside the block supersedes the region's
    /// outcome and propagates outward.
    pub fn finally(mut self, block: impl FnOnce(&Runtime) + 'rt) -> Self {
        self.finally_block = Some(Box::new(block));
        self
    }

    pub fn run(self) -> Control<T> {
        let rt = self.rt;
        let record = rt.current_record();
        record.lock().frames.push(ExceptionFrame::default());

        let mut outcome = (self.body)(rt);

        let throwing_here = outcome.is_err() && {
            let rec = record.lock();
            rec.frames
                .last()
                .is_some_and(|f| f.state == ExceptionState::Throwing)
        };
        if throwing_here {
            let exception = {
                let rec = record.lock();
                rec.frames
                    .last()
                    .map(|f| f.in_flight)
                    .unwrap_or(ObjRef::NULL)
            };
            let thrown_ty = rt.type_of(exception);
            for handler in self.handlers {
                let hit = match &handler.matches {
                    None => true,
                    Some(want) => is_assignable_from(Some(want), thrown_ty.as_ref()),
                };
                if !hit {
                    continue;
                }
                if let Some(frame) = record.lock().frames.last_mut() {
                    frame.state = ExceptionState::Handled;
                }
                outcome = (handler.run)(rt, exception);
                if outcome.is_ok() {
                    if let Some(frame) = record.lock().frames.last_mut() {
                        frame.in_flight = ObjRef::NULL;
                        frame.state = ExceptionState::None;
                    }
                }
                break;
            }
        }

        if let Some(block) = self.finally_block {
            block(rt);
            // A throw inside the finally block starts a fresh propagation
            // that supersedes whatever the body or handler produced.
            let finally_threw = {
                let rec = record.lock();
                rec.frames
                    .last()
                    .is_some_and(|f| f.state == ExceptionState::Throwing && !f.in_flight.is_null())
            };
            if finally_threw {
                outcome = Err(Thrown);
            }
        }

        // Pop this frame. A still-propagating exception moves to the
        // enclosing frame (or the thread's pending slot) so it stays rooted.
        let propagating = {
            let mut rec = record.lock();
            let frame = rec.frames.pop().expect("guarded frame chain corrupted");
            (outcome.is_err() && !frame.in_flight.is_null()).then_some(frame.in_flight)
        };
        if let Some(exception) = propagating {
            let mut rec = record.lock();
            match rec.frames.last_mut() {
                Some(outer) => {
                    outer.in_flight = exception;
                    outer.state = ExceptionState::Throwing;
                }
                None => rec.pending = exception,
            }
        }
        outcome
    }
}

impl Runtime {
    /// Begin propagating `exception`. Throwing null raises a null-reference
    /// exception instead. The stack trace is captured here, once, at the
    /// original throw site.
    pub fn throw(&self, exception: ObjRef) -> Thrown {
        let exception = if exception.is_null() {
            self.new_exception(&self.well_known().null_reference, messages::NULL_REFERENCE)
        } else {
            exception
        };

        let trace = self.capture_call_chain();
        {
            let mut heap = self.heap.lock();
            if let Some(data) = heap.exception_data_mut(exception) {
                if data.stack_trace.is_empty() {
                    data.stack_trace = trace;
                }
            }
        }

        let record = self.current_record();
        let mut rec = record.lock();
        match rec.frames.last_mut() {
            Some(frame) => {
                frame.in_flight = exception;
                frame.state = ExceptionState::Throwing;
            }
            None => rec.pending = exception,
        }
        Thrown
    }

    /// Allocate an exception of `ty` with `message` and throw it.
    pub fn throw_new(&self, ty: &TypeHandle, message: &str) -> Thrown {
        let exception = self.new_exception(ty, message);
        self.throw(exception)
    }

    pub fn throw_null_reference(&self) -> Thrown {
        self.throw_new(&self.well_known().null_reference, messages::NULL_REFERENCE)
    }

    pub fn throw_invalid_cast(&self) -> Thrown {
        self.throw_new(&self.well_known().invalid_cast, messages::INVALID_CAST)
    }

    pub fn throw_index_out_of_range(&self) -> Thrown {
        self.throw_new(
            &self.well_known().index_out_of_range,
            messages::INDEX_OUT_OF_RANGE,
        )
    }

    /// Throws the pre-allocated out-of-memory instance. Never allocates.
    pub fn throw_out_of_memory(&self) -> Thrown {
        self.throw(self.oom_instance())
    }

    /// Resume propagation of the exception the innermost handler is holding,
    /// preserving the originally captured stack trace.
    ///
    /// # Panics
    ///
    /// Panics when called outside a handler with an exception in flight;
    /// that is a caller bug, not a managed-code condition.
    pub fn rethrow(&self) -> Thrown {
        let record = self.current_record();
        let mut rec = record.lock();
        let frame = rec
            .frames
            .last_mut()
            .expect("rethrow outside of a guarded region");
        assert!(
            frame.state == ExceptionState::Handled && !frame.in_flight.is_null(),
            "rethrow with no exception being handled"
        );
        frame.state = ExceptionState::Throwing;
        Thrown
    }

    /// The exception currently in flight or being handled on this thread,
    /// innermost frame first. Null when none.
    pub fn current_exception(&self) -> ObjRef {
        let record = self.current_record();
        let rec = record.lock();
        for frame in rec.frames.iter().rev() {
            if !frame.in_flight.is_null() {
                return frame.in_flight;
            }
        }
        rec.pending
    }

    /// Remove and return the exception that escaped every guarded region on
    /// this thread, if any.
    pub fn take_pending(&self) -> ObjRef {
        let record = self.current_record();
        let mut rec = record.lock();
        std::mem::take(&mut rec.pending)
    }

    /// Diagnostic report for an exception nothing caught.
    pub fn report_unhandled(&self, exception: ObjRef) {
        let (name, message, trace) = {
            let heap = self.heap.lock();
            let name = heap
                .type_of(exception)
                .map(|t| t.full_name.clone())
                .unwrap_or_else(|| "<unknown>".to_string());
            match heap.exception_data(exception) {
                Some(data) => (name, data.message.clone(), data.stack_trace.clone()),
                None => (name, String::new(), String::new()),
            }
        };
        eprintln!("Unhandled exception: {name}: {message}");
        if !trace.is_empty() {
            eprint!("{trace}");
        }
    }
}
