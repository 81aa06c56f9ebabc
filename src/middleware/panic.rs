//! Panic details for the request-scoping middleware.
//!
//! `catch_unwind` only yields the panic payload. The hook installed here
//! records location and backtrace on the panicking thread so the middleware,
//! which catches the unwind on that same thread, can log them.
//!
//! Backtraces follow `RUST_BACKTRACE` / `RUST_LIB_BACKTRACE`: unless one of
//! them enables capture, the report carries location and message only.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::RefCell;
use std::sync::Once;

static INSTALL: Once = Once::new();

thread_local! {
    static LAST_PANIC: RefCell<Option<PanicReport>> = const { RefCell::new(None) };
}

/// What is known about a caught panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicReport {
    pub message: String,
    pub location: Option<String>,
    pub backtrace: Option<String>,
}

/// Install the recording hook once per process. The previous hook keeps
/// running after it.
pub(crate) fn install_hook() {
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let report = PanicReport {
                message: payload_message(info.payload()),
                location: info.location().map(|l| l.to_string()),
                backtrace: captured_backtrace(),
            };
            LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(report));
            previous(info);
        }));
    });
}

fn captured_backtrace() -> Option<String> {
    let backtrace = Backtrace::capture();
    match backtrace.status() {
        BacktraceStatus::Captured => Some(backtrace.to_string()),
        _ => None,
    }
}

/// Report for a payload caught on this thread.
///
/// Falls back to the bare payload message when the hook did not see this
/// panic (hook not installed, or replaced by someone else).
pub(crate) fn take_report(payload: &(dyn Any + Send)) -> PanicReport {
    let message = payload_message(payload);
    let recorded = LAST_PANIC.with(|slot| slot.borrow_mut().take());
    match recorded {
        Some(report) if report.message == message => report,
        _ => PanicReport {
            message,
            location: None,
            backtrace: None,
        },
    }
}

pub(crate) fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}
