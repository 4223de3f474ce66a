//! Panic capture for task calls
//!
//! The panic hook runs on the panicking thread before the stack unwinds, so
//! it is the only place that sees where a task panicked. While a task future
//! is being polled a thread-local flag is set, and the hook stashes the
//! location and backtrace for the runner to collect after `catch_unwind`.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::{poll_fn, Future};
use std::panic;
use std::pin::pin;
use std::sync::Once;

use super::types::TaskFailure;

struct Captured {
    location: String,
    backtrace: String,
}

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static CAPTURED: RefCell<Option<Captured>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Chain a capturing hook in front of whatever hook is installed.
fn install_hook() {
    HOOK.call_once(|| {
        let original_hook = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                let captured = Captured {
                    location: info
                        .location()
                        .map_or_else(|| "<unknown>".to_string(), |l| {
                            format!("{}:{}:{}", l.file(), l.line(), l.column())
                        }),
                    backtrace: Backtrace::force_capture().to_string(),
                };
                CAPTURED.with(|slot| *slot.borrow_mut() = Some(captured));
            }
            original_hook(info);
        }));
    });
}

/// Restores the flag even when the poll unwinds.
struct FlagGuard(bool);

impl Drop for FlagGuard {
    fn drop(&mut self) {
        CAPTURING.with(|flag| flag.set(self.0));
    }
}

/// Poll `future` with panic capture enabled on the polling thread.
pub(super) async fn capturing<F: Future>(future: F) -> F::Output {
    install_hook();
    CAPTURED.with(|slot| slot.borrow_mut().take());

    let mut future = pin!(future);
    poll_fn(move |cx| {
        let _guard = FlagGuard(CAPTURING.with(|flag| flag.replace(true)));
        future.as_mut().poll(cx)
    })
    .await
}

/// Turn a caught panic payload into a task failure.
///
/// Must be called on the thread that caught the panic, before the next task
/// starts polling.
pub(super) fn into_failure(payload: Box<dyn Any + Send>) -> TaskFailure {
    let message = panic_message(payload.as_ref());
    match CAPTURED.with(|slot| slot.borrow_mut().take()) {
        Some(captured) => TaskFailure::panic(
            format!("task panicked at {}: {message}", captured.location),
            captured.backtrace,
        ),
        None => TaskFailure::panic(
            format!("task panicked: {message}"),
            Backtrace::force_capture().to_string(),
        ),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
