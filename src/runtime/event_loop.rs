//! The cooperative loop: scripts run on one thread, external work
//! completes on others and posts back here. All script-visible
//! suspension happens at awaited promises.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::mpsc;
use std::sync::Arc;

use boa_engine::builtins::promise::PromiseState;
use boa_engine::object::builtins::{JsFunction, JsPromise};
use boa_engine::{js_string, Context, JsError, JsObject, JsValue};

use super::Registry;
use crate::errors::{AppError, AppResult};
use crate::fetch::Page;

pub type SharedState = Rc<RefCell<LoopState>>;

/// Outcome of an off-thread job, or a request to run a cache producer
/// on the loop.
pub enum Completion {
    Io(u64, Result<IoPayload, String>),
    RunProducer(u64, tokio::sync::oneshot::Sender<Result<Vec<u8>, String>>),
}

pub enum IoPayload {
    Page(Page),
    Bytes(Vec<u8>),
}

/// How to turn a completed payload into the value the pending promise
/// resolves with.
pub enum PayloadKind {
    Fetch {
        response_type: String,
        encoding: String,
    },
    CacheValue,
}

pub struct PendingPromise {
    pub resolve: JsFunction,
    pub reject: JsFunction,
    pub kind: PayloadKind,
}

/// A cache producer's promise being watched for settlement; its bytes
/// go back to the waiting cache flight.
struct ProducerWait {
    promise: JsPromise,
    reply: Option<tokio::sync::oneshot::Sender<Result<Vec<u8>, String>>>,
}

pub struct LoopState {
    pub registry: Arc<Registry>,
    pub modules: HashMap<String, JsValue>,
    pub dir_stack: Vec<String>,
    pub completions: mpsc::Sender<Completion>,
    pub pending_io: usize,
    pub next_id: u64,
    pub resolvers: HashMap<u64, PendingPromise>,
    pub producers: HashMap<u64, JsObject>,
    producer_waits: Vec<ProducerWait>,
}

thread_local! {
    static CURRENT: RefCell<Option<SharedState>> = const { RefCell::new(None) };
}

impl LoopState {
    /// Creates the state for a fresh runtime and installs it in the
    /// thread-local slot native functions reach through.
    pub fn install(registry: Arc<Registry>) -> (SharedState, mpsc::Receiver<Completion>) {
        let (tx, rx) = mpsc::channel();
        let state = Rc::new(RefCell::new(LoopState {
            registry,
            modules: HashMap::new(),
            dir_stack: Vec::new(),
            completions: tx,
            pending_io: 0,
            next_id: 0,
            resolvers: HashMap::new(),
            producers: HashMap::new(),
            producer_waits: Vec::new(),
        }));
        CURRENT.with(|current| *current.borrow_mut() = Some(state.clone()));
        (state, rx)
    }

    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Clears the thread-local slot; called when the owning runtime is
/// dropped so a later runtime on the same pool thread starts clean.
pub fn uninstall() {
    CURRENT.with(|current| {
        current.borrow_mut().take();
    });
}

/// Runs `f` with the executing runtime's state. Native functions are
/// plain fn pointers, so this is how they reach host facilities.
pub fn with_state<R>(f: impl FnOnce(&mut LoopState) -> R) -> R {
    CURRENT.with(|current| {
        let state = current
            .borrow()
            .clone()
            .expect("script runtime state not installed on this thread");
        let result = f(&mut state.borrow_mut());
        result
    })
}

/// Pumps jobs and completions until `target` settles (or, with no
/// target, until no external work remains).
pub fn drive(
    context: &mut Context,
    state: &SharedState,
    completions: &mpsc::Receiver<Completion>,
    target: Option<&JsPromise>,
) -> AppResult<JsValue> {
    loop {
        context.run_jobs();

        if settle_producers(context, state) {
            continue;
        }

        if let Some(promise) = target {
            match promise.state() {
                PromiseState::Fulfilled(value) => return Ok(value),
                PromiseState::Rejected(reason) => {
                    return Err(AppError::Script(reason_message(&reason, context)))
                }
                PromiseState::Pending => {}
            }
        }

        let (pending_io, has_producer_waits) = {
            let state = state.borrow();
            (state.pending_io, !state.producer_waits.is_empty())
        };
        if pending_io == 0 && !has_producer_waits {
            return match target {
                // Nothing can ever settle it now.
                Some(_) => Err(AppError::Script(
                    "script suspended with no outstanding work".into(),
                )),
                None => Ok(JsValue::undefined()),
            };
        }

        let completion = completions
            .recv()
            .map_err(|_| AppError::Script("script loop disconnected".into()))?;
        handle_completion(completion, context, state)?;
        while let Ok(extra) = completions.try_recv() {
            handle_completion(extra, context, state)?;
        }
    }
}

fn handle_completion(
    completion: Completion,
    context: &mut Context,
    state: &SharedState,
) -> AppResult<()> {
    match completion {
        Completion::Io(id, result) => {
            let Some(pending) = state.borrow_mut().resolvers.remove(&id) else {
                return Ok(());
            };
            state.borrow_mut().pending_io -= 1;
            match result {
                Ok(payload) => match super::fetch::payload_to_value(payload, &pending.kind, context)
                {
                    Ok(value) => {
                        let _ = pending.resolve.call(&JsValue::undefined(), &[value], context);
                    }
                    Err(message) => reject_with(&pending.reject, &message, context),
                },
                Err(message) => reject_with(&pending.reject, &message, context),
            }
        }
        Completion::RunProducer(id, reply) => {
            let producer = state.borrow().producers.get(&id).cloned();
            let Some(producer) = producer else {
                let _ = reply.send(Err("unknown cache producer".into()));
                return Ok(());
            };
            match producer.call(&JsValue::undefined(), &[], context) {
                Ok(value) => {
                    if let Some(promise) = value
                        .as_object()
                        .cloned()
                        .and_then(|obj| JsPromise::from_object(obj).ok())
                    {
                        state.borrow_mut().producer_waits.push(ProducerWait {
                            promise,
                            reply: Some(reply),
                        });
                    } else {
                        let _ = reply.send(serialize_producer_value(&value, context));
                    }
                }
                Err(err) => {
                    let _ = reply.send(Err(error_message(err, context)));
                }
            }
        }
    }
    Ok(())
}

/// Checks watched producer promises; settled ones send their bytes
/// back to the cache flight. Returns true when anything settled.
fn settle_producers(context: &mut Context, state: &SharedState) -> bool {
    let mut settled_any = false;
    let mut index = 0;
    loop {
        let Some(promise_state) = ({
            let state = state.borrow();
            state.producer_waits.get(index).map(|wait| wait.promise.state())
        }) else {
            break;
        };
        match promise_state {
            PromiseState::Pending => {
                index += 1;
            }
            PromiseState::Fulfilled(value) => {
                let mut wait = state.borrow_mut().producer_waits.remove(index);
                if let Some(reply) = wait.reply.take() {
                    let _ = reply.send(serialize_producer_value(&value, context));
                }
                settled_any = true;
            }
            PromiseState::Rejected(reason) => {
                let mut wait = state.borrow_mut().producer_waits.remove(index);
                if let Some(reply) = wait.reply.take() {
                    let _ = reply.send(Err(reason_message(&reason, context)));
                }
                settled_any = true;
            }
        }
    }
    settled_any
}

/// Producer results are stored as JSON bytes; the cache treats them as
/// opaque.
fn serialize_producer_value(value: &JsValue, context: &mut Context) -> Result<Vec<u8>, String> {
    if value.is_undefined() {
        return Ok(b"null".to_vec());
    }
    let json = value.to_json(context).map_err(|err| err.to_string())?;
    serde_json::to_vec(&json).map_err(|err| err.to_string())
}

fn reject_with(reject: &JsFunction, message: &str, context: &mut Context) {
    let error: JsError = boa_engine::JsNativeError::error()
        .with_message(message.to_string())
        .into();
    let reason = error.to_opaque(context);
    let _ = reject.call(&JsValue::undefined(), &[reason], context);
}

/// A thrown value crossing out of the runtime becomes a plain error
/// message with the stack preserved when there is one.
pub fn error_message(err: JsError, context: &mut Context) -> String {
    let value = err.to_opaque(context);
    reason_message(&value, context)
}

pub fn reason_message(reason: &JsValue, context: &mut Context) -> String {
    if let Some(object) = reason.as_object() {
        if let Ok(stack) = object.get(js_string!("stack"), context) {
            if !stack.is_null_or_undefined() {
                if let Ok(stack) = stack.to_string(context) {
                    return stack.to_std_string_escaped();
                }
            }
        }
    }
    reason
        .to_string(context)
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_else(|_| "script error".to_string())
}
