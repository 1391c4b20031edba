#![allow(non_camel_case_types)]
#![allow(clippy::missing_safety_doc)]

use std::ffi::c_void;
use std::io::Write as _;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use ember_contracts::{
    EMBER_ERR_ARENA_EXHAUSTED, EMBER_ERR_ATTR_NOT_FOUND, EMBER_ERR_BAD_ARG, EMBER_ERR_BAD_LAYOUT,
    EMBER_ERR_INTERNAL, EMBER_ERR_KIND_MISMATCH, EMBER_ERR_NOT_AN_OBJECT, EMBER_ERR_OUT_OF_BOUNDS,
    EMBER_ERR_STALE_REF, EMBER_ERR_UNKNOWN_LAYOUT, EMBER_STATUS_BAD_ARG, EMBER_STATUS_BAD_HANDLE,
    EMBER_STATUS_BAD_OUT_PTR, EMBER_STATUS_CHAN_CLOSED, EMBER_STATUS_DECODE_FAILED,
    EMBER_STATUS_INTERNAL, EMBER_STATUS_OK, EMBER_STATUS_TASK_FAILED, EMBER_STATUS_WOULD_BLOCK,
};
use ::ember_value::{ArenaError, ArenaRef, Value, ValueKind};

use crate::chan::{TryRecvError, TrySendError};
use crate::decode::{self, Format};
use crate::facade::{self, print_newline, print_value, HandleError, Runtime};
use crate::object::{parse_layout_desc_v1, ObjectError};
use crate::sched::{self, TaskError};

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ember_value {
    pub tag: u32,
    pub aux: u32, // ref generation
    pub payload: u64,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union ember_result_value_payload {
    pub ok: ember_value,
    pub err: u32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct ember_result_value {
    pub tag: u32, // 1 = ok, 0 = err
    pub payload: ember_result_value_payload,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union ember_result_i32_payload {
    pub ok: u32,  // i32 bits
    pub err: u32, // error code
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct ember_result_i32 {
    pub tag: u32, // 1 = ok, 0 = err
    pub payload: ember_result_i32_payload,
}

pub const EMBER_POLL_READY: u32 = 0;
pub const EMBER_POLL_PENDING: u32 = 1;
pub const EMBER_POLL_FAILED: u32 = 2;

#[repr(C)]
#[derive(Copy, Clone)]
pub struct ember_poll {
    pub state: u32,
    pub value: ember_value,
}

pub type ember_poll_fn = extern "C" fn(ctx: *mut c_void) -> ember_poll;

pub fn to_abi(v: Value) -> ember_value {
    let aux = match v {
        Value::Ref(r) => r.generation,
        _ => 0,
    };
    ember_value {
        tag: v.kind().tag(),
        aux,
        payload: v.to_word(),
    }
}

pub fn from_abi(v: ember_value) -> Option<Value> {
    let kind = ValueKind::from_tag(v.tag)?;
    Some(match kind {
        ValueKind::Ref => Value::Ref(ArenaRef {
            generation: v.aux,
            offset: (v.payload >> 32) as u32,
            len: v.payload as u32,
        }),
        k => Value::from_word(k, v.payload, 0),
    })
}

fn ok_value(v: Value) -> ember_result_value {
    ember_result_value {
        tag: 1,
        payload: ember_result_value_payload { ok: to_abi(v) },
    }
}

fn err_value(code: u32) -> ember_result_value {
    ember_result_value {
        tag: 0,
        payload: ember_result_value_payload { err: code },
    }
}

fn ok_i32(v: i32) -> ember_result_i32 {
    ember_result_i32 {
        tag: 1,
        payload: ember_result_i32_payload { ok: v as u32 },
    }
}

fn err_i32(code: u32) -> ember_result_i32 {
    ember_result_i32 {
        tag: 0,
        payload: ember_result_i32_payload { err: code },
    }
}

fn arena_err_code(e: &ArenaError) -> u32 {
    match e {
        ArenaError::Exhausted { .. } | ArenaError::TooLarge(_) => EMBER_ERR_ARENA_EXHAUSTED,
        ArenaError::StaleRef { .. } => EMBER_ERR_STALE_REF,
        ArenaError::OutOfBounds { .. } => EMBER_ERR_OUT_OF_BOUNDS,
    }
}

fn object_err_code(e: &ObjectError) -> u32 {
    match e {
        ObjectError::NotAnObject(_) => EMBER_ERR_NOT_AN_OBJECT,
        ObjectError::UnknownLayout(_) => EMBER_ERR_UNKNOWN_LAYOUT,
        ObjectError::AttributeNotFound { .. } => EMBER_ERR_ATTR_NOT_FOUND,
        ObjectError::KindMismatch { .. } => EMBER_ERR_KIND_MISMATCH,
        ObjectError::Arena(a) => arena_err_code(a),
    }
}

/// Running out of arena is not recoverable for generated code.
fn exhausted(e: &ObjectError) -> bool {
    matches!(
        e,
        ObjectError::Arena(ArenaError::Exhausted { .. } | ArenaError::TooLarge(_))
    )
}

fn fatal(msg: &str) -> ! {
    eprintln!("ember: fatal: {msg}");
    std::process::abort()
}

fn runtime() -> &'static Runtime {
    if let Some(rt) = facade::try_runtime() {
        return rt;
    }
    if let Err(e) = facade::runtime_init() {
        fatal(&format!("runtime init failed: {e}"));
    }
    facade::try_runtime().unwrap_or_else(|| fatal("runtime missing after init"))
}

unsafe fn bytes_as_slice<'a>(ptr: *const u8, len: usize) -> Option<&'a [u8]> {
    if len == 0 {
        return Some(&[]);
    }
    if ptr.is_null() {
        return None;
    }
    Some(std::slice::from_raw_parts(ptr, len))
}

unsafe fn write_out(out: *mut ember_value, v: Value) -> bool {
    if out.is_null() {
        return false;
    }
    out.write(to_abi(v));
    true
}

// -------------------------
// Lifecycle
// -------------------------

#[no_mangle]
pub extern "C" fn ember_runtime_init() -> u32 {
    catch_unwind(|| match facade::runtime_init() {
        Ok(created) => u32::from(created),
        Err(e) => fatal(&format!("runtime init failed: {e}")),
    })
    .unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn ember_runtime_shutdown() -> u32 {
    catch_unwind(|| u32::from(facade::runtime_shutdown())).unwrap_or(0)
}

/// Runs a generated entrypoint between init and shutdown. Task failures the
/// entrypoint never observed do not change the exit status.
#[no_mangle]
pub extern "C" fn ember_run_main(entry: Option<extern "C" fn()>) -> i32 {
    let Some(entry) = entry else {
        return EMBER_STATUS_BAD_ARG;
    };
    ember_runtime_init();
    let res = catch_unwind(|| entry());
    ember_runtime_shutdown();
    match res {
        Ok(()) => EMBER_STATUS_OK,
        Err(_) => EMBER_STATUS_INTERNAL,
    }
}

#[no_mangle]
pub extern "C" fn ember_profile_enabled() -> u32 {
    catch_unwind(|| u32::from(runtime().config().profile)).unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn ember_profile_dump() {
    let _ = catch_unwind(|| {
        let _ = runtime().dump_profile(&mut std::io::stderr().lock());
    });
}

// -------------------------
// Allocation and attributes
// -------------------------

#[no_mangle]
pub extern "C" fn ember_alloc(size: u64) -> ember_value {
    let res = catch_unwind(|| {
        let size = usize::try_from(size).unwrap_or(usize::MAX);
        runtime().alloc(size)
    });
    match res {
        Ok(Ok(v)) => to_abi(v),
        Ok(Err(e)) => fatal(&e.to_string()),
        Err(_) => fatal("panic in ember_alloc"),
    }
}

#[no_mangle]
pub unsafe extern "C" fn ember_layout_register(desc_ptr: *const u8, desc_len: usize) -> ember_result_i32 {
    catch_unwind(AssertUnwindSafe(|| {
        let Some(desc) = bytes_as_slice(desc_ptr, desc_len) else {
            return err_i32(EMBER_ERR_BAD_ARG);
        };
        match parse_layout_desc_v1(desc) {
            Ok(layout) => ok_i32(runtime().register_layout(layout) as i32),
            Err(_) => err_i32(EMBER_ERR_BAD_LAYOUT),
        }
    }))
    .unwrap_or_else(|_| err_i32(EMBER_ERR_INTERNAL))
}

#[no_mangle]
pub extern "C" fn ember_object_new(layout_id: u32) -> ember_result_value {
    match catch_unwind(|| runtime().new_object(layout_id)) {
        Ok(Ok(v)) => ok_value(v),
        Ok(Err(e)) if exhausted(&e) => fatal(&e.to_string()),
        Ok(Err(e)) => err_value(object_err_code(&e)),
        Err(_) => err_value(EMBER_ERR_INTERNAL),
    }
}

#[no_mangle]
pub unsafe extern "C" fn ember_get_attr_generic(
    obj: ember_value,
    name_ptr: *const u8,
    name_len: usize,
) -> ember_result_value {
    catch_unwind(AssertUnwindSafe(|| {
        let (Some(obj), Some(name)) = (from_abi(obj), bytes_as_slice(name_ptr, name_len)) else {
            return err_value(EMBER_ERR_BAD_ARG);
        };
        match runtime().get_attr(obj, name) {
            Ok(v) => ok_value(v),
            Err(e) => err_value(object_err_code(&e)),
        }
    }))
    .unwrap_or_else(|_| err_value(EMBER_ERR_INTERNAL))
}

#[no_mangle]
pub unsafe extern "C" fn ember_set_attr_generic(
    obj: ember_value,
    name_ptr: *const u8,
    name_len: usize,
    value: ember_value,
) -> ember_result_i32 {
    catch_unwind(AssertUnwindSafe(|| {
        let (Some(obj), Some(name), Some(value)) =
            (from_abi(obj), bytes_as_slice(name_ptr, name_len), from_abi(value))
        else {
            return err_i32(EMBER_ERR_BAD_ARG);
        };
        match runtime().set_attr(obj, name, value) {
            Ok(()) => ok_i32(0),
            Err(e) => err_i32(object_err_code(&e)),
        }
    }))
    .unwrap_or_else(|_| err_i32(EMBER_ERR_INTERNAL))
}

// -------------------------
// Scalar decoders
// -------------------------

unsafe fn parse_scalar_into(format: Format, ptr: *const u8, len: usize, out: *mut ember_value) -> i32 {
    if out.is_null() {
        return EMBER_STATUS_BAD_OUT_PTR;
    }
    let Some(buf) = bytes_as_slice(ptr, len) else {
        return EMBER_STATUS_DECODE_FAILED;
    };
    let decoded = match facade::try_runtime() {
        Some(rt) => rt.decode(format, buf),
        None => decode::decode(format, buf),
    };
    match decoded {
        Ok(d) => {
            write_out(out, d.value);
            EMBER_STATUS_OK
        }
        Err(_) => EMBER_STATUS_DECODE_FAILED,
    }
}

#[no_mangle]
pub unsafe extern "C" fn ember_json_parse_scalar(ptr: *const u8, len: usize, out: *mut ember_value) -> i32 {
    catch_unwind(AssertUnwindSafe(|| parse_scalar_into(Format::Json, ptr, len, out)))
        .unwrap_or(EMBER_STATUS_INTERNAL)
}

#[no_mangle]
pub unsafe extern "C" fn ember_msgpack_parse_scalar(
    ptr: *const u8,
    len: usize,
    out: *mut ember_value,
) -> i32 {
    catch_unwind(AssertUnwindSafe(|| parse_scalar_into(Format::MsgPack, ptr, len, out)))
        .unwrap_or(EMBER_STATUS_INTERNAL)
}

#[no_mangle]
pub unsafe extern "C" fn ember_cbor_parse_scalar(ptr: *const u8, len: usize, out: *mut ember_value) -> i32 {
    catch_unwind(AssertUnwindSafe(|| parse_scalar_into(Format::Cbor, ptr, len, out)))
        .unwrap_or(EMBER_STATUS_INTERNAL)
}

/// Returns 0 for anything that is not a well-formed integer token.
#[no_mangle]
pub unsafe extern "C" fn ember_json_parse_int(ptr: *const u8, len: usize) -> i64 {
    catch_unwind(AssertUnwindSafe(|| match bytes_as_slice(ptr, len) {
        Some(buf) => decode::json::parse_int(buf),
        None => 0,
    }))
    .unwrap_or(0)
}

// -------------------------
// Tasks
// -------------------------

struct SendCtx(*mut c_void);

// The generated program owns the context and guarantees it may be polled
// from any worker thread.
unsafe impl Send for SendCtx {}

// Pending polls yield a few times, then back off on a timer.
const POLL_SPINS: u32 = 16;
const POLL_BACKOFF_MAX: Duration = Duration::from_millis(10);

fn poll_backoff(round: u32) -> Duration {
    Duration::from_micros(50u64 << round.min(10)).min(POLL_BACKOFF_MAX)
}

async fn run_poll_fn(poll: ember_poll_fn, ctx: SendCtx) -> Result<Value, TaskError> {
    let mut pending = 0u32;
    loop {
        let r = poll(ctx.0);
        match r.state {
            EMBER_POLL_READY => {
                return from_abi(r.value)
                    .ok_or_else(|| TaskError::Failed(format!("bad value tag {}", r.value.tag)))
            }
            EMBER_POLL_PENDING => {
                pending = pending.saturating_add(1);
                if pending <= POLL_SPINS {
                    sched::yield_now().await;
                } else {
                    sched::sleep(poll_backoff(pending - POLL_SPINS)).await;
                }
            }
            _ => return Err(TaskError::Failed("poll function reported failure".into())),
        }
    }
}

#[no_mangle]
pub extern "C" fn ember_spawn(poll: Option<ember_poll_fn>, ctx: *mut c_void) -> u64 {
    let Some(poll) = poll else {
        return 0;
    };
    let ctx = SendCtx(ctx);
    catch_unwind(AssertUnwindSafe(move || runtime().spawn(run_poll_fn(poll, ctx)))).unwrap_or(0)
}

#[no_mangle]
pub unsafe extern "C" fn ember_block_on(task: u64, out: *mut ember_value) -> i32 {
    catch_unwind(AssertUnwindSafe(|| match runtime().block_on(task) {
        Ok(Ok(v)) => {
            write_out(out, v);
            EMBER_STATUS_OK
        }
        Ok(Err(_)) => EMBER_STATUS_TASK_FAILED,
        Err(_) => EMBER_STATUS_BAD_HANDLE,
    }))
    .unwrap_or(EMBER_STATUS_INTERNAL)
}

#[no_mangle]
pub extern "C" fn ember_task_is_finished(task: u64) -> u32 {
    catch_unwind(|| match runtime().task(task) {
        Ok(t) => u32::from(t.is_finished()),
        Err(_) => 0,
    })
    .unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn ember_async_sleep_ms(ms: u64) {
    let _ = catch_unwind(|| runtime().sleep_ms(ms));
}

// -------------------------
// Channels
// -------------------------

fn handle_status(e: HandleError) -> i32 {
    match e {
        HandleError::UnknownChannel(_) | HandleError::UnknownTask(_) => EMBER_STATUS_BAD_HANDLE,
    }
}

#[no_mangle]
pub extern "C" fn ember_chan_new(capacity: u64) -> u64 {
    catch_unwind(|| {
        let capacity = usize::try_from(capacity).unwrap_or(usize::MAX);
        runtime().chan_new(capacity)
    })
    .unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn ember_chan_send(ch: u64, value: ember_value) -> i32 {
    catch_unwind(|| {
        let Some(value) = from_abi(value) else {
            return EMBER_STATUS_BAD_ARG;
        };
        match runtime().chan_send(ch, value) {
            Ok(Ok(())) => EMBER_STATUS_OK,
            Ok(Err(_)) => EMBER_STATUS_CHAN_CLOSED,
            Err(e) => handle_status(e),
        }
    })
    .unwrap_or(EMBER_STATUS_INTERNAL)
}

#[no_mangle]
pub unsafe extern "C" fn ember_chan_recv(ch: u64, out: *mut ember_value) -> i32 {
    catch_unwind(AssertUnwindSafe(|| {
        if out.is_null() {
            return EMBER_STATUS_BAD_OUT_PTR;
        }
        match runtime().chan_recv(ch) {
            Ok(Ok(v)) => {
                write_out(out, v);
                EMBER_STATUS_OK
            }
            Ok(Err(_)) => EMBER_STATUS_CHAN_CLOSED,
            Err(e) => handle_status(e),
        }
    }))
    .unwrap_or(EMBER_STATUS_INTERNAL)
}

#[no_mangle]
pub extern "C" fn ember_chan_try_send(ch: u64, value: ember_value) -> i32 {
    catch_unwind(|| {
        let Some(value) = from_abi(value) else {
            return EMBER_STATUS_BAD_ARG;
        };
        match runtime().chan_try_send(ch, value) {
            Ok(Ok(())) => EMBER_STATUS_OK,
            Ok(Err(TrySendError::Full(_))) => EMBER_STATUS_WOULD_BLOCK,
            Ok(Err(TrySendError::Closed(_))) => EMBER_STATUS_CHAN_CLOSED,
            Err(e) => handle_status(e),
        }
    })
    .unwrap_or(EMBER_STATUS_INTERNAL)
}

#[no_mangle]
pub unsafe extern "C" fn ember_chan_try_recv(ch: u64, out: *mut ember_value) -> i32 {
    catch_unwind(AssertUnwindSafe(|| {
        if out.is_null() {
            return EMBER_STATUS_BAD_OUT_PTR;
        }
        match runtime().chan_try_recv(ch) {
            Ok(Ok(v)) => {
                write_out(out, v);
                EMBER_STATUS_OK
            }
            Ok(Err(TryRecvError::Empty)) => EMBER_STATUS_WOULD_BLOCK,
            Ok(Err(TryRecvError::Closed)) => EMBER_STATUS_CHAN_CLOSED,
            Err(e) => handle_status(e),
        }
    }))
    .unwrap_or(EMBER_STATUS_INTERNAL)
}

#[no_mangle]
pub extern "C" fn ember_chan_close(ch: u64) -> i32 {
    catch_unwind(|| match runtime().chan_close(ch) {
        Ok(_) => EMBER_STATUS_OK,
        Err(e) => handle_status(e),
    })
    .unwrap_or(EMBER_STATUS_INTERNAL)
}

#[no_mangle]
pub extern "C" fn ember_chan_drop(ch: u64) -> i32 {
    catch_unwind(|| match runtime().chan_drop(ch) {
        Ok(()) => EMBER_STATUS_OK,
        Err(e) => handle_status(e),
    })
    .unwrap_or(EMBER_STATUS_INTERNAL)
}

// -------------------------
// Output
// -------------------------

#[no_mangle]
pub extern "C" fn ember_print_obj(value: ember_value) {
    let _ = catch_unwind(|| {
        let mut out = std::io::stdout().lock();
        let _ = match from_abi(value) {
            Some(v) => print_value(&mut out, v),
            None => writeln!(out, "<bad value tag {}>", value.tag),
        };
    });
}

#[no_mangle]
pub extern "C" fn ember_print_newline() {
    let _ = catch_unwind(|| {
        let _ = print_newline(&mut std::io::stdout().lock());
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use crate::config::RuntimeConfig;
    use crate::object::{encode_layout_desc_v1, ObjectLayout};

    #[test]
    fn abi_values_round_trip_every_kind() {
        let r = ArenaRef {
            generation: 3,
            offset: 64,
            len: 24,
        };
        for v in [
            Value::Int(-9),
            Value::Float(0.5),
            Value::Bool(true),
            Value::None,
            Value::Ref(r),
        ] {
            let abi = to_abi(v);
            assert_eq!(abi.tag, v.kind().tag());
            assert_eq!(from_abi(abi), Some(v));
        }
        assert_eq!(to_abi(Value::Ref(r)).aux, 3);
        assert_eq!(
            from_abi(ember_value {
                tag: 99,
                aux: 0,
                payload: 0
            }),
            None
        );
    }

    #[test]
    fn parse_scalar_statuses() {
        let mut out = to_abi(Value::None);
        let buf = b"  -12 tail";
        unsafe {
            assert_eq!(
                ember_json_parse_scalar(buf.as_ptr(), buf.len(), &mut out),
                EMBER_STATUS_OK
            );
            assert_eq!(from_abi(out), Some(Value::Int(-12)));
            assert_eq!(
                ember_cbor_parse_scalar([0xf5u8].as_ptr(), 1, &mut out),
                EMBER_STATUS_OK
            );
            assert_eq!(from_abi(out), Some(Value::Bool(true)));
            assert_eq!(
                ember_msgpack_parse_scalar(std::ptr::null(), 0, &mut out),
                EMBER_STATUS_DECODE_FAILED
            );
            assert_eq!(
                ember_json_parse_scalar(buf.as_ptr(), buf.len(), std::ptr::null_mut()),
                EMBER_STATUS_BAD_OUT_PTR
            );
            assert_eq!(ember_json_parse_int(b"77".as_ptr(), 2), 77);
            assert_eq!(ember_json_parse_int(b"7.5".as_ptr(), 3), 0);
        }
    }

    #[test]
    fn layout_and_attributes_through_the_abi() {
        let layout =
            ObjectLayout::packed("Pair", &[("a", ValueKind::Int), ("b", ValueKind::Bool)]).unwrap();
        let desc = encode_layout_desc_v1(&layout);
        unsafe {
            let reg = ember_layout_register(desc.as_ptr(), desc.len());
            assert_eq!(reg.tag, 1);
            let id = reg.payload.ok;

            let bad = ember_layout_register(b"nope".as_ptr(), 4);
            assert_eq!((bad.tag, bad.payload.err), (0, EMBER_ERR_BAD_LAYOUT));

            let obj = ember_object_new(id);
            assert_eq!(obj.tag, 1);
            let obj = obj.payload.ok;

            let set = ember_set_attr_generic(obj, b"a".as_ptr(), 1, to_abi(Value::Int(5)));
            assert_eq!(set.tag, 1);
            let wrong = ember_set_attr_generic(obj, b"b".as_ptr(), 1, to_abi(Value::Int(5)));
            assert_eq!((wrong.tag, wrong.payload.err), (0, EMBER_ERR_KIND_MISMATCH));

            let got = ember_get_attr_generic(obj, b"a".as_ptr(), 1);
            assert_eq!(got.tag, 1);
            assert_eq!(from_abi(got.payload.ok), Some(Value::Int(5)));

            let missing = ember_get_attr_generic(obj, b"zz".as_ptr(), 2);
            assert_eq!((missing.tag, missing.payload.err), (0, EMBER_ERR_ATTR_NOT_FOUND));

            let not_obj = ember_get_attr_generic(to_abi(Value::Int(1)), b"a".as_ptr(), 1);
            assert_eq!((not_obj.tag, not_obj.payload.err), (0, EMBER_ERR_NOT_AN_OBJECT));
        }
    }

    struct Countdown {
        left: u32,
    }

    extern "C" fn countdown_poll(ctx: *mut c_void) -> ember_poll {
        let c = unsafe { &mut *(ctx as *mut Countdown) };
        if c.left == 0 {
            return ember_poll {
                state: EMBER_POLL_READY,
                value: to_abi(Value::Int(100)),
            };
        }
        c.left -= 1;
        ember_poll {
            state: EMBER_POLL_PENDING,
            value: to_abi(Value::None),
        }
    }

    extern "C" fn failing_poll(_ctx: *mut c_void) -> ember_poll {
        ember_poll {
            state: EMBER_POLL_FAILED,
            value: to_abi(Value::None),
        }
    }

    #[test]
    fn poll_function_tasks() {
        let mut c = Box::new(Countdown { left: 3 });
        let ctx = &mut *c as *mut Countdown as *mut c_void;
        let task = ember_spawn(Some(countdown_poll), ctx);
        assert_ne!(task, 0);
        let mut out = to_abi(Value::None);
        unsafe {
            assert_eq!(ember_block_on(task, &mut out), EMBER_STATUS_OK);
            assert_eq!(from_abi(out), Some(Value::Int(100)));
            assert_eq!(ember_block_on(task, &mut out), EMBER_STATUS_BAD_HANDLE);

            let failing = ember_spawn(Some(failing_poll), std::ptr::null_mut());
            assert_eq!(ember_block_on(failing, &mut out), EMBER_STATUS_TASK_FAILED);
        }
        assert_eq!(ember_spawn(None, std::ptr::null_mut()), 0);
    }

    static GATED_POLLS: AtomicU64 = AtomicU64::new(0);
    static GATE_OPEN: AtomicBool = AtomicBool::new(false);

    extern "C" fn gated_poll(_ctx: *mut c_void) -> ember_poll {
        GATED_POLLS.fetch_add(1, Ordering::SeqCst);
        if GATE_OPEN.load(Ordering::SeqCst) {
            return ember_poll {
                state: EMBER_POLL_READY,
                value: to_abi(Value::Int(1)),
            };
        }
        ember_poll {
            state: EMBER_POLL_PENDING,
            value: to_abi(Value::None),
        }
    }

    #[test]
    fn pending_poll_functions_back_off() {
        let task = ember_spawn(Some(gated_poll), std::ptr::null_mut());
        std::thread::sleep(Duration::from_millis(200));
        let polls = GATED_POLLS.load(Ordering::SeqCst);
        assert!(polls > 0);
        assert!(polls < 1_000, "{polls} polls in 200ms");

        GATE_OPEN.store(true, Ordering::SeqCst);
        let mut out = to_abi(Value::None);
        unsafe {
            assert_eq!(ember_block_on(task, &mut out), EMBER_STATUS_OK);
        }
        assert_eq!(from_abi(out), Some(Value::Int(1)));
    }

    #[test]
    fn backoff_grows_to_a_cap() {
        assert_eq!(poll_backoff(1), Duration::from_micros(100));
        assert!(poll_backoff(3) > poll_backoff(2));
        assert_eq!(poll_backoff(40), POLL_BACKOFF_MAX);
    }

    #[test]
    fn object_exhaustion_is_fatal_other_errors_are_not() {
        let rt = Runtime::new(RuntimeConfig {
            workers: 1,
            arena_bytes: 16,
            ..RuntimeConfig::default()
        })
        .unwrap();
        let layout = ObjectLayout::packed(
            "Wide",
            &[("a", ValueKind::Int), ("b", ValueKind::Int), ("c", ValueKind::Int)],
        )
        .unwrap();
        let id = rt.register_layout(layout);
        let err = rt.new_object(id).unwrap_err();
        assert!(exhausted(&err), "{err}");

        let unknown = rt.new_object(id + 1).unwrap_err();
        assert!(!exhausted(&unknown));
        assert_eq!(object_err_code(&unknown), EMBER_ERR_UNKNOWN_LAYOUT);
        rt.shutdown();
    }

    #[test]
    fn channel_statuses() {
        let ch = ember_chan_new(1);
        let mut out = to_abi(Value::None);
        assert_eq!(ember_chan_try_send(ch, to_abi(Value::Int(1))), EMBER_STATUS_OK);
        assert_eq!(
            ember_chan_try_send(ch, to_abi(Value::Int(2))),
            EMBER_STATUS_WOULD_BLOCK
        );
        unsafe {
            assert_eq!(ember_chan_recv(ch, &mut out), EMBER_STATUS_OK);
            assert_eq!(from_abi(out), Some(Value::Int(1)));
            assert_eq!(ember_chan_try_recv(ch, &mut out), EMBER_STATUS_WOULD_BLOCK);
            assert_eq!(ember_chan_close(ch), EMBER_STATUS_OK);
            assert_eq!(ember_chan_recv(ch, &mut out), EMBER_STATUS_CHAN_CLOSED);
            assert_eq!(ember_chan_send(ch, to_abi(Value::Int(3))), EMBER_STATUS_CHAN_CLOSED);
            assert_eq!(ember_chan_drop(ch), EMBER_STATUS_OK);
            assert_eq!(ember_chan_recv(ch, &mut out), EMBER_STATUS_BAD_HANDLE);
        }
    }
}
