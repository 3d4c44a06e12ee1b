//! The exported verbs entry points.
//!
//! Every wrapper follows the same three-phase shape: resolve the real
//! provider function (first call triggers the one-shot context init),
//! decide admission if the operation is gated, dispatch, then account on
//! success. Wrappers never call back into an intercepted entry point
//! (logging and shared-region traffic stay off the verbs surface), and a
//! provider error leaves every counter untouched with errno preserved.

use std::io;
use std::os::raw::{c_int, c_void};
use std::ptr;

use log::{debug, error, info};

use crate::admission;
use crate::context::{context, provider};
use crate::verbs::*;

fn errno() -> c_int {
    unsafe { *libc::__errno_location() }
}

fn set_errno(code: c_int) {
    unsafe {
        *libc::__errno_location() = code;
    }
}

fn os_error(code: c_int) -> io::Error {
    io::Error::from_raw_os_error(code)
}

/// # Safety
///
/// Called through the C ABI with pointers owned by the provider and the
/// application; the wrapper only reads `qp_init_attr` and passes both
/// pointers through.
#[no_mangle]
pub unsafe extern "C" fn ibv_create_qp(
    pd: *mut IbvPd,
    qp_init_attr: *mut IbvQpInitAttr,
) -> *mut IbvQp {
    let real = match provider().and_then(|p| p.create_qp) {
        Some(real) => real,
        None => {
            set_errno(libc::ENOSYS);
            return ptr::null_mut();
        }
    };
    let ctx = match context() {
        Some(ctx) => ctx,
        None => return real(pd, qp_init_attr),
    };
    if qp_init_attr.is_null() {
        // Nothing to admit against; let the provider produce its own error.
        return real(pd, qp_init_attr);
    }

    debug!("intercepting ibv_create_qp: pd={:p}", pd);
    let attr = &*qp_init_attr;
    let qp_type = qp_type_from_raw(attr.qp_type);

    let (proc_usage, source) = ctx.process_usage();
    let global = ctx.global_view();
    let local_qp = ctx.accountant().snapshot().qp_count;
    let decision = {
        let mut limiter = ctx.limiter().lock().expect("limiter mutex");
        admission::check_create_qp(
            ctx.policy(),
            qp_type,
            attr.cap.max_send_wr,
            attr.cap.max_recv_wr,
            proc_usage,
            local_qp,
            &mut limiter,
            global,
        )
    };
    if let Err(reason) = decision {
        error!("QP creation denied: {} (counters from {:?})", reason, source);
        set_errno(libc::EPERM);
        return ptr::null_mut();
    }

    let qp = real(pd, qp_init_attr);
    if qp.is_null() {
        let code = errno();
        error!("provider failed to create QP: {}", os_error(code));
        set_errno(code);
        return qp;
    }

    if ctx.policy().log_qp_creation() {
        info!(
            "QP created: qp={:p} type={} send_wr={} recv_wr={} send_sge={} recv_sge={} inline={}",
            qp,
            qp_type,
            attr.cap.max_send_wr,
            attr.cap.max_recv_wr,
            attr.cap.max_send_sge,
            attr.cap.max_recv_sge,
            attr.cap.max_inline_data
        );
    }

    let snapshot = ctx.accountant().qp_created();
    ctx.push_process_usage(snapshot);
    debug!("local QP count now {}", snapshot.qp_count);

    qp
}

/// # Safety
///
/// Called through the C ABI; `qp` is owned by the caller and only passed
/// through.
#[no_mangle]
pub unsafe extern "C" fn ibv_destroy_qp(qp: *mut IbvQp) -> c_int {
    let real = match provider().and_then(|p| p.destroy_qp) {
        Some(real) => real,
        None => {
            set_errno(libc::ENOSYS);
            return -1;
        }
    };
    let ctx = match context() {
        Some(ctx) => ctx,
        None => return real(qp),
    };

    debug!("intercepting ibv_destroy_qp: qp={:p}", qp);
    let ret = real(qp);
    if ret != 0 {
        let code = errno();
        error!("provider failed to destroy QP: {}", os_error(code));
        set_errno(code);
        return ret;
    }

    let snapshot = ctx.accountant().qp_destroyed();
    ctx.push_process_usage(snapshot);
    if ctx.policy().log_all_operations() {
        info!("QP destroyed: qp={:p} (local count {})", qp, snapshot.qp_count);
    }

    ret
}

/// # Safety
///
/// Called through the C ABI. The registered range `addr..addr+length`
/// belongs to the application; the wrapper never dereferences it.
#[no_mangle]
pub unsafe extern "C" fn ibv_reg_mr(
    pd: *mut IbvPd,
    addr: *mut c_void,
    length: usize,
    access: c_int,
) -> *mut IbvMr {
    let real = match provider().and_then(|p| p.reg_mr) {
        Some(real) => real,
        None => {
            set_errno(libc::ENOSYS);
            return ptr::null_mut();
        }
    };
    let ctx = match context() {
        Some(ctx) => ctx,
        None => return real(pd, addr, length, access),
    };

    debug!(
        "intercepting ibv_reg_mr: pd={:p} addr={:p} length={}",
        pd, addr, length
    );

    let (proc_usage, source) = ctx.process_usage();
    let global = ctx.global_view();
    if let Err(reason) = admission::check_reg_mr(ctx.policy(), length as u64, proc_usage, global) {
        error!("MR registration denied: {} (counters from {:?})", reason, source);
        set_errno(libc::EPERM);
        return ptr::null_mut();
    }

    let mr = real(pd, addr, length, access);
    if mr.is_null() {
        let code = errno();
        error!("provider failed to register MR: {}", os_error(code));
        set_errno(code);
        return mr;
    }

    let snapshot = ctx.accountant().mr_registered(length as u64);
    ctx.push_process_usage(snapshot);
    if ctx.policy().log_all_operations() {
        info!(
            "MR registered: mr={:p} length={} (local count {}, bytes {})",
            mr, length, snapshot.mr_count, snapshot.memory_used
        );
    }

    mr
}

unsafe fn release_mr(
    real: crate::provider::DeregMrFn,
    mr: *mut IbvMr,
    what: &str,
) -> c_int {
    let ctx = match context() {
        Some(ctx) => ctx,
        None => return real(mr),
    };

    debug!("intercepting {}: mr={:p}", what, mr);
    // The provider frees the struct; the declared length has to be read
    // before dispatch.
    let length = if mr.is_null() { 0 } else { (*mr).length as u64 };

    let ret = real(mr);
    if ret != 0 {
        let code = errno();
        error!("provider failed in {}: {}", what, os_error(code));
        set_errno(code);
        return ret;
    }

    let snapshot = ctx.accountant().mr_deregistered(length);
    ctx.push_process_usage(snapshot);
    if ctx.policy().log_all_operations() {
        info!(
            "{} done: mr={:p} length={} (local count {}, bytes {})",
            what, mr, length, snapshot.mr_count, snapshot.memory_used
        );
    }

    ret
}

/// # Safety
///
/// Called through the C ABI; reads `mr.length` before handing the struct
/// to the provider for destruction.
#[no_mangle]
pub unsafe extern "C" fn ibv_dereg_mr(mr: *mut IbvMr) -> c_int {
    match provider().and_then(|p| p.dereg_mr) {
        Some(real) => release_mr(real, mr, "ibv_dereg_mr"),
        None => {
            set_errno(libc::ENOSYS);
            -1
        }
    }
}

/// # Safety
///
/// Called through the C ABI; reads `mr.length` before handing the struct
/// to the provider for destruction.
#[no_mangle]
pub unsafe extern "C" fn ibv_destroy_mr(mr: *mut IbvMr) -> c_int {
    match provider().and_then(|p| p.destroy_mr) {
        Some(real) => release_mr(real, mr, "ibv_destroy_mr"),
        None => {
            set_errno(libc::ENOSYS);
            -1
        }
    }
}

/// Wrappers that only log: no admission, no accounting, straight
/// dispatch with errno preserved on failure.
macro_rules! passthrough_ptr {
    ($(fn $name:ident($($arg:ident: $ty:ty),*) -> $ret:ty, via $field:ident;)*) => {$(
        /// # Safety
        ///
        /// Called through the C ABI; all pointers are passed through to
        /// the provider untouched.
        #[no_mangle]
        pub unsafe extern "C" fn $name($($arg: $ty),*) -> $ret {
            let real = match provider().and_then(|p| p.$field) {
                Some(real) => real,
                None => {
                    set_errno(libc::ENOSYS);
                    return ptr::null_mut();
                }
            };
            let ctx = match context() {
                Some(ctx) => ctx,
                None => return real($($arg),*),
            };

            debug!("intercepting {}", stringify!($name));
            let out = real($($arg),*);
            if out.is_null() {
                let code = errno();
                error!("provider failed in {}: {}", stringify!($name), os_error(code));
                set_errno(code);
            } else if ctx.policy().log_all_operations() {
                info!("{} succeeded: {:p}", stringify!($name), out);
            }
            out
        }
    )*};
}

macro_rules! passthrough_int {
    ($(fn $name:ident($($arg:ident: $ty:ty),*), via $field:ident;)*) => {$(
        /// # Safety
        ///
        /// Called through the C ABI; all pointers are passed through to
        /// the provider untouched.
        #[no_mangle]
        pub unsafe extern "C" fn $name($($arg: $ty),*) -> c_int {
            let real = match provider().and_then(|p| p.$field) {
                Some(real) => real,
                None => {
                    set_errno(libc::ENOSYS);
                    return -1;
                }
            };
            let ctx = match context() {
                Some(ctx) => ctx,
                None => return real($($arg),*),
            };

            debug!("intercepting {}", stringify!($name));
            let ret = real($($arg),*);
            if ret != 0 {
                let code = errno();
                error!("provider failed in {}: {}", stringify!($name), os_error(code));
                set_errno(code);
            } else if ctx.policy().log_all_operations() {
                info!("{} succeeded", stringify!($name));
            }
            ret
        }
    )*};
}

passthrough_ptr! {
    fn ibv_create_cq(
        context_arg: *mut IbvContext,
        cqe: c_int,
        cq_context: *mut c_void,
        channel: *mut IbvCompChannel,
        comp_vector: c_int
    ) -> *mut IbvCq, via create_cq;
    fn ibv_alloc_pd(context_arg: *mut IbvContext) -> *mut IbvPd, via alloc_pd;
    fn ibv_create_srq(pd: *mut IbvPd, srq_init_attr: *mut IbvSrqInitAttr) -> *mut IbvSrq, via create_srq;
    fn ibv_create_ah(pd: *mut IbvPd, attr: *mut IbvAhAttr) -> *mut IbvAh, via create_ah;
}

passthrough_int! {
    fn ibv_destroy_cq(cq: *mut IbvCq), via destroy_cq;
    fn ibv_dealloc_pd(pd: *mut IbvPd), via dealloc_pd;
    fn ibv_modify_srq(srq: *mut IbvSrq, attr: *mut IbvSrqAttr, attr_mask: c_int), via modify_srq;
    fn ibv_query_srq(srq: *mut IbvSrq, attr: *mut IbvSrqAttr), via query_srq;
    fn ibv_destroy_srq(srq: *mut IbvSrq), via destroy_srq;
    fn ibv_modify_ah(ah: *mut IbvAh, attr: *mut IbvAhAttr), via modify_ah;
    fn ibv_destroy_ah(ah: *mut IbvAh), via destroy_ah;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_roundtrip() {
        set_errno(libc::EPERM);
        assert_eq!(errno(), libc::EPERM);
        set_errno(0);
        assert_eq!(errno(), 0);
    }
}
