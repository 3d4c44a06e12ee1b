//! Resolution of the real verbs provider entry points.
//!
//! The provider library is opened once with the platform dynamic loader
//! and each symbol is resolved by name. A missing symbol (header-inlined
//! entry points, older providers) marks only that wrapper unsupported;
//! a missing library makes every wrapper report "function not
//! implemented". The handle is intentionally never closed: the resolved
//! function pointers stay live until process exit.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};

use log::debug;
use thiserror::Error;

use crate::verbs::*;

pub type Result<T> = std::result::Result<T, ProviderError>;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider library unavailable: {0}")]
    Unavailable(String),
}

pub type CreateQpFn = unsafe extern "C" fn(*mut IbvPd, *mut IbvQpInitAttr) -> *mut IbvQp;
pub type DestroyQpFn = unsafe extern "C" fn(*mut IbvQp) -> c_int;
pub type CreateCqFn =
    unsafe extern "C" fn(*mut IbvContext, c_int, *mut c_void, *mut IbvCompChannel, c_int) -> *mut IbvCq;
pub type DestroyCqFn = unsafe extern "C" fn(*mut IbvCq) -> c_int;
pub type AllocPdFn = unsafe extern "C" fn(*mut IbvContext) -> *mut IbvPd;
pub type DeallocPdFn = unsafe extern "C" fn(*mut IbvPd) -> c_int;
pub type RegMrFn = unsafe extern "C" fn(*mut IbvPd, *mut c_void, usize, c_int) -> *mut IbvMr;
pub type DeregMrFn = unsafe extern "C" fn(*mut IbvMr) -> c_int;
pub type CreateSrqFn = unsafe extern "C" fn(*mut IbvPd, *mut IbvSrqInitAttr) -> *mut IbvSrq;
pub type ModifySrqFn = unsafe extern "C" fn(*mut IbvSrq, *mut IbvSrqAttr, c_int) -> c_int;
pub type QuerySrqFn = unsafe extern "C" fn(*mut IbvSrq, *mut IbvSrqAttr) -> c_int;
pub type DestroySrqFn = unsafe extern "C" fn(*mut IbvSrq) -> c_int;
pub type CreateAhFn = unsafe extern "C" fn(*mut IbvPd, *mut IbvAhAttr) -> *mut IbvAh;
pub type ModifyAhFn = unsafe extern "C" fn(*mut IbvAh, *mut IbvAhAttr) -> c_int;
pub type DestroyAhFn = unsafe extern "C" fn(*mut IbvAh) -> c_int;

/// Sonames probed in order; the bare name covers hosts with only the
/// development symlink installed.
const PROVIDER_SONAMES: &[&[u8]] = &[b"libibverbs.so.1\0", b"libibverbs.so\0"];

/// The resolved provider surface. Every entry is optional; `None` means
/// the corresponding wrapper is unsupported on this host.
pub struct Provider {
    pub create_qp: Option<CreateQpFn>,
    pub destroy_qp: Option<DestroyQpFn>,
    pub create_cq: Option<CreateCqFn>,
    pub destroy_cq: Option<DestroyCqFn>,
    pub alloc_pd: Option<AllocPdFn>,
    pub dealloc_pd: Option<DeallocPdFn>,
    pub reg_mr: Option<RegMrFn>,
    pub dereg_mr: Option<DeregMrFn>,
    pub destroy_mr: Option<DeregMrFn>,
    pub create_srq: Option<CreateSrqFn>,
    pub modify_srq: Option<ModifySrqFn>,
    pub query_srq: Option<QuerySrqFn>,
    pub destroy_srq: Option<DestroySrqFn>,
    pub create_ah: Option<CreateAhFn>,
    pub modify_ah: Option<ModifyAhFn>,
    pub destroy_ah: Option<DestroyAhFn>,
}

// The handle behind the function pointers is process-global and the
// pointers themselves are plain code addresses.
unsafe impl Send for Provider {}
unsafe impl Sync for Provider {}

impl Provider {
    /// Opens the provider library and resolves the interposed surface.
    pub fn open() -> Result<Self> {
        let handle = PROVIDER_SONAMES
            .iter()
            .find_map(|soname| {
                let handle = unsafe { libc::dlopen(soname.as_ptr().cast(), libc::RTLD_LAZY) };
                if handle.is_null() {
                    None
                } else {
                    Some(handle)
                }
            })
            .ok_or_else(|| ProviderError::Unavailable(dl_error()))?;

        unsafe {
            Ok(Self {
                create_qp: symbol(handle, b"ibv_create_qp\0"),
                destroy_qp: symbol(handle, b"ibv_destroy_qp\0"),
                create_cq: symbol(handle, b"ibv_create_cq\0"),
                destroy_cq: symbol(handle, b"ibv_destroy_cq\0"),
                alloc_pd: symbol(handle, b"ibv_alloc_pd\0"),
                dealloc_pd: symbol(handle, b"ibv_dealloc_pd\0"),
                reg_mr: symbol(handle, b"ibv_reg_mr\0"),
                dereg_mr: symbol(handle, b"ibv_dereg_mr\0"),
                destroy_mr: symbol(handle, b"ibv_destroy_mr\0"),
                create_srq: symbol(handle, b"ibv_create_srq\0"),
                modify_srq: symbol(handle, b"ibv_modify_srq\0"),
                query_srq: symbol(handle, b"ibv_query_srq\0"),
                destroy_srq: symbol(handle, b"ibv_destroy_srq\0"),
                create_ah: symbol(handle, b"ibv_create_ah\0"),
                modify_ah: symbol(handle, b"ibv_modify_ah\0"),
                destroy_ah: symbol(handle, b"ibv_destroy_ah\0"),
            })
        }
    }
}

/// Resolves one symbol into a typed function pointer. `ibv_create_qp_ex`
/// and friends are header-inlined and legitimately absent; their inlined
/// bodies end up calling the resolvable entry points we do wrap.
unsafe fn symbol<T>(handle: *mut c_void, name: &'static [u8]) -> Option<T> {
    debug_assert!(name.ends_with(b"\0"));
    libc::dlerror();
    let sym = libc::dlsym(handle, name.as_ptr() as *const c_char);
    if sym.is_null() {
        let name = CStr::from_bytes_with_nul(name)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!("provider symbol {} not found, entry point unsupported", name);
        None
    } else {
        Some(std::mem::transmute_copy::<*mut c_void, T>(&sym))
    }
}

fn dl_error() -> String {
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        "unknown dlopen failure".to_owned()
    } else {
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }
}
