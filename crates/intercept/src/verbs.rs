//! `repr(C)` mirrors of the verbs structures the shim actually reads.
//!
//! Only `ibv_qp_init_attr` (for admission) and `ibv_mr` (for the length
//! captured before deregistration) need real layouts; everything else is
//! an opaque handle the wrappers pass through untouched.

use std::os::raw::{c_int, c_void};

use policy::QpType;

macro_rules! opaque {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {$(
        $(#[$meta])*
        #[repr(C)]
        pub struct $name {
            _private: [u8; 0],
        }
    )*};
}

opaque! {
    /// `struct ibv_context`
    IbvContext,
    /// `struct ibv_pd`
    IbvPd,
    /// `struct ibv_cq`
    IbvCq,
    /// `struct ibv_qp`
    IbvQp,
    /// `struct ibv_srq`
    IbvSrq,
    /// `struct ibv_ah`
    IbvAh,
    /// `struct ibv_comp_channel`
    IbvCompChannel,
    /// `struct ibv_srq_init_attr`
    IbvSrqInitAttr,
    /// `struct ibv_srq_attr`
    IbvSrqAttr,
    /// `struct ibv_ah_attr`
    IbvAhAttr,
}

/// `struct ibv_qp_cap`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct IbvQpCap {
    pub max_send_wr: u32,
    pub max_recv_wr: u32,
    pub max_send_sge: u32,
    pub max_recv_sge: u32,
    pub max_inline_data: u32,
}

/// `struct ibv_qp_init_attr`
#[repr(C)]
pub struct IbvQpInitAttr {
    pub qp_context: *mut c_void,
    pub send_cq: *mut IbvCq,
    pub recv_cq: *mut IbvCq,
    pub srq: *mut IbvSrq,
    pub cap: IbvQpCap,
    pub qp_type: u32,
    pub sq_sig_all: c_int,
}

/// `struct ibv_mr`
#[repr(C)]
pub struct IbvMr {
    pub context: *mut IbvContext,
    pub pd: *mut IbvPd,
    pub addr: *mut c_void,
    pub length: usize,
    pub handle: u32,
    pub lkey: u32,
    pub rkey: u32,
}

/// `enum ibv_qp_type` values the policy can gate.
pub const IBV_QPT_RC: u32 = 2;
pub const IBV_QPT_UC: u32 = 3;
pub const IBV_QPT_UD: u32 = 4;

/// Maps the provider's raw transport enum onto the policy's classes.
pub fn qp_type_from_raw(raw: u32) -> QpType {
    match raw {
        IBV_QPT_RC => QpType::Rc,
        IBV_QPT_UC => QpType::Uc,
        IBV_QPT_UD => QpType::Ud,
        _ => QpType::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn qp_init_attr_matches_the_provider_layout() {
        // Four pointers, five u32 caps, the type, the signaling flag and
        // four bytes of tail padding: 64 bytes, as in <infiniband/verbs.h>.
        assert_eq!(std::mem::size_of::<IbvQpCap>(), 20);
        assert_eq!(std::mem::size_of::<IbvQpInitAttr>(), 64);
    }

    #[test]
    fn mr_length_sits_after_three_pointers() {
        // The dereg path reads `length` through this offset.
        let base = 3 * std::mem::size_of::<*mut c_void>();
        assert_eq!(memoffset_of_length(), base);
    }

    fn memoffset_of_length() -> usize {
        let mr = IbvMr {
            context: std::ptr::null_mut(),
            pd: std::ptr::null_mut(),
            addr: std::ptr::null_mut(),
            length: 0,
            handle: 0,
            lkey: 0,
            rkey: 0,
        };
        (&mr.length as *const usize as usize) - (&mr as *const IbvMr as usize)
    }

    #[test]
    fn raw_transport_mapping() {
        assert_eq!(qp_type_from_raw(IBV_QPT_RC), QpType::Rc);
        assert_eq!(qp_type_from_raw(IBV_QPT_UC), QpType::Uc);
        assert_eq!(qp_type_from_raw(IBV_QPT_UD), QpType::Ud);
        // XRC, raw packet and driver QPs fall into the default class.
        assert_eq!(qp_type_from_raw(8), QpType::Other);
        assert_eq!(qp_type_from_raw(0xff), QpType::Other);
    }
}
