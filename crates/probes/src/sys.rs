//! Thin wrappers over the `bpf(2)` syscall commands we need.
//!
//! Attribute layouts mirror the kernel's `union bpf_attr` members, which
//! start with the fields below and align every 64-bit member to 8 bytes.

use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;

const BPF_MAP_LOOKUP_ELEM: libc::c_int = 1;
const BPF_MAP_GET_NEXT_KEY: libc::c_int = 4;
const BPF_OBJ_GET: libc::c_int = 7;

#[repr(C)]
struct ObjGetAttr {
    pathname: u64,
    bpf_fd: u32,
    file_flags: u32,
}

#[repr(C)]
struct MapElemAttr {
    map_fd: u32,
    // implicit 4 bytes of padding: `key` is __aligned_u64 in the kernel
    key: u64,
    value_or_next_key: u64,
    flags: u64,
}

fn sys_bpf<T>(cmd: libc::c_int, attr: &mut T) -> io::Result<libc::c_long> {
    let ret = unsafe {
        libc::syscall(
            libc::SYS_bpf,
            cmd,
            attr as *mut T as *mut libc::c_void,
            std::mem::size_of::<T>() as libc::c_uint,
        )
    };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// `BPF_OBJ_GET`: fetch a map fd from its bpffs pin path.
pub fn obj_get(path: &str) -> io::Result<RawFd> {
    let pathname = CString::new(path)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pin path contains NUL"))?;
    let mut attr = ObjGetAttr {
        pathname: pathname.as_ptr() as u64,
        bpf_fd: 0,
        file_flags: 0,
    };
    sys_bpf(BPF_OBJ_GET, &mut attr).map(|fd| fd as RawFd)
}

/// `BPF_MAP_LOOKUP_ELEM` with a `u32` key. `Ok(false)` means the key is
/// not present; the value buffer is untouched in that case.
pub fn map_lookup<V>(fd: RawFd, key: u32, value: &mut V) -> io::Result<bool> {
    let mut attr = MapElemAttr {
        map_fd: fd as u32,
        key: &key as *const u32 as u64,
        value_or_next_key: value as *mut V as u64,
        flags: 0,
    };
    match sys_bpf(BPF_MAP_LOOKUP_ELEM, &mut attr) {
        Ok(_) => Ok(true),
        Err(err) if err.raw_os_error() == Some(libc::ENOENT) => Ok(false),
        Err(err) => Err(err),
    }
}

/// `BPF_MAP_GET_NEXT_KEY`. With `key = None` the kernel returns the first
/// key; `Ok(None)` marks the end of the map.
pub fn map_next_key(fd: RawFd, key: Option<u32>, next: &mut u32) -> io::Result<bool> {
    let current = key.unwrap_or(0);
    let mut attr = MapElemAttr {
        map_fd: fd as u32,
        key: match key {
            Some(_) => &current as *const u32 as u64,
            // A null key pointer asks for the first entry.
            None => 0,
        },
        value_or_next_key: next as *mut u32 as u64,
        flags: 0,
    };
    match sys_bpf(BPF_MAP_GET_NEXT_KEY, &mut attr) {
        Ok(_) => Ok(true),
        Err(err) if err.raw_os_error() == Some(libc::ENOENT) => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn attr_layouts_match_the_kernel_abi() {
        // Offsets are part of the syscall contract; the compiler inserts
        // the same padding the kernel's __aligned_u64 does.
        assert_eq!(size_of::<ObjGetAttr>(), 16);
        assert_eq!(size_of::<MapElemAttr>(), 32);
        assert_eq!(std::mem::align_of::<MapElemAttr>(), 8);
    }

    #[test]
    fn obj_get_on_missing_path_fails() {
        let err = obj_get("/sys/fs/bpf/definitely_not_pinned_here").unwrap_err();
        assert!(err.raw_os_error().is_some());
    }
}
