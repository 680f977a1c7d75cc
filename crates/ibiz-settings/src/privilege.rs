/// Whether the current process runs with administrator rights.
#[cfg(unix)]
pub fn is_elevated() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Whether the current process runs with administrator rights.
#[cfg(not(unix))]
pub fn is_elevated() -> bool {
    false
}
