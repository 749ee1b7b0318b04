//! Best-effort OS read-ahead hint, abstracted behind a no-op default.
//!
//! The original C++ calls `posix_fadvise(fd, offset, length, POSIX_FADV_WILLNEED)`
//! both when opening a file and again each time the V2 zstd reader advances
//! to a new block. Readers built over a generic `Read + Seek` (e.g. a
//! `Cursor` in tests) have no file descriptor to advise, so the hint is
//! plumbed as an `Option<RawFd>` captured at construction time rather than
//! as a trait bound on `R`.

#[cfg(unix)]
pub type RawFdOpt = Option<std::os::unix::io::RawFd>;
#[cfg(not(unix))]
pub type RawFdOpt = Option<i32>;

#[cfg(unix)]
pub fn will_need(fd: std::os::unix::io::RawFd, offset: u64, length: u64) {
    use std::convert::TryInto;
    let offset: libc::off_t = offset.try_into().unwrap_or(libc::off_t::MAX);
    let length: libc::off_t = length.try_into().unwrap_or(libc::off_t::MAX);
    unsafe {
        libc::posix_fadvise(fd, offset, length, libc::POSIX_FADV_WILLNEED);
    }
}

#[cfg(not(unix))]
pub fn will_need(_fd: i32, _offset: u64, _length: u64) {
    // No-op on platforms without posix_fadvise.
}
