//! Administrator privilege verification
//!
//! Checked once per package, right before anything is mutated, and never
//! cached: privileges revoked mid-batch are caught on the next package.
//! Every probe failure counts as "not elevated".

#[cfg(target_os = "windows")]
pub fn has_elevated_privileges() -> bool {
    use std::mem;
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::Security::{GetTokenInformation, TOKEN_ELEVATION, TOKEN_QUERY, TokenElevation};
    use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    let mut token_handle: HANDLE = HANDLE::default();

    unsafe {
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token_handle).is_err() {
            log::debug!("OpenProcessToken failed, treating process as not elevated");
            return false;
        }

        let mut elevation: TOKEN_ELEVATION = mem::zeroed();
        let mut return_length: u32 = 0;

        let queried = GetTokenInformation(
            token_handle,
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut std::ffi::c_void),
            mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut return_length,
        );

        let _ = CloseHandle(token_handle);

        queried.is_ok() && elevation.TokenIsElevated != 0
    }
}

#[cfg(unix)]
pub fn has_elevated_privileges() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(any(unix, target_os = "windows")))]
pub fn has_elevated_privileges() -> bool {
    false
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn matches_effective_uid() {
        let root = unsafe { libc::geteuid() } == 0;
        assert_eq!(has_elevated_privileges(), root);
    }
}
