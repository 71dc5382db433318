//! Scoped control of WOW64 filesystem redirection.
//!
//! A 32-bit process on a 64-bit host sees `System32` remapped to `SysWOW64`.
//! Mapping a foreign-bitness system DLL by exact path requires switching that
//! remapping off for the duration of the open and map calls, and switching it
//! back on afterwards no matter how those calls ended.

use std::io;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, error, warn};

// One redirection critical section at a time across the whole process.
static REDIRECTION_LOCK: Mutex<()> = Mutex::new(());

/// Opaque value returned by the OS when redirection was disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectionToken(pub usize);

/// The toggle itself, abstracted so callers can run without touching the OS.
pub trait RedirectionControl {
    /// Disable redirection. `Ok(None)` means redirection does not apply to
    /// this process and nothing needs reverting.
    fn disable(&self) -> io::Result<Option<RedirectionToken>>;

    /// Restore the state captured by `disable`.
    fn revert(&self, token: RedirectionToken) -> io::Result<()>;
}

/// The host's real redirection switch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRedirection;

impl RedirectionControl for SystemRedirection {
    fn disable(&self) -> io::Result<Option<RedirectionToken>> {
        sys::disable()
    }

    fn revert(&self, token: RedirectionToken) -> io::Result<()> {
        sys::revert(token)
    }
}

/// Holds redirection disabled until dropped.
pub struct RedirectionGuard<'a> {
    control: &'a dyn RedirectionControl,
    token: Option<RedirectionToken>,
    _lock: MutexGuard<'static, ()>,
}

impl<'a> RedirectionGuard<'a> {
    /// Enter the critical section and disable redirection.
    ///
    /// Failure to disable is not fatal: the guard stays inert and the caller
    /// proceeds with whatever view of the filesystem it already has.
    pub fn engage(control: &'a dyn RedirectionControl) -> Self {
        let lock = REDIRECTION_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let token = match control.disable() {
            Ok(token) => {
                debug!(active = token.is_some(), "Filesystem redirection disabled");
                token
            }
            Err(err) => {
                warn!(error = %err, "Could not disable filesystem redirection");
                None
            }
        };

        Self {
            control,
            token,
            _lock: lock,
        }
    }

    pub fn is_active(&self) -> bool {
        self.token.is_some()
    }
}

impl Drop for RedirectionGuard<'_> {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        if let Err(err) = self.control.revert(token) {
            // Every later path lookup in this process would resolve wrongly.
            error!(error = %err, "Failed to restore filesystem redirection; aborting");
            std::process::abort();
        }
        debug!("Filesystem redirection restored");
    }
}

#[cfg(windows)]
mod sys {
    use std::io;
    use std::ptr;

    use winapi::shared::minwindef::FALSE;
    use winapi::um::winnt::PVOID;
    use winapi::um::wow64apiset::{
        Wow64DisableWow64FsRedirection, Wow64RevertWow64FsRedirection,
    };

    use super::RedirectionToken;

    // Returned when the process is not running under WOW64.
    const ERROR_INVALID_FUNCTION: i32 = 1;

    pub fn disable() -> io::Result<Option<RedirectionToken>> {
        let mut old_value: PVOID = ptr::null_mut();
        // Safety: the out-pointer refers to a live local for the duration of the call.
        let ok = unsafe { Wow64DisableWow64FsRedirection(&mut old_value) };
        if ok == FALSE {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(ERROR_INVALID_FUNCTION) {
                return Ok(None);
            }
            return Err(err);
        }
        Ok(Some(RedirectionToken(old_value as usize)))
    }

    pub fn revert(token: RedirectionToken) -> io::Result<()> {
        // Safety: the value is exactly what Wow64DisableWow64FsRedirection handed out.
        let ok = unsafe { Wow64RevertWow64FsRedirection(token.0 as PVOID) };
        if ok == FALSE {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(not(windows))]
mod sys {
    use std::io;

    use super::RedirectionToken;

    pub fn disable() -> io::Result<Option<RedirectionToken>> {
        Ok(None)
    }

    pub fn revert(_token: RedirectionToken) -> io::Result<()> {
        Ok(())
    }
}
