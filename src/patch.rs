//! Binary delta reconstruction (bsdiff format).
//!
//! A patch rebuilds a module's new bytes from the bytes of its previous
//! version. The result is never trusted: callers verify it against the
//! manifest hash like any other download.

use std::panic::{self, AssertUnwindSafe};

use crate::{HotbundleError, Result};

/// Apply `patch` to `base`.
pub fn apply_patch(base: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut reader = patch;
    // The decoder slices with offsets read from the patch itself.
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        bsdiff::patch(base, &mut reader, &mut out)
    }));
    match outcome {
        Ok(Ok(())) => Ok(out),
        Ok(Err(e)) => Err(HotbundleError::Patch(format!("malformed patch: {e}"))),
        Err(_) => Err(HotbundleError::Patch(
            "malformed patch: offsets out of range".to_string(),
        )),
    }
}

/// Produce a patch that turns `base` into `target`.
pub fn create_patch(base: &[u8], target: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    bsdiff::diff(base, target, &mut out)
        .map_err(|e| HotbundleError::Patch(format!("failed to create patch: {e}")))?;
    Ok(out)
}
