// Job support: cancellation registry and progress reporting

pub mod progress;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Global registry of cancel flags keyed by job_id string.
/// When a cancel is requested, the corresponding AtomicBool is set to true.
/// Scans check this flag between records.
static CANCEL_FLAGS: std::sync::LazyLock<Mutex<HashMap<String, Arc<AtomicBool>>>> =
    std::sync::LazyLock::new(|| Mutex::new(HashMap::new()));

fn flags() -> MutexGuard<'static, HashMap<String, Arc<AtomicBool>>> {
    // A panic while holding the lock leaves the map itself intact
    CANCEL_FLAGS.lock().unwrap_or_else(|e| e.into_inner())
}

/// Register a cancel flag for a job. Returns the flag for the scan to check.
pub fn register_cancel_flag(job_id: &str) -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    flags().insert(job_id.to_string(), Arc::clone(&flag));
    flag
}

/// Request cancellation of a job.
pub fn request_cancel(job_id: &str) -> bool {
    if let Some(flag) = flags().get(job_id) {
        flag.store(true, Ordering::Relaxed);
        true
    } else {
        false
    }
}

/// Remove a cancel flag after a job finishes.
pub fn remove_cancel_flag(job_id: &str) {
    flags().remove(job_id);
}

/// Check if a job has been cancelled.
pub fn is_cancelled(flag: &AtomicBool) -> bool {
    flag.load(Ordering::Relaxed)
}

/// Checks an optional flag; None is never cancelled.
pub fn cancel_requested(flag: Option<&AtomicBool>) -> bool {
    flag.map(is_cancelled).unwrap_or(false)
}

/// Registers a flag for the guard's lifetime and removes it on drop.
pub struct CancelRegistration {
    job_id: String,
    flag: Arc<AtomicBool>,
}

impl CancelRegistration {
    pub fn new(job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        let flag = register_cancel_flag(&job_id);
        Self { job_id, flag }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn flag(&self) -> &AtomicBool {
        &self.flag
    }
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        remove_cancel_flag(&self.job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_reaches_registered_flag() {
        let reg = CancelRegistration::new("test-cancel-1");
        assert!(!is_cancelled(reg.flag()));
        assert!(request_cancel("test-cancel-1"));
        assert!(is_cancelled(reg.flag()));
    }

    #[test]
    fn test_unknown_job_cannot_be_cancelled() {
        assert!(!request_cancel("test-cancel-missing"));
        assert!(!cancel_requested(None));
    }

    #[test]
    fn test_registration_removed_on_drop() {
        {
            let _reg = CancelRegistration::new("test-cancel-2");
        }
        assert!(!request_cancel("test-cancel-2"));
    }
}
