use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::BackupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Backup,
    Restore,
}

/// Single-flight guard shared by backup creation and restore.
///
/// At most one operation holds the guard at a time. A second caller is
/// rejected immediately with the error matching whoever holds it; there is no
/// queue.
#[derive(Debug, Default)]
pub struct OperationGuard {
    active: Mutex<Option<Operation>>,
}

impl OperationGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn try_acquire(self: &Arc<Self>, operation: Operation) -> Result<GuardPermit, BackupError> {
        let mut active = self.lock();
        if let Some(held) = *active {
            return Err(match held {
                Operation::Backup => BackupError::BackupInProgress,
                Operation::Restore => BackupError::RestoreInProgress,
            });
        }
        *active = Some(operation);
        Ok(GuardPermit {
            guard: Arc::clone(self),
            operation,
        })
    }

    pub fn active(&self) -> Option<Operation> {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Operation>> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Held for the duration of one operation; releases the guard on drop.
#[derive(Debug)]
pub struct GuardPermit {
    guard: Arc<OperationGuard>,
    operation: Operation,
}

impl GuardPermit {
    pub fn operation(&self) -> Operation {
        self.operation
    }
}

impl Drop for GuardPermit {
    fn drop(&mut self) {
        *self.guard.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected_until_release() {
        let guard = OperationGuard::new();
        let permit = guard.try_acquire(Operation::Backup).expect("first");
        assert_eq!(guard.active(), Some(Operation::Backup));

        assert!(matches!(
            guard.try_acquire(Operation::Backup),
            Err(BackupError::BackupInProgress)
        ));
        assert!(matches!(
            guard.try_acquire(Operation::Restore),
            Err(BackupError::BackupInProgress)
        ));

        drop(permit);
        assert_eq!(guard.active(), None);
        let restore = guard.try_acquire(Operation::Restore).expect("after release");
        assert_eq!(restore.operation(), Operation::Restore);
        assert!(matches!(
            guard.try_acquire(Operation::Backup),
            Err(BackupError::RestoreInProgress)
        ));
    }

    #[test]
    fn independent_guards_do_not_interfere() {
        let a = OperationGuard::new();
        let b = OperationGuard::new();
        let _held = a.try_acquire(Operation::Backup).expect("a");
        assert!(b.try_acquire(Operation::Backup).is_ok());
    }
}
