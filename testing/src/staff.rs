//! Staff directory double.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use turnstile_core::environment::StaffDirectory;
use turnstile_core::store::{StoreError, StoreFuture};
use turnstile_core::types::{EventId, StaffId};

/// Staff directory with explicit assignments.
#[derive(Debug, Clone, Default)]
pub struct StaticStaffDirectory {
    assignments: Arc<Mutex<HashSet<(StaffId, EventId)>>>,
}

impl StaticStaffDirectory {
    /// Create an empty directory (nobody is assigned anywhere)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `staff` to `event`
    pub fn assign(&self, staff: StaffId, event: EventId) {
        if let Ok(mut assignments) = self.assignments.lock() {
            assignments.insert((staff, event));
        }
    }

    /// Remove an assignment
    pub fn unassign(&self, staff: StaffId, event: EventId) {
        if let Ok(mut assignments) = self.assignments.lock() {
            assignments.remove(&(staff, event));
        }
    }
}

impl StaffDirectory for StaticStaffDirectory {
    fn is_assigned(&self, staff: StaffId, event: EventId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let assignments = self
                .assignments
                .lock()
                .map_err(|_| StoreError::Unavailable("staff directory lock poisoned".to_string()))?;
            Ok(assignments.contains(&(staff, event)))
        })
    }
}
