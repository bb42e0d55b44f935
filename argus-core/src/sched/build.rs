//! Per-device build permits
//!
//! Every GPU device carries exactly one execution permit. Index builds and
//! searches both take the permit for the duration of their run, so the two
//! never execute concurrently on a shared device.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Capacity-1 permits keyed by GPU device id.
pub struct BuildMgr {
    permits: FxHashMap<i64, Arc<Mutex<()>>>,
}

impl BuildMgr {
    pub fn new(device_ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            permits: device_ids
                .into_iter()
                .map(|id| (id, Arc::new(Mutex::new(()))))
                .collect(),
        }
    }

    /// The permit for a device; `None` for devices the manager does not
    /// know about (CPU-only deployments).
    pub fn permit(&self, device_id: i64) -> Option<Arc<Mutex<()>>> {
        self.permits.get(&device_id).cloned()
    }

    pub fn device_count(&self) -> usize {
        self.permits.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_shared_device_permits_are_exclusive() {
        let mgr = Arc::new(BuildMgr::new([0]));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let mgr = Arc::clone(&mgr);
            let concurrent = Arc::clone(&concurrent);
            let peak = Arc::clone(&peak);
            handles.push(std::thread::spawn(move || {
                let permit = mgr.permit(0).unwrap();
                let _guard = permit.lock();
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(5));
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_device_has_no_permit() {
        let mgr = BuildMgr::new([0, 1]);
        assert_eq!(mgr.device_count(), 2);
        assert!(mgr.permit(0).is_some());
        assert!(mgr.permit(7).is_none());
    }
}
