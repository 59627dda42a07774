use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A thread-safe, reference-counted resource container with read-write locking.
///
/// `MtResource` is how data crosses from the simulation thread onto the worker
/// pool. Voxel fields live in one of these: the registry keeps a handle, every
/// carve task clones another, and the write lock is what serialises mutation of
/// a single field while tasks from different tools run in parallel.
///
/// # Type Parameters
/// - `T`: The type of the contained resource, must be `Send + Sync`
///
/// # Examples
///
/// ```
/// use tool_core::core::MtResource;
///
/// let density = MtResource::new(255u8);
/// let worker_handle = density.clone();
///
/// let handle = std::thread::spawn(move || {
///     *worker_handle.get_mut() -= 55;
/// });
///
/// handle.join().unwrap();
/// assert_eq!(*density.get(), 200);
/// ```
///
/// # Poisoning
/// A worker that panics while holding the write lock poisons it. The guards
/// returned here recover the inner value instead of propagating the panic, so
/// one failed job degrades to a no-op rather than taking the simulation down.
pub struct MtResource<T: Send + Sync> {
    pub resource: Arc<RwLock<T>>,
}

impl<T: Send + Sync + 'static> MtResource<T> {
    /// Creates a new `MtResource` containing the given value.
    pub fn new(resource: T) -> Self {
        Self {
            resource: Arc::new(RwLock::new(resource)),
        }
    }

    /// Returns a read-only guard for the contained value.
    ///
    /// Blocks while a writer holds the lock.
    pub fn get(&self) -> RwLockReadGuard<'_, T> {
        self.resource.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns an exclusive guard for the contained value.
    ///
    /// Blocks until every other reader and writer has released the lock.
    pub fn get_mut(&self) -> RwLockWriteGuard<'_, T> {
        self.resource.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` if both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.resource, &other.resource)
    }

    /// Number of live handles, including this one.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.resource)
    }
}

impl<T: Send + Sync> Clone for MtResource<T> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_same_value() {
        let resource = MtResource::new(vec![1u8, 2, 3]);
        let clone = resource.clone();

        clone.get_mut().push(4);

        assert_eq!(resource.get().len(), 4);
        assert!(resource.ptr_eq(&clone));
        assert_eq!(resource.handle_count(), 2);
    }

    #[test]
    fn poisoned_lock_still_yields_the_value() {
        let resource = MtResource::new(7u32);
        let worker = resource.clone();

        let _ = std::thread::spawn(move || {
            let _guard = worker.get_mut();
            panic!("worker failed mid-write");
        })
        .join();

        assert_eq!(*resource.get(), 7);
        *resource.get_mut() = 8;
        assert_eq!(*resource.get(), 8);
    }
}
