//! Creation-order bookkeeping for GPU resources.
//!
//! Every resource the pipeline creates is registered here and must be
//! released in strict reverse order of creation. Releasing anything other
//! than the most recently created live resource is an error, as is finishing
//! with resources still alive.

use crate::error::{GpuError, Result};

/// Token returned when a resource is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(u64);

#[derive(Debug)]
struct LiveResource {
    id: ResourceId,
    name: String,
}

/// Stack of live resources in creation order.
#[derive(Debug, Default)]
pub struct TeardownLedger {
    live: Vec<LiveResource>,
    next_id: u64,
}

impl TeardownLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a resource named `name` was created.
    pub fn register(&mut self, name: impl Into<String>) -> ResourceId {
        let id = ResourceId(self.next_id);
        self.next_id += 1;
        let name = name.into();
        tracing::trace!("Created {name}");
        self.live.push(LiveResource { id, name });
        id
    }

    /// Record that the resource `id` was destroyed.
    ///
    /// Fails without modifying the ledger if `id` is not the most recently
    /// created live resource.
    pub fn release(&mut self, id: ResourceId) -> Result<()> {
        match self.live.last() {
            Some(top) if top.id == id => {
                if let Some(resource) = self.live.pop() {
                    tracing::trace!("Destroyed {}", resource.name);
                }
                Ok(())
            }
            Some(top) => {
                let released = self
                    .live
                    .iter()
                    .find(|r| r.id == id)
                    .map_or_else(|| format!("unknown resource #{}", id.0), |r| r.name.clone());
                Err(GpuError::TeardownOrder {
                    released,
                    expected: top.name.clone(),
                })
            }
            None => Err(GpuError::InvalidState(format!(
                "Released resource #{} with nothing alive",
                id.0
            ))),
        }
    }

    /// Name of the resource that must be released next.
    pub fn next_to_release(&self) -> Option<&str> {
        self.live.last().map(|r| r.name.as_str())
    }

    /// Names of live resources, most recent first (the required release order).
    pub fn release_order(&self) -> impl Iterator<Item = &str> {
        self.live.iter().rev().map(|r| r.name.as_str())
    }

    /// Number of live resources.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Whether every registered resource has been released.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Check that everything has been released.
    pub fn finish(&self) -> Result<()> {
        if self.live.is_empty() {
            return Ok(());
        }
        let leaked: Vec<&str> = self.release_order().collect();
        Err(GpuError::InvalidState(format!(
            "Resources still alive at teardown: {}",
            leaked.join(", ")
        )))
    }
}

/// First failure of a release sequence that must run to the end.
#[derive(Debug)]
pub struct FirstError<E>(Option<E>);

impl<E> Default for FirstError<E> {
    fn default() -> Self {
        Self(None)
    }
}

impl<E> FirstError<E> {
    /// Start with no failure recorded.
    pub const fn new() -> Self {
        Self(None)
    }

    /// Keep `result`'s error if it is the first one; return its value.
    pub fn record<T, F: Into<E>>(&mut self, result: std::result::Result<T, F>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                if self.0.is_none() {
                    self.0 = Some(e.into());
                }
                None
            }
        }
    }

    /// Whether anything failed so far.
    pub const fn is_err(&self) -> bool {
        self.0.is_some()
    }

    /// `Err` with the first failure, or `Ok` if every step succeeded.
    pub fn finish(self) -> std::result::Result<(), E> {
        self.0.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_order_is_accepted() {
        let mut ledger = TeardownLedger::new();
        let storage = ledger.register("storage_buffer");
        let vertices = ledger.register("vertex_buffer");
        let indices = ledger.register("index_buffer");

        assert_eq!(
            ledger.release_order().collect::<Vec<_>>(),
            vec!["index_buffer", "vertex_buffer", "storage_buffer"]
        );

        ledger.release(indices).unwrap();
        ledger.release(vertices).unwrap();
        ledger.release(storage).unwrap();
        assert!(ledger.is_empty());
        ledger.finish().unwrap();
    }

    #[test]
    fn out_of_order_release_is_flagged() {
        let mut ledger = TeardownLedger::new();
        let storage = ledger.register("storage_buffer");
        let _tlas = ledger.register("tlas");

        match ledger.release(storage) {
            Err(GpuError::TeardownOrder { released, expected }) => {
                assert_eq!(released, "storage_buffer");
                assert_eq!(expected, "tlas");
            }
            other => panic!("expected TeardownOrder, got {other:?}"),
        }

        // Rejected release leaves the ledger untouched
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.next_to_release(), Some("tlas"));
    }

    #[test]
    fn double_release_is_flagged() {
        let mut ledger = TeardownLedger::new();
        let a = ledger.register("a");
        let b = ledger.register("b");
        ledger.release(b).unwrap();
        assert!(ledger.release(b).is_err());
        ledger.release(a).unwrap();
        assert!(matches!(ledger.release(a), Err(GpuError::InvalidState(_))));
    }

    #[test]
    fn leaks_fail_finish() {
        let mut ledger = TeardownLedger::new();
        ledger.register("pipeline");
        let err = ledger.finish().unwrap_err();
        assert!(err.to_string().contains("pipeline"));
    }

    #[test]
    fn first_error_keeps_going() {
        let mut errors: FirstError<GpuError> = FirstError::new();
        let mut released = Vec::new();
        for (name, result) in [
            ("pipeline", Ok(())),
            ("index buffer", Err(GpuError::InvalidState("first".into()))),
            ("vertex buffer", Err(GpuError::InvalidState("second".into()))),
            ("output buffer", Ok(())),
        ] {
            released.push(name);
            errors.record(result);
        }

        assert_eq!(released.len(), 4);
        assert!(errors.is_err());
        match errors.finish() {
            Err(GpuError::InvalidState(message)) => assert_eq!(message, "first"),
            other => panic!("expected the first error, got {other:?}"),
        }
    }

    #[test]
    fn no_errors_finish_ok() {
        let mut errors: FirstError<GpuError> = FirstError::default();
        assert_eq!(errors.record::<u32, GpuError>(Ok(7)), Some(7));
        assert!(errors.finish().is_ok());
    }
}
