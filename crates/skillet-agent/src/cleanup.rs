//! Process-wide agent registry for coordinated shutdown.
//!
//! Agents register a weak handle at open time. `shutdown_all` lets embedders
//! release every still-live agent (MCP subprocesses included) at one point,
//! typically right before process exit. Individual `close()` / `Drop` paths
//! do not need the registry; it exists for the batch case.

use std::sync::{Mutex, OnceLock, Weak};

/// Anything that can be shut down exactly once.
pub trait Closeable: Send + Sync {
    fn close(&self);
}

static REGISTRY: OnceLock<Mutex<Vec<Weak<dyn Closeable>>>> = OnceLock::new();

fn registry() -> &'static Mutex<Vec<Weak<dyn Closeable>>> {
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

/// Register a weak handle; dropped agents fall out on their own.
pub fn register(handle: Weak<dyn Closeable>) {
    let mut entries = registry().lock().unwrap_or_else(|e| e.into_inner());
    entries.retain(|entry| entry.strong_count() > 0);
    entries.push(handle);
}

/// Close every agent that is still alive. Idempotent.
pub fn shutdown_all() {
    let entries: Vec<Weak<dyn Closeable>> = {
        let mut registry = registry().lock().unwrap_or_else(|e| e.into_inner());
        registry.drain(..).collect()
    };
    for entry in entries {
        if let Some(agent) = entry.upgrade() {
            agent.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        closes: AtomicUsize,
    }

    impl Closeable for Counting {
        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_shutdown_all_closes_live_agents() {
        let agent = Arc::new(Counting {
            closes: AtomicUsize::new(0),
        });
        let weak = Arc::downgrade(&agent);
        register(weak as Weak<dyn Closeable>);
        shutdown_all();
        assert_eq!(agent.closes.load(Ordering::SeqCst), 1);
        // Registry drained, so a second pass is a no-op.
        shutdown_all();
        assert_eq!(agent.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_agents_are_skipped() {
        let agent = Arc::new(Counting {
            closes: AtomicUsize::new(0),
        });
        let weak = Arc::downgrade(&agent);
        register(weak as Weak<dyn Closeable>);
        drop(agent);
        // Must not panic on the dead handle.
        shutdown_all();
    }
}
