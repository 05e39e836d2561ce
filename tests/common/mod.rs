//! Shared helpers for integration tests.

use swarm_bus::Engine;
use tempfile::TempDir;

/// Build an engine over a throwaway project root.
///
/// The tempdir must outlive the engine, so both are returned.
pub fn test_engine() -> (TempDir, Engine) {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = Engine::open(dir.path()).expect("engine should open");
    (dir, engine)
}
