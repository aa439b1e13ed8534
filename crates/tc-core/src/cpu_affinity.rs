//! Pinning the hot threads (drains, generator, subscriber receive loop) to
//! configured cores.
//!
//! Every `cpu_affinity*` config key is an `Option<i32>`: absent means "let the
//! scheduler decide", a negative value is treated the same way with a warning.

use tracing::{info, warn};

/// Outcome of [`pin_current`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pinning {
    /// No core configured (or a negative one).
    Unpinned,
    Pinned(usize),
    /// The core does not exist or the OS refused.
    Failed(usize),
}

/// Pin the calling thread to the core with OS id `core`.
///
/// `role` names the thread in the log line, e.g. `"quote drain"`.
pub fn pin_current(role: &str, core: Option<i32>) -> Pinning {
    let Some(requested) = core else {
        return Pinning::Unpinned;
    };
    let Ok(id) = usize::try_from(requested) else {
        warn!("[{role}] ignoring negative cpu affinity {requested}");
        return Pinning::Unpinned;
    };

    let available = core_affinity::get_core_ids().unwrap_or_default();
    let Some(core_id) = available.iter().copied().find(|c| c.id == id) else {
        warn!("[{role}] cpu core {id} not available ({} cores visible), running unpinned", available.len());
        return Pinning::Failed(id);
    };
    if core_affinity::set_for_current(core_id) {
        info!("[{role}] pinned to cpu core {id}");
        Pinning::Pinned(id)
    } else {
        warn!("[{role}] os refused pinning to cpu core {id}, running unpinned");
        Pinning::Failed(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_and_negative_leave_thread_alone() {
        assert_eq!(pin_current("test", None), Pinning::Unpinned);
        assert_eq!(pin_current("test", Some(-1)), Pinning::Unpinned);
    }

    #[test]
    fn missing_core_is_reported() {
        assert_eq!(pin_current("test", Some(i32::MAX)), Pinning::Failed(i32::MAX as usize));
    }

    #[test]
    fn visible_core_can_be_pinned() {
        // Run on a scratch thread so the test runner's thread keeps its mask.
        let Some(first) = core_affinity::get_core_ids().and_then(|ids| ids.first().copied()) else {
            return;
        };
        let outcome = std::thread::spawn(move || pin_current("test", Some(first.id as i32))).join().unwrap();
        assert!(matches!(outcome, Pinning::Pinned(id) | Pinning::Failed(id) if id == first.id));
    }
}
