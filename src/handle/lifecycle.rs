//! Handle lifecycle - reference counting and recursive close
//!
//! A handle struct is freed exactly once, by whichever of `release` or
//! `close` first observes both "closed" and "no references left".

use tracing::{debug, trace, warn};

use super::{HandleKey, WindowRegistry};
use crate::backend::DrawingBackend;
use crate::error::{HandleError, Result};

/// Outcome of dropping one reference
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Released {
    /// Other references remain
    Held(usize),
    /// Last reference gone, native window still open
    Idle,
    /// Last reference gone on a closed handle; the struct was freed
    Freed,
    /// There was no reference to drop; nothing changed
    Unbalanced,
}

/// Count one more external reference to a handle
pub fn wrap(registry: &mut WindowRegistry, key: HandleKey) -> Result<usize> {
    let handle = registry.get_mut(key).ok_or(HandleError::UnknownHandle)?;
    handle.refs += 1;
    trace!("wrap {:?} -> {} refs", key, handle.refs);
    Ok(handle.refs)
}

/// Drop one external reference, freeing the handle if it is also closed
pub fn release(registry: &mut WindowRegistry, key: HandleKey) -> Result<Released> {
    let handle = registry.get_mut(key).ok_or(HandleError::UnknownHandle)?;
    if handle.refs == 0 {
        warn!("Release of {:?} with no outstanding references", key);
        return Ok(Released::Unbalanced);
    }

    handle.refs -= 1;
    trace!("release {:?} -> {} refs", key, handle.refs);
    if handle.refs > 0 {
        return Ok(Released::Held(handle.refs));
    }
    if handle.closed {
        registry.remove(key);
        return Ok(Released::Freed);
    }
    Ok(Released::Idle)
}

/// Close a handle and, depth first, every subwindow below it.
///
/// Returns whether the native destroy of `key` itself succeeded; failures
/// further down the tree are logged only. The handle counts as closed
/// either way. Closing an already closed (or already freed) handle is a
/// successful no-op.
pub fn close<B>(registry: &mut WindowRegistry, backend: &mut B, key: HandleKey) -> Result<bool>
where
    B: DrawingBackend + ?Sized,
{
    match registry.get(key) {
        Some(handle) if !handle.closed => {}
        Some(_) => return Ok(true),
        None => {
            trace!("close of freed handle {:?}", key);
            return Ok(true);
        }
    }

    let mut result = true;
    // (handle, children already scheduled)
    let mut stack = vec![(key, false)];
    while let Some((current, expanded)) = stack.pop() {
        let Some(handle) = registry.get_mut(current) else {
            continue;
        };
        if handle.closed {
            continue;
        }

        if !expanded {
            // Drain before descending: the child list is never iterated
            // while the tree is being mutated
            let children = std::mem::take(&mut handle.children);
            stack.push((current, true));
            stack.extend(children.into_iter().rev().map(|child| (child, false)));
            continue;
        }

        let parent = handle.parent;
        let is_top = current == key;
        if is_top {
            if let Some(parent) = parent {
                registry.unlink_child(parent, current);
            }
        }

        let ok = teardown(registry, backend, current);
        if is_top {
            result = ok;
        } else if !ok {
            warn!("Subwindow {:?} of {:?} did not close cleanly", current, key);
        }
    }
    Ok(result)
}

/// Close every open window tree
pub fn close_all<B>(registry: &mut WindowRegistry, backend: &mut B) -> usize
where
    B: DrawingBackend + ?Sized,
{
    let roots = registry.roots();
    let count = roots.len();
    for root in roots {
        // Per-handle failures were already logged by close()
        let _ = close(registry, backend, root);
    }
    count
}

/// Release the native resources of one handle whose children are closed
fn teardown<B>(registry: &mut WindowRegistry, backend: &mut B, key: HandleKey) -> bool
where
    B: DrawingBackend + ?Sized,
{
    let Some(handle) = registry.get_mut(key) else {
        return true;
    };
    let native = handle.native;
    let panel = handle.panel.take();
    let mut ok = true;

    if let Some(panel) = panel {
        if let Err(e) = backend.destroy_panel(panel) {
            warn!("Failed to destroy panel {} of window {}: {}", panel, native, e);
            ok = false;
        }
    }
    if let Err(e) = backend.destroy_window(native) {
        warn!("Failed to destroy native window {}: {}", native, e);
        ok = false;
    }

    // Closed regardless of the native outcome: the resource is not retried
    let reclaimable = match registry.get_mut(key) {
        Some(handle) => {
            handle.closed = true;
            handle.is_reclaimable()
        }
        None => false,
    };
    registry.unindex(key);
    debug!("Closed window {} ({:?})", native, key);

    if reclaimable {
        registry.remove(key);
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DrawingBackend, FailPoint, MemoryBackend, Point, Size};

    fn setup() -> (WindowRegistry, MemoryBackend, HandleKey) {
        let mut backend = MemoryBackend::headless(Size::new(24, 80));
        let mut registry = WindowRegistry::new();
        let native = backend.init_screen().unwrap();
        let root = registry.find_or_create(native).unwrap();
        (registry, backend, root)
    }

    fn sub(
        registry: &mut WindowRegistry,
        backend: &mut MemoryBackend,
        parent: HandleKey,
        at: u16,
    ) -> HandleKey {
        let native = registry.get(parent).unwrap().native();
        let child = backend
            .create_derived_window(native, Size::new(0, 0), Point::new(at, at))
            .unwrap();
        let key = registry.find_or_create(child).unwrap();
        registry.link_child(parent, key).unwrap();
        key
    }

    #[test]
    fn test_close_chain_closes_descendants() {
        let (mut registry, mut backend, root) = setup();
        let a = sub(&mut registry, &mut backend, root, 1);
        let b = sub(&mut registry, &mut backend, a, 1);
        let c = sub(&mut registry, &mut backend, b, 1);
        for key in [root, a, b, c] {
            wrap(&mut registry, key).unwrap();
        }

        assert!(close(&mut registry, &mut backend, root).unwrap());
        for key in [root, a, b, c] {
            let handle = registry.get(key).unwrap();
            assert!(handle.is_closed());
            assert!(handle.children().is_empty());
        }
        assert_eq!(backend.window_count(), 0);
        registry.verify().unwrap();
    }

    #[test]
    fn test_close_subwindow_unlinks_from_parent() {
        let (mut registry, mut backend, root) = setup();
        let a = sub(&mut registry, &mut backend, root, 1);
        let b = sub(&mut registry, &mut backend, root, 2);

        assert!(close(&mut registry, &mut backend, a).unwrap());
        assert_eq!(registry.get(root).unwrap().children(), &[b]);
        // No references: freed right away
        assert!(registry.get(a).is_none());
        registry.verify().unwrap();
    }

    #[test]
    fn test_freed_exactly_once_after_close_and_release() {
        let (mut registry, mut backend, root) = setup();
        let w = sub(&mut registry, &mut backend, root, 1);
        wrap(&mut registry, w).unwrap();
        wrap(&mut registry, w).unwrap();

        assert_eq!(release(&mut registry, w).unwrap(), Released::Held(1));
        assert!(close(&mut registry, &mut backend, w).unwrap());
        assert!(registry.get(w).is_some());

        assert_eq!(release(&mut registry, w).unwrap(), Released::Freed);
        assert!(registry.get(w).is_none());
        assert!(matches!(release(&mut registry, w), Err(HandleError::UnknownHandle)));
    }

    #[derive(Clone, Copy, Debug, PartialEq)]
    enum Step {
        Wrap,
        Release,
        Close,
    }

    #[test]
    fn test_any_close_position_frees_exactly_once() {
        for close_at in 0..=6 {
            let mut steps = vec![Step::Wrap; 3];
            steps.extend([Step::Release; 3]);
            steps.insert(close_at, Step::Close);

            let (mut registry, mut backend, root) = setup();
            let w = sub(&mut registry, &mut backend, root, 1);
            let (mut refs, mut closed) = (0usize, false);
            let mut expected = None;
            let mut vanished = Vec::new();

            for (i, &step) in steps.iter().enumerate() {
                let present = registry.contains(w);
                let result = match step {
                    Step::Wrap => wrap(&mut registry, w).map(|_| ()),
                    Step::Release => release(&mut registry, w).map(|_| ()),
                    Step::Close => close(&mut registry, &mut backend, w).map(|_| ()),
                };

                if expected.is_some() {
                    // Freed: only close still answers, as a no-op
                    assert_eq!(result.is_ok(), step == Step::Close, "{:?} at {}", steps, i);
                } else {
                    result.unwrap();
                    match step {
                        Step::Wrap => refs += 1,
                        Step::Release => refs = refs.saturating_sub(1),
                        Step::Close => closed = true,
                    }
                    if closed && refs == 0 {
                        expected = Some(i);
                    }
                }
                if present && !registry.contains(w) {
                    vanished.push(i);
                }
            }

            assert_eq!(vanished, expected.into_iter().collect::<Vec<_>>(), "{:?}", steps);
            assert_eq!(vanished.len(), 1, "{:?}", steps);
            registry.verify().unwrap();
        }
    }

    #[test]
    fn test_release_to_zero_keeps_open_handle() {
        let (mut registry, mut backend, root) = setup();
        let w = sub(&mut registry, &mut backend, root, 1);
        wrap(&mut registry, w).unwrap();

        assert_eq!(release(&mut registry, w).unwrap(), Released::Idle);
        assert!(!registry.get(w).unwrap().is_closed());
        assert_eq!(release(&mut registry, w).unwrap(), Released::Unbalanced);
        assert_eq!(registry.get(w).unwrap().refs(), 0);
    }

    #[test]
    fn test_close_twice_is_noop() {
        let (mut registry, mut backend, root) = setup();
        wrap(&mut registry, root).unwrap();

        assert!(close(&mut registry, &mut backend, root).unwrap());
        assert!(close(&mut registry, &mut backend, root).unwrap());
        assert_eq!(release(&mut registry, root).unwrap(), Released::Freed);
        assert!(close(&mut registry, &mut backend, root).unwrap());
    }

    #[test]
    fn test_native_failure_still_marks_closed() {
        let (mut registry, mut backend, root) = setup();
        wrap(&mut registry, root).unwrap();
        backend.fail_next(FailPoint::DestroyWindow);

        assert!(!close(&mut registry, &mut backend, root).unwrap());
        assert!(registry.get(root).unwrap().is_closed());
        // No retry on an already attempted teardown
        assert!(close(&mut registry, &mut backend, root).unwrap());
    }

    #[test]
    fn test_failed_subwindow_teardown_still_closes_tree() {
        let (mut registry, mut backend, root) = setup();
        let a = sub(&mut registry, &mut backend, root, 1);
        wrap(&mut registry, a).unwrap();
        wrap(&mut registry, root).unwrap();
        backend.fail_next(FailPoint::DestroyWindow);

        // The child's destroy fails first, so the root still has a subwindow
        // natively and its own destroy fails too
        assert!(!close(&mut registry, &mut backend, root).unwrap());
        assert!(registry.get(a).unwrap().is_closed());
        assert!(registry.get(root).unwrap().is_closed());
        registry.verify().unwrap();
    }

    #[test]
    fn test_closed_identity_gets_fresh_handle() {
        let (mut registry, mut backend, root) = setup();
        wrap(&mut registry, root).unwrap();
        let native = registry.get(root).unwrap().native();
        close(&mut registry, &mut backend, root).unwrap();

        let again = registry.find_or_create(native).unwrap();
        assert_ne!(again, root);
        registry.verify().unwrap();
    }
}
