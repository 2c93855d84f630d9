//! Panel extension - stacking panels attached to window handles
//!
//! A handle is either a plain window or a panel; attaching twice, or
//! detaching/replacing without a panel, is rejected before any native call.

use tracing::{debug, warn};

use super::{HandleKey, WindowRegistry};
use crate::backend::{DrawingBackend, NativePanel};
use crate::error::{HandleError, Result};

/// Native panel of an open handle
pub fn panel_of(registry: &WindowRegistry, key: HandleKey) -> Result<NativePanel> {
    registry.open(key)?.panel.ok_or(HandleError::NotPanel)
}

/// Turn a plain window into a panel on top of the stack
pub fn attach<B>(registry: &mut WindowRegistry, backend: &mut B, key: HandleKey) -> Result<NativePanel>
where
    B: DrawingBackend + ?Sized,
{
    let handle = registry.open(key)?;
    if handle.panel.is_some() {
        warn!("Window {} is already a panel", handle.native);
        return Err(HandleError::AlreadyPanel);
    }
    let native = handle.native;

    let panel = backend
        .create_panel(native)
        .map_err(HandleError::native("create_panel"))?;
    if let Some(handle) = registry.get_mut(key) {
        handle.panel = Some(panel);
    }
    debug!("Panel {} attached to window {}", panel, native);
    Ok(panel)
}

/// Destroy the panel of a window, leaving the window itself usable
pub fn detach<B>(registry: &mut WindowRegistry, backend: &mut B, key: HandleKey) -> Result<()>
where
    B: DrawingBackend + ?Sized,
{
    let panel = panel_of(registry, key)?;
    backend
        .destroy_panel(panel)
        .map_err(HandleError::native("destroy_panel"))?;
    if let Some(handle) = registry.get_mut(key) {
        handle.panel = None;
    }
    debug!("Panel {} detached", panel);
    Ok(())
}

/// Move the panel of `src` onto the plain window `dst`
pub fn replace<B>(
    registry: &mut WindowRegistry,
    backend: &mut B,
    src: HandleKey,
    dst: HandleKey,
) -> Result<()>
where
    B: DrawingBackend + ?Sized,
{
    let panel = panel_of(registry, src)?;
    let target = registry.open(dst)?;
    if target.panel.is_some() {
        return Err(HandleError::AlreadyPanel);
    }
    let native = target.native;

    backend
        .replace_panel(panel, native)
        .map_err(HandleError::native("replace_panel"))?;
    if let Some(handle) = registry.get_mut(src) {
        handle.panel = None;
    }
    if let Some(handle) = registry.get_mut(dst) {
        handle.panel = Some(panel);
    }
    debug!("Panel {} moved to window {}", panel, native);
    Ok(())
}

/// Handle of the next visible panel above, if it is tracked
pub fn above<B>(registry: &WindowRegistry, backend: &B, key: HandleKey) -> Result<Option<HandleKey>>
where
    B: DrawingBackend + ?Sized,
{
    let panel = panel_of(registry, key)?;
    Ok(backend
        .panel_above(panel)
        .and_then(|p| registry.lookup_by_panel(p)))
}

/// Handle of the next visible panel below, if it is tracked
pub fn below<B>(registry: &WindowRegistry, backend: &B, key: HandleKey) -> Result<Option<HandleKey>>
where
    B: DrawingBackend + ?Sized,
{
    let panel = panel_of(registry, key)?;
    Ok(backend
        .panel_below(panel)
        .and_then(|p| registry.lookup_by_panel(p)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FailPoint, MemoryBackend, Point, Size};

    fn window(registry: &mut WindowRegistry, backend: &mut MemoryBackend, y: u16) -> HandleKey {
        let native = backend
            .create_window(Size::new(3, 10), Point::new(y, 0))
            .unwrap();
        registry.find_or_create(native).unwrap()
    }

    fn setup() -> (WindowRegistry, MemoryBackend) {
        let mut backend = MemoryBackend::headless(Size::new(24, 80));
        backend.init_screen().unwrap();
        (WindowRegistry::new(), backend)
    }

    #[test]
    fn test_attach_twice_is_rejected() {
        let (mut registry, mut backend) = setup();
        let w = window(&mut registry, &mut backend, 0);

        let panel = attach(&mut registry, &mut backend, w).unwrap();
        assert!(matches!(
            attach(&mut registry, &mut backend, w),
            Err(HandleError::AlreadyPanel)
        ));
        assert_eq!(registry.get(w).unwrap().panel(), Some(panel));
        assert_eq!(backend.panel_count(), 1);
    }

    #[test]
    fn test_detach_plain_window_is_rejected() {
        let (mut registry, mut backend) = setup();
        let w = window(&mut registry, &mut backend, 0);

        assert!(matches!(
            detach(&mut registry, &mut backend, w),
            Err(HandleError::NotPanel)
        ));

        attach(&mut registry, &mut backend, w).unwrap();
        detach(&mut registry, &mut backend, w).unwrap();
        let handle = registry.get(w).unwrap();
        assert!(!handle.is_panel());
        assert!(!handle.is_closed());
        assert_eq!(backend.panel_count(), 0);
    }

    #[test]
    fn test_replace_moves_panel_identity() {
        let (mut registry, mut backend) = setup();
        let a = window(&mut registry, &mut backend, 0);
        let b = window(&mut registry, &mut backend, 5);
        let panel = attach(&mut registry, &mut backend, a).unwrap();

        assert!(matches!(
            replace(&mut registry, &mut backend, b, a),
            Err(HandleError::NotPanel)
        ));
        replace(&mut registry, &mut backend, a, b).unwrap();

        assert_eq!(registry.get(a).unwrap().panel(), None);
        assert_eq!(registry.get(b).unwrap().panel(), Some(panel));
        assert!(!registry.get(a).unwrap().is_closed());
        assert!(!registry.get(b).unwrap().is_closed());
        assert_eq!(backend.panel_window(panel), Some(registry.get(b).unwrap().native()));
    }

    #[test]
    fn test_stacking_queries_resolve_handles() {
        let (mut registry, mut backend) = setup();
        let a = window(&mut registry, &mut backend, 0);
        let b = window(&mut registry, &mut backend, 5);
        attach(&mut registry, &mut backend, a).unwrap();
        attach(&mut registry, &mut backend, b).unwrap();

        assert_eq!(above(&registry, &backend, a).unwrap(), Some(b));
        assert_eq!(below(&registry, &backend, b).unwrap(), Some(a));
        assert_eq!(above(&registry, &backend, b).unwrap(), None);
        assert_eq!(below(&registry, &backend, a).unwrap(), None);
    }

    #[test]
    fn test_native_failure_leaves_state_unchanged() {
        let (mut registry, mut backend) = setup();
        let w = window(&mut registry, &mut backend, 0);

        backend.fail_next(FailPoint::CreatePanel);
        assert!(matches!(
            attach(&mut registry, &mut backend, w),
            Err(HandleError::NativeOperationFailed { op: "create_panel", .. })
        ));
        assert!(!registry.get(w).unwrap().is_panel());

        let panel = attach(&mut registry, &mut backend, w).unwrap();
        backend.fail_next(FailPoint::DestroyPanel);
        assert!(detach(&mut registry, &mut backend, w).is_err());
        assert_eq!(registry.get(w).unwrap().panel(), Some(panel));
    }
}
