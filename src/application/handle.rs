//! Process-wide coordinator handle.
//!
//! The coordinator is built explicitly at startup with its collaborators,
//! installed here, and torn down with [`shutdown`]. Code that cannot have the
//! coordinator passed in reaches it through [`shared`].

use super::coordinator::PurchaseCoordinator;
use crate::error::{PurchaseError, Result};
use std::sync::{Arc, PoisonError, RwLock};

static SHARED: RwLock<Option<Arc<PurchaseCoordinator>>> = RwLock::new(None);

/// Installs `coordinator` as the process-wide instance.
pub fn install(coordinator: Arc<PurchaseCoordinator>) -> Result<Arc<PurchaseCoordinator>> {
    let mut shared = SHARED.write().unwrap_or_else(PoisonError::into_inner);
    if shared.is_some() {
        return Err(PurchaseError::AlreadyInstalled);
    }
    *shared = Some(Arc::clone(&coordinator));
    Ok(coordinator)
}

/// The installed coordinator. Repeated calls return the same instance.
pub fn shared() -> Result<Arc<PurchaseCoordinator>> {
    SHARED
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or(PurchaseError::NotInstalled)
}

/// Uninstalls the coordinator and stops its queue observer.
pub fn shutdown() -> Option<Arc<PurchaseCoordinator>> {
    let coordinator = SHARED.write().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(coordinator) = &coordinator {
        coordinator.stop();
    }
    coordinator
}
