//! Kernel object references.

use core::{any::Any, fmt};
use std::sync::Arc;

/// A kernel-managed object that can be referenced through a [`Handle`].
///
/// The IPC core never inspects objects; services downcast them through
/// [`as_any`](KernelObject::as_any) when they need the concrete type.
///
/// [`Handle`]: crate::Handle
pub trait KernelObject: Any + Send + Sync + fmt::Debug {
    /// Short name of the object type, for diagnostics.
    fn type_name(&self) -> &'static str;

    /// Returns `self` as [`Any`] for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Shared reference to a kernel object.
pub type ObjectRef = Arc<dyn KernelObject>;

impl dyn KernelObject {
    /// Returns a reference to the concrete object if it is of type `T`.
    #[inline]
    pub fn downcast_ref<T: KernelObject>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}
