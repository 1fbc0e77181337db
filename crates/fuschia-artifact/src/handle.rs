use std::fmt;
use std::sync::{Mutex, PoisonError};

/// An opaque, externally allocated resource that must be released once.
///
/// The cache never inspects what a handle points at. It only tracks which
/// node locator owns it and calls [`release`](ResourceHandle::release) when
/// the owner lets go.
pub trait ResourceHandle: fmt::Debug + Send + Sync {
  /// Stable identifier, used for lookups and logging.
  fn id(&self) -> &str;

  /// Free the underlying resource. Releasing an already released handle must
  /// be a no-op.
  fn release(&self);
}

pub type BoxedHandle = Box<dyn ResourceHandle>;

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// A handle that runs a callback on its first release.
pub struct CallbackHandle {
  id: String,
  on_release: Mutex<Option<ReleaseFn>>,
}

impl CallbackHandle {
  pub fn new(id: impl Into<String>, on_release: impl FnOnce() + Send + 'static) -> Self {
    Self {
      id: id.into(),
      on_release: Mutex::new(Some(Box::new(on_release))),
    }
  }

  pub fn boxed(id: impl Into<String>, on_release: impl FnOnce() + Send + 'static) -> BoxedHandle {
    Box::new(Self::new(id, on_release))
  }

  pub fn is_released(&self) -> bool {
    self
      .on_release
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .is_none()
  }
}

impl ResourceHandle for CallbackHandle {
  fn id(&self) -> &str {
    &self.id
  }

  fn release(&self) {
    let callback = self
      .on_release
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    if let Some(callback) = callback {
      callback();
    }
  }
}

impl fmt::Debug for CallbackHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CallbackHandle")
      .field("id", &self.id)
      .field("released", &self.is_released())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[test]
  fn test_second_release_is_noop() {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let handle = CallbackHandle::new("h1", move || {
      counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(!handle.is_released());
    handle.release();
    handle.release();

    assert!(handle.is_released());
    assert_eq!(count.load(Ordering::SeqCst), 1);
  }
}
