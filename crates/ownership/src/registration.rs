use std::fmt;

type Release = Box<dyn FnOnce() + Send + 'static>;

/// A registration with an ownership service (candidate or listener).
///
/// The registration is released exactly once, either by [`Registration::close`]
/// or when it is dropped.
#[must_use = "dropping a registration releases it immediately"]
pub struct Registration {
    release: Option<Release>,
}

impl Registration {
    /// Creates a registration which runs `release` when closed.
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Releases the registration.
    pub fn close(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("open", &self.release.is_some())
            .finish()
    }
}
