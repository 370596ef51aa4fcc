use std::fmt::{Debug, Display};
use std::sync::Arc;

use thiserror::Error;

/// The error a failed future settles into.
///
/// Cloning is cheap and every consumer of the same failed future observes
/// the same underlying error, however many continuation edges it crossed.
/// Use [TaskError::downcast_ref] to recover a concrete error type, e.g. a
/// marker value a producer used to signal an expected end condition.
#[derive(Clone, Debug, Error)]
#[error("{0}")]
pub struct TaskError(Arc<anyhow::Error>);

impl TaskError {
    pub fn new(err: anyhow::Error) -> Self {
        TaskError(Arc::new(err))
    }

    /// Builds an error from a printable message.
    pub fn msg<M>(msg: M) -> Self
    where
        M: Display + Debug + Send + Sync + 'static,
    {
        TaskError::new(anyhow::Error::msg(msg))
    }

    /// Returns a reference to the concrete error this wraps, if it is an `E`.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: Display + Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref()
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        TaskError::new(err)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::TaskError;

    #[derive(Debug)]
    struct Marker(i32);

    impl std::fmt::Display for Marker {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "marker {}", self.0)
        }
    }

    impl std::error::Error for Marker {}

    #[test]
    fn displays_inner_message() {
        let err = TaskError::from(anyhow!("socket reset"));
        assert_eq!(err.to_string(), "socket reset");
    }

    #[test]
    fn clones_share_the_error() {
        let err = TaskError::new(anyhow::Error::new(Marker(7)));
        let other = err.clone();
        assert_eq!(other.downcast_ref::<Marker>().unwrap().0, 7);
        assert_eq!(err.downcast_ref::<Marker>().unwrap().0, 7);
    }

    #[test]
    fn downcast_misses_other_types() {
        let err = TaskError::msg("plain");
        assert!(err.downcast_ref::<Marker>().is_none());
    }
}
