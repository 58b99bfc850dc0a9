use crate::error::{CollectionError, Result};

///
/// Status
///
/// Collection lifecycle. `Ready` is only ever entered through an
/// explicit [`transition`] to `Ready` (the collection's own
/// `mark_ready`, not a bare field write).
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Idle,
    Loading,
    Ready,
    CleanedUp,
    Error,
}

impl Status {
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Idle, Self::Loading | Self::Error | Self::CleanedUp)
                | (Self::Loading, Self::Ready | Self::Error | Self::CleanedUp)
                | (Self::Ready, Self::CleanedUp | Self::Error)
                | (Self::Error, Self::CleanedUp | Self::Idle)
                | (Self::CleanedUp, Self::Loading | Self::Error)
        )
    }
}

/// Validate and apply a transition, returning the new status or an
/// [`CollectionError::InvalidCollectionStatusTransition`].
pub fn transition(current: Status, to: Status) -> Result<Status> {
    if current.can_transition_to(to) {
        Ok(to)
    } else {
        Err(CollectionError::InvalidCollectionStatusTransition { from: current, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_is_reachable_only_from_loading() {
        assert!(Status::Loading.can_transition_to(Status::Ready));
        assert!(!Status::Idle.can_transition_to(Status::Ready));
        assert!(!Status::Ready.can_transition_to(Status::Idle));
    }

    #[test]
    fn error_recovers_to_idle_or_cleaned_up() {
        assert!(Status::Error.can_transition_to(Status::Idle));
        assert!(Status::Error.can_transition_to(Status::CleanedUp));
        assert!(!Status::Error.can_transition_to(Status::Ready));
    }

    #[test]
    fn invalid_transition_is_an_error() {
        assert!(transition(Status::Ready, Status::Idle).is_err());
    }
}
