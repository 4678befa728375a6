use std::sync::{Mutex, MutexGuard, PoisonError};

/// Mutex-guarded state whose transitions run as closures under the lock.
///
/// A panic inside a transition poisons the mutex; the state is still handed out
/// afterwards because every field the console keeps is valid on its own.
///
/// # Example
///
/// ```rust
/// use remcon_common::state_machine::StateMachine;
///
/// #[derive(Debug, PartialEq)]
/// enum Link {
///     Down,
///     Up { frames: u32 },
/// }
///
/// let machine = StateMachine::new(Link::Down);
///
/// let accepted = machine.transition(|link| match link {
///     Link::Down => {
///         *link = Link::Up { frames: 0 };
///         true
///     }
///     Link::Up { .. } => false,
/// });
///
/// assert!(accepted);
/// assert_eq!(*machine.lock(), Link::Up { frames: 0 });
/// ```
#[derive(Debug)]
pub struct StateMachine<S> {
    state: Mutex<S>,
}

impl<S> StateMachine<S> {
    pub fn new(initial_state: S) -> Self {
        Self {
            state: Mutex::new(initial_state),
        }
    }

    /// Direct access for reads. Prefer [`StateMachine::transition`] for writes.
    pub fn lock(&self) -> MutexGuard<'_, S> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the state with the lock held and return its result.
    pub fn transition<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut state = self.lock();
        f(&mut *state)
    }

    /// Clone a value out of the state without holding the lock afterwards.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let state = self.lock();
        f(&*state)
    }
}
