//! Session state: append-only history, iteration counter and status machine.

use thiserror::Error;

use crate::core::types::{Message, SessionStatus};

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid session transition {from} -> {to}")]
pub struct TransitionError {
    pub from: SessionStatus,
    pub to: SessionStatus,
}

/// One build session, owned by the driver for its lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    id: String,
    description: String,
    messages: Vec<Message>,
    iteration: u32,
    status: SessionStatus,
}

impl Session {
    /// Start a session with the system prompt and the user's description.
    pub fn new(id: impl Into<String>, description: impl Into<String>, system_prompt: &str) -> Self {
        let description = description.into();
        Self {
            id: id.into(),
            messages: vec![Message::system(system_prompt), Message::user(description.clone())],
            description,
            iteration: 0,
            status: SessionStatus::Planning,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Append a message. History is never rewritten.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Count one oracle consultation.
    pub fn begin_iteration(&mut self) -> u32 {
        self.iteration += 1;
        self.iteration
    }

    /// Move to `next`, enforcing the session state machine.
    ///
    /// ```text
    /// Planning  -> Executing | Aborted | Failed
    /// Executing -> Planning  | Completed
    /// ```
    pub fn transition(&mut self, next: SessionStatus) -> Result<(), TransitionError> {
        use SessionStatus::{Aborted, Completed, Executing, Failed, Planning};
        let allowed = matches!(
            (self.status, next),
            (Planning, Executing | Aborted | Failed) | (Executing, Planning | Completed)
        );
        if !allowed {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;

    fn session() -> Session {
        Session::new("session-1", "a todo app", "you build apps")
    }

    #[test]
    fn new_session_seeds_system_and_user_messages() {
        let s = session();
        assert_eq!(s.status(), SessionStatus::Planning);
        assert_eq!(s.iteration(), 0);
        let roles: Vec<Role> = s.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User]);
        assert_eq!(s.description(), "a todo app");
    }

    #[test]
    fn completion_goes_through_executing() {
        let mut s = session();
        s.transition(SessionStatus::Executing).expect("execute");
        s.transition(SessionStatus::Completed).expect("complete");
        assert!(s.is_terminal());
    }

    #[test]
    fn terminal_states_reject_every_transition() {
        for terminal in [SessionStatus::Aborted, SessionStatus::Failed] {
            let mut s = session();
            s.transition(terminal).expect("terminate");
            for next in [
                SessionStatus::Planning,
                SessionStatus::Executing,
                SessionStatus::Completed,
            ] {
                assert!(s.transition(next).is_err());
            }
            assert_eq!(s.status(), terminal);
        }
    }

    #[test]
    fn planning_cannot_complete_directly() {
        let mut s = session();
        let err = s.transition(SessionStatus::Completed).expect_err("invalid");
        assert_eq!(err.from, SessionStatus::Planning);
        assert_eq!(s.status(), SessionStatus::Planning);
    }

    #[test]
    fn iterations_are_monotonic() {
        let mut s = session();
        assert_eq!(s.begin_iteration(), 1);
        assert_eq!(s.begin_iteration(), 2);
        assert_eq!(s.iteration(), 2);
    }
}
