pub mod audit_events;
pub mod chat_messages;
pub mod chat_sessions;
pub mod content_policies;
pub mod kids;
pub mod prompt_requests;
pub mod violation_attempts;
