//! Who may do what in support chat.
//!
//! Role rules live in one table. Per-session ownership (is this the
//! customer's conversation, is this the assigned agent) is checked by
//! [`can_view_session`] and [`can_post_to_session`].

use crate::{
    error::ChatError,
    identity::{Caller, CallerRole},
    types::{ChatSession, SenderRole, SessionStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    OpenConversation,
    SendCustomerMessage,
    UploadCustomerAttachment,
    PollUnread,
    MarkRead,
    ViewHistory,
    JoinChannel,
    ViewQueue,
    ClaimSession,
    CloseSession,
    SendAgentMessage,
    UploadAgentAttachment,
}

use Action::*;
use CallerRole::*;

const POLICY: &[(Action, &[CallerRole])] = &[
    (OpenConversation, &[Guest, Customer]),
    (SendCustomerMessage, &[Guest, Customer]),
    (UploadCustomerAttachment, &[Guest, Customer]),
    (PollUnread, &[Guest, Customer]),
    (MarkRead, &[Guest, Customer]),
    (ViewHistory, &[Guest, Customer, Agent]),
    (JoinChannel, &[Guest, Customer, Agent]),
    (ViewQueue, &[Agent]),
    (ClaimSession, &[Agent]),
    (CloseSession, &[Agent]),
    (SendAgentMessage, &[Agent]),
    (UploadAgentAttachment, &[Agent]),
];

pub fn is_allowed(role: CallerRole, action: Action) -> bool {
    POLICY
        .iter()
        .find(|(entry, _)| *entry == action)
        .is_some_and(|(_, roles)| roles.contains(&role))
}

pub fn check(caller: &Caller, action: Action) -> Result<(), ChatError> {
    if is_allowed(caller.role, action) {
        Ok(())
    } else {
        tracing::debug!(caller = %caller.id, ?action, "action denied by policy");
        Err(ChatError::forbidden("you are not allowed to do that"))
    }
}

/// Customers see their own conversations. Agents see the waiting queue and
/// whatever is assigned to them.
pub fn can_view_session(caller: &Caller, session: &ChatSession) -> bool {
    match caller.role {
        Guest | Customer => session.customer_key == caller.customer_key(),
        Agent => {
            session.status == SessionStatus::Waiting
                || session.assigned_agent_id.as_deref() == Some(caller.id.as_str())
        }
    }
}

/// Writers must own the conversation: its customer, or its assigned agent.
pub fn can_post_to_session(sender_id: &str, role: SenderRole, session: &ChatSession) -> bool {
    match role {
        SenderRole::Customer => session.customer_key == sender_id,
        SenderRole::Agent => session.assigned_agent_id.as_deref() == Some(sender_id),
        SenderRole::System => true,
    }
}

pub fn ensure_can_view(caller: &Caller, session: &ChatSession) -> Result<(), ChatError> {
    if can_view_session(caller, session) {
        Ok(())
    } else {
        Err(ChatError::forbidden("you don't have access to this chat"))
    }
}
