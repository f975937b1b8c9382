//! Caller identity as handed over by the authentication layer in front of
//! this service. Nothing here verifies credentials.

use axum::http::HeaderMap;

use crate::{
    error::ChatError,
    types::{CustomerIdentity, Participant, SenderRole},
};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const GUEST_TOKEN_HEADER: &str = "x-guest-token";

const GUEST_DISPLAY_NAME: &str = "Guest";
const GUEST_KEY_PREFIX: &str = "guest:";
const CUSTOMER_KEY_PREFIX: &str = "customer:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallerRole {
    Guest,
    Customer,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub role: CallerRole,
}

impl Caller {
    pub fn guest(token: impl Into<String>) -> Self {
        Self {
            id: token.into(),
            display_name: GUEST_DISPLAY_NAME.to_string(),
            email: None,
            role: CallerRole::Guest,
        }
    }

    pub fn customer(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            email: None,
            role: CallerRole::Customer,
        }
    }

    pub fn agent(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            email: None,
            role: CallerRole::Agent,
        }
    }

    /// The key conversations are filed under. Guest tokens and user ids
    /// live in separate namespaces so a token can never name a customer.
    pub fn customer_key(&self) -> String {
        match self.role {
            CallerRole::Guest => format!("{GUEST_KEY_PREFIX}{}", self.id),
            CallerRole::Customer => format!("{CUSTOMER_KEY_PREFIX}{}", self.id),
            CallerRole::Agent => self.id.clone(),
        }
    }

    pub fn as_customer(&self) -> CustomerIdentity {
        CustomerIdentity {
            key: self.customer_key(),
            customer_id: (self.role == CallerRole::Customer).then(|| self.id.clone()),
            display_name: self.display_name.clone(),
            email: self.email.clone(),
        }
    }

    pub fn sender_role(&self) -> SenderRole {
        match self.role {
            CallerRole::Agent => SenderRole::Agent,
            CallerRole::Guest | CallerRole::Customer => SenderRole::Customer,
        }
    }

    /// Customers write under their conversation key, agents under their id.
    pub fn as_participant(&self) -> Participant {
        Participant::new(self.customer_key(), self.display_name.clone())
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub fn caller_from_headers(headers: &HeaderMap) -> Result<Caller, ChatError> {
    let display_name = header_value(headers, USER_NAME_HEADER);

    if let Some(user_id) = header_value(headers, USER_ID_HEADER) {
        let role = match header_value(headers, USER_ROLE_HEADER)
            .map(|role| role.to_ascii_lowercase())
            .as_deref()
        {
            Some("agent") | Some("supportagent") | Some("support_agent") => CallerRole::Agent,
            None | Some("customer") => CallerRole::Customer,
            Some(other) => {
                return Err(ChatError::forbidden(format!(
                    "role {other:?} has no access to support chat"
                )))
            }
        };
        return Ok(Caller {
            display_name: display_name.unwrap_or_else(|| user_id.clone()),
            id: user_id,
            email: header_value(headers, USER_EMAIL_HEADER),
            role,
        });
    }

    let token = header_value(headers, GUEST_TOKEN_HEADER).ok_or_else(|| {
        ChatError::Unauthenticated("missing user id or guest session token".to_string())
    })?;
    let mut caller = Caller::guest(token);
    if let Some(name) = display_name {
        caller.display_name = name;
    }
    Ok(caller)
}
