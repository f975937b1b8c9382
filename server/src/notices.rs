use minijinja::{context, Environment, Value};

const AGENT_JOINED_TEMPLATE: &str = include_str!("templates/agent_joined.j2");
const CONVERSATION_CLOSED_TEMPLATE: &str = include_str!("templates/conversation_closed.j2");
const ATTACHMENT_SENT_TEMPLATE: &str = include_str!("templates/attachment_sent.j2");

fn render(name: &str, source: &str, ctx: Value) -> Option<String> {
    let mut env = Environment::new();
    env.add_template(name, source).ok()?;
    let template = env.get_template(name).ok()?;
    let rendered = template.render(ctx).ok()?;
    let rendered = rendered.trim();
    if rendered.is_empty() {
        None
    } else {
        Some(rendered.to_string())
    }
}

pub fn agent_joined(agent_name: &str) -> String {
    render(
        "agent_joined",
        AGENT_JOINED_TEMPLATE,
        context! { agent_name => agent_name.trim() },
    )
    .unwrap_or_else(|| format!("{} has joined the conversation", agent_name.trim()))
}

pub fn conversation_closed() -> String {
    render(
        "conversation_closed",
        CONVERSATION_CLOSED_TEMPLATE,
        context! {},
    )
    .unwrap_or_else(|| "This conversation has been closed".to_string())
}

pub fn attachment_sent(file_name: &str) -> String {
    render(
        "attachment_sent",
        ATTACHMENT_SENT_TEMPLATE,
        context! { file_name => file_name },
    )
    .unwrap_or_else(|| format!("Sent attachment: {file_name}"))
}
