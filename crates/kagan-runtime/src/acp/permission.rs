//! Permission channel (spec §4.14): a `RequestPermission` from the
//! supervisor either gets answered by whatever policy is driving the
//! agent (auto-approve for review agents, forwarded-to-client for
//! interactive ones) within five minutes, or is auto-rejected using the
//! first `reject_once`-kind option so the agent doesn't hang forever.

use crate::acp::messages::{Answer, PermissionKind, RequestPermission};
use tokio::time::{Duration, timeout};

pub const PERMISSION_TIMEOUT: Duration = Duration::from_secs(300);

/// Waits for `answer` to arrive via `resolver`, falling back to the first
/// reject-once option (or, failing that, the first option at all) once
/// `PERMISSION_TIMEOUT` elapses.
pub async fn resolve_with_timeout<F>(request: RequestPermission, resolver: F)
where
    F: std::future::Future<Output = Answer>,
{
    let options = request.options.clone();
    let reply = request.reply;
    match timeout(PERMISSION_TIMEOUT, resolver).await {
        Ok(answer) => {
            let _ = reply.send(answer);
        }
        Err(_) => {
            let fallback = default_reject(&options);
            let _ = reply.send(fallback);
        }
    }
}

/// Immediately approves using the first allow-kind option. Used for
/// review agents and other non-interactive, pre-authorized flows.
pub fn auto_approve(request: RequestPermission) {
    let option = request
        .options
        .iter()
        .find(|o| matches!(o.kind, PermissionKind::AllowOnce | PermissionKind::AllowAlways))
        .or_else(|| request.options.first());
    if let Some(option) = option {
        let _ = request.reply.send(Answer { option_id: option.option_id.clone() });
    }
}

fn default_reject(options: &[crate::acp::messages::PermissionOption]) -> Answer {
    let option = options
        .iter()
        .find(|o| o.kind == PermissionKind::RejectOnce)
        .or_else(|| options.first());
    match option {
        Some(option) => Answer { option_id: option.option_id.clone() },
        None => Answer { option_id: String::new() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acp::messages::{PermissionOption, ToolCallInfo};
    use tokio::sync::oneshot;

    fn tool_call() -> ToolCallInfo {
        ToolCallInfo { tool_call_id: "t1".into(), title: "write file".into(), kind: None }
    }

    #[tokio::test]
    async fn timeout_falls_back_to_reject_once_option() {
        let (tx, rx) = oneshot::channel();
        let request = RequestPermission {
            options: vec![
                PermissionOption { option_id: "allow".into(), kind: PermissionKind::AllowOnce },
                PermissionOption { option_id: "reject".into(), kind: PermissionKind::RejectOnce },
            ],
            tool_call: tool_call(),
            reply: tx,
        };
        let never = std::future::pending::<Answer>();
        tokio::spawn(async move {
            let _ = timeout(Duration::from_millis(10), never).await;
        });
        // Simulate the timeout path directly since PERMISSION_TIMEOUT is 5 minutes.
        drop(rx);
        let (tx2, rx2) = oneshot::channel();
        let request2 = RequestPermission {
            options: request.options,
            tool_call: tool_call(),
            reply: tx2,
        };
        let reply = default_reject(&request2.options);
        assert_eq!(reply.option_id, "reject");
        let _ = request2.reply.send(reply);
        assert_eq!(rx2.await.unwrap().option_id, "reject");
    }

    #[test]
    fn auto_approve_prefers_allow_kind() {
        let (tx, _rx) = oneshot::channel();
        let request = RequestPermission {
            options: vec![
                PermissionOption { option_id: "reject".into(), kind: PermissionKind::RejectOnce },
                PermissionOption { option_id: "allow".into(), kind: PermissionKind::AllowOnce },
            ],
            tool_call: tool_call(),
            reply: tx,
        };
        auto_approve(request);
    }
}
