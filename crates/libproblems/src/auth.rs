use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};

/// Outcome of an interactive authorization round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Granted,
    Denied,
}

pub type AgentFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<AuthDecision>> + Send + 'a>>;

/// External authorization agent consulted when a session asks for elevated
/// access. The broker never decides on its own; a session stays pending for
/// exactly as long as this future is in flight. An agent error is reported
/// as an authorization failure, not a denial.
pub trait AuthAgent: Send + Sync {
    fn request_authorization(&self, uid: u32, message: Option<String>) -> AgentFuture<'_>;
}

/// Agent that resolves every request immediately with a fixed decision.
pub struct StaticAgent {
    pub decision: AuthDecision,
}

impl AuthAgent for StaticAgent {
    fn request_authorization(&self, _uid: u32, _message: Option<String>) -> AgentFuture<'_> {
        let decision = self.decision;
        Box::pin(async move { Ok(decision) })
    }
}

/// One request pending on a [`ChannelAgent`].
pub struct PendingAuth {
    pub uid: u32,
    pub message: Option<String>,
    pub reply: oneshot::Sender<anyhow::Result<AuthDecision>>,
}

/// Agent that forwards every request over a channel so the embedder (or a
/// test) resolves it whenever it chooses.
pub struct ChannelAgent {
    requests: mpsc::UnboundedSender<PendingAuth>,
}

impl ChannelAgent {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingAuth>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { requests: tx }, rx)
    }
}

impl AuthAgent for ChannelAgent {
    fn request_authorization(&self, uid: u32, message: Option<String>) -> AgentFuture<'_> {
        let (reply, answer) = oneshot::channel();
        let sent = self
            .requests
            .send(PendingAuth {
                uid,
                message,
                reply,
            })
            .is_ok();
        Box::pin(async move {
            if !sent {
                anyhow::bail!("authorization agent is gone");
            }
            answer.await.map_err(|_| anyhow::anyhow!("authorization agent dropped the request"))?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_agent_resolves_immediately() {
        let agent = StaticAgent {
            decision: AuthDecision::Granted,
        };
        let decision = agent.request_authorization(1000, None).await.unwrap();
        assert_eq!(decision, AuthDecision::Granted);
    }

    #[tokio::test]
    async fn channel_agent_waits_for_the_resolver() {
        let (agent, mut rx) = ChannelAgent::new();
        let fut = agent.request_authorization(1000, Some("auth please".to_string()));

        let resolver = tokio::spawn(async move {
            let pending = rx.recv().await.expect("pending request");
            assert_eq!(pending.uid, 1000);
            assert_eq!(pending.message.as_deref(), Some("auth please"));
            pending.reply.send(Ok(AuthDecision::Denied)).ok();
        });

        let decision = fut.await.unwrap();
        assert_eq!(decision, AuthDecision::Denied);
        resolver.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_resolver_is_an_agent_error() {
        let (agent, rx) = ChannelAgent::new();
        drop(rx);
        assert!(agent.request_authorization(1000, None).await.is_err());
    }
}
