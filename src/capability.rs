//! Agent Capability Interface (C2).
//!
//! A capability is anything that can turn an [`Input`](crate::message::Input)
//! into an [`Output`](crate::message::Output). Agent "intelligence" is
//! explicitly out of scope — this crate only defines the contract and the
//! small number of built-in capabilities (verifier, router, auto-debugger)
//! needed to drive the refinement and routing loops end to end.

use async_trait::async_trait;

use crate::error::Result;
use crate::message::{Input, Output};

/// A single pluggable unit of work. Implementors own no mutable state that
/// outlives a call — any state that must persist across invocations goes
/// through the [`crate::store`] layer instead.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier used in logs and persisted decisions, e.g.
    /// `"quality.verifier"`.
    fn id(&self) -> &str;

    /// Run the capability against a single input, producing exactly one
    /// output or a [`crate::error::CoordinationError::CapabilityFailure`].
    async fn invoke(&self, input: Input) -> Result<Output>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AgentId, Context, DataMap, Phase};
    use uuid::Uuid;

    struct Echo;

    #[async_trait]
    impl Agent for Echo {
        fn id(&self) -> &str {
            "test.echo"
        }

        async fn invoke(&self, input: Input) -> Result<Output> {
            Output::respond_to(&input, true, DataMap::new(), "echoed", 1.0, vec![], DataMap::new())
        }
    }

    #[tokio::test]
    async fn echo_capability_correlates_with_its_input() {
        let agent_id = AgentId::new("test.echo").unwrap();
        let input = Input::new(agent_id, Uuid::new_v4(), Phase::Implementation, DataMap::new(), Context::new());
        let echo = Echo;
        let output = echo.invoke(input.clone()).await.unwrap();
        assert!(output.correlates_with(&input));
        assert_eq!(echo.id(), "test.echo");
    }
}
