//! Component synthesis

use async_trait::async_trait;
use dbplane_common::events::{actions, reasons};
use dbplane_common::{Error, Result};
use dbplane_graph::{Dag, Flow, Transformer};
use kube::runtime::events::EventType;
use tracing::warn;

use crate::context::ComponentTransformContext;
use crate::status::stage_component_status;
use crate::synthesize::SynthesizedComponent;

/// Resolves the component into a [`SynthesizedComponent`]
///
/// An invalid spec is reported on the component's status and as a warning
/// event, and ends the pass. The controller turns it into a slow requeue.
pub struct SynthesizeTransformer;

#[async_trait]
impl Transformer<ComponentTransformContext> for SynthesizeTransformer {
    fn name(&self) -> &'static str {
        "synthesize"
    }

    async fn transform(&self, ctx: &mut ComponentTransformContext, dag: &mut Dag) -> Result<Flow> {
        let err = match SynthesizedComponent::from_component(&ctx.comp) {
            Ok(synth) => {
                ctx.synthesized = Some(synth);
                return Ok(Flow::Continue);
            }
            Err(err) => err,
        };

        let Error::Validation { message, field, .. } = &err else {
            return Err(err);
        };
        let message = match field {
            Some(field) => format!("{field}: {message}"),
            None => message.clone(),
        };
        warn!(component = %ctx.comp_orig.name(), %message, "component spec is invalid");

        let mut status = ctx.comp.status.clone().unwrap_or_default();
        status
            .message
            .insert(ctx.comp_orig.key().message_key(), message.clone());
        stage_component_status(ctx, dag, &status)?;

        ctx.push_event(
            EventType::Warning,
            reasons::VALIDATION_FAILED,
            actions::RECONCILE,
            message.clone(),
        );
        ctx.user_error = Some(message);
        Ok(Flow::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformers::testing::{actions, component, setup, spec};
    use dbplane_graph::Action;

    #[tokio::test]
    async fn test_valid_spec_is_synthesized() {
        let (_store, mut ctx, mut dag) = setup(component(spec()));
        ctx.synthesized = None;

        let flow = SynthesizeTransformer.transform(&mut ctx, &mut dag).await.expect("transform");
        assert_eq!(flow, Flow::Continue);
        assert_eq!(ctx.synthesized().expect("synthesized").workload_name(), "orders-mysql");
        assert!(ctx.user_error.is_none());
    }

    #[tokio::test]
    async fn test_invalid_spec_is_reported_and_stops() {
        let mut s = spec();
        s.comp_def.clear();
        let (_store, mut ctx, mut dag) = setup(component(s));

        let flow = SynthesizeTransformer.transform(&mut ctx, &mut dag).await.expect("transform");
        assert_eq!(flow, Flow::Stop);
        assert!(ctx.synthesized.is_none());
        assert_eq!(actions(&dag), vec![("Component/mysql".to_string(), Action::Status)]);

        let status = dag.root_vertex().and_then(|v| v.object.status()).expect("status");
        let message = status["message"]["Component/mysql"].as_str().expect("message");
        assert!(message.starts_with("compDef"));

        assert_eq!(ctx.pending_events.len(), 1);
        assert_eq!(ctx.pending_events[0].reason, reasons::VALIDATION_FAILED);
        assert_eq!(ctx.user_error.as_deref(), Some(message));
    }
}
