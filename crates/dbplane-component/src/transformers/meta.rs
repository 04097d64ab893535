//! Root metadata assurance

use async_trait::async_trait;
use dbplane_common::{Result, COMPONENT_DEFINITION_LABEL};
use dbplane_graph::{Action, Dag, Flow, GraphClient, Transformer};
use tracing::debug;

use crate::context::ComponentTransformContext;

/// Ensures the component carries the operator finalizer and its definition label
///
/// A change is written on its own and ends the pass; the write triggers the
/// next one.
pub struct MetaTransformer;

#[async_trait]
impl Transformer<ComponentTransformContext> for MetaTransformer {
    fn name(&self) -> &'static str {
        "meta"
    }

    async fn transform(&self, ctx: &mut ComponentTransformContext, dag: &mut Dag) -> Result<Flow> {
        let mut updated = ctx.comp_orig.clone();
        let mut changed = updated.add_finalizer(&ctx.config.finalizer);
        if !ctx.comp.spec.comp_def.is_empty() {
            changed |= updated.set_label(COMPONENT_DEFINITION_LABEL, &ctx.comp.spec.comp_def);
        }
        if !changed {
            return Ok(Flow::Continue);
        }

        debug!(component = %ctx.comp_orig.name(), "assuring component metadata");
        GraphClient::new().root(dag, ctx.comp_orig.clone(), updated, Action::Update)?;
        Ok(Flow::Stop)
    }
}
