//! Ownership
//!
//! Runs after every owned object has been staged. Each staged create or
//! update of an owned kind gets the component as its controller owner and
//! the operator finalizer. Both are add-if-absent.

use async_trait::async_trait;
use dbplane_common::store::labels_match;
use dbplane_common::{Result, COMPATIBILITY_LABELS};
use dbplane_graph::{Action, Dag, Flow, GraphClient, Transformer};
use tracing::trace;

use crate::context::ComponentTransformContext;

use super::is_owned_kind;

/// Sets owner references, finalizers and compatibility labels on staged objects
pub struct OwnershipTransformer;

#[async_trait]
impl Transformer<ComponentTransformContext> for OwnershipTransformer {
    fn name(&self) -> &'static str {
        "ownership"
    }

    async fn transform(&self, ctx: &mut ComponentTransformContext, dag: &mut Dag) -> Result<Flow> {
        let selector = ctx.synthesized()?.selector_labels();
        let owner = ctx.comp_orig.controller_owner_ref()?;
        let compatibility = ctx.config.features.compatibility_labels;

        let staged = GraphClient::new().find_matching(dag, |v| {
            matches!(v.action, Action::Create | Action::Update)
                && is_owned_kind(&v.object)
                && labels_match(&v.object, &selector)
        });
        for id in staged {
            let Some(vertex) = dag.vertex_mut(id) else {
                continue;
            };
            let object = &mut vertex.object;
            object.set_owner(&owner);
            object.add_finalizer(&ctx.config.finalizer);
            if compatibility {
                for (key, value) in COMPATIBILITY_LABELS {
                    object.set_label(key, value);
                }
            }
            trace!(object = %object.key(), "ownership assured");
        }
        Ok(Flow::Continue)
    }
}
