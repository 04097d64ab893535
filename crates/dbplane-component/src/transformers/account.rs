//! System account secrets
//!
//! A password is generated once, when the account's secret is first
//! created, and read back from the live secret on every later pass. An
//! account may instead point at a user-provided secret, whose password is
//! copied.

use async_trait::async_trait;
use dbplane_common::object::api_resource;
use dbplane_common::{Error, ManagedObject, Result};
use dbplane_graph::{Dag, Flow, Transformer};
use k8s_openapi::api::core::v1::Secret;
use rand::Rng;
use tracing::{debug, info};

use crate::builder::PASSWORD_KEY;
use crate::context::ComponentTransformContext;

use super::stage_owned_set;

const PASSWORD_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const PASSWORD_LENGTH: usize = 24;

/// Stages one Secret per system account
pub struct AccountTransformer;

#[async_trait]
impl Transformer<ComponentTransformContext> for AccountTransformer {
    fn name(&self) -> &'static str {
        "account"
    }

    async fn transform(&self, ctx: &mut ComponentTransformContext, dag: &mut Dag) -> Result<Flow> {
        let synth = ctx.synthesized()?;
        let namespace = ctx.namespace();

        let mut desired = Vec::new();
        let mut waiting = Vec::new();
        for account in &synth.system_accounts {
            let secret_name = synth.account_secret_name(&account.name);
            let live: Option<Secret> = ctx.client.get_typed(namespace, &secret_name).await?;

            let password = match (live.as_ref().and_then(password_of), &account.secret_ref) {
                (Some(existing), _) => existing,
                (None, Some(reference)) => {
                    let provided: Option<Secret> = ctx.client.get_typed(namespace, reference).await?;
                    match provided.as_ref().and_then(password_of) {
                        Some(password) => password,
                        None => {
                            debug!(account = %account.name, secret = %reference, "referenced secret not ready");
                            waiting.push(reference.clone());
                            continue;
                        }
                    }
                }
                (None, None) => {
                    info!(component = %synth.name, account = %account.name, "generating account password");
                    generate_password()
                }
            };

            let secret = ctx.builder.build_account_secret(synth, account, &password)?;
            desired.push(ManagedObject::from_resource(&secret)?);
        }

        stage_owned_set(ctx, dag, &api_resource::<Secret>(), desired).await?;

        if !waiting.is_empty() {
            return Err(Error::delayed_requeue(
                ctx.config.requeue_after_transient,
                format!("waiting for account secrets: {}", waiting.join(", ")),
            ));
        }
        Ok(Flow::Continue)
    }
}

fn password_of(secret: &Secret) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(PASSWORD_KEY))
        .filter(|b| !b.0.is_empty())
        .map(|b| String::from_utf8_lossy(&b.0).into_owned())
}

// Kept synchronous: the thread-local rng must not live across an await.
fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    (0..PASSWORD_LENGTH)
        .map(|_| PASSWORD_CHARSET[rng.gen_range(0..PASSWORD_CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformers::testing::{actions, component, setup, spec};
    use dbplane_common::crd::SystemAccount;
    use dbplane_graph::Action;
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn with_account(secret_ref: Option<&str>) -> dbplane_common::crd::ComponentSpec {
        let mut s = spec();
        s.system_accounts = vec![SystemAccount {
            name: "root".to_string(),
            secret_ref: secret_ref.map(str::to_string),
        }];
        s
    }

    fn staged_password(dag: &Dag) -> String {
        let vertex = dag
            .vertices()
            .iter()
            .find(|v| v.object.kind() == "Secret")
            .expect("secret vertex");
        let secret: Secret = vertex.object.to_typed().expect("typed");
        password_of(&secret).expect("password")
    }

    #[test]
    fn test_generated_passwords_are_alphanumeric() {
        let a = generate_password();
        let b = generate_password();
        assert_eq!(a.len(), PASSWORD_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_creates_secret_with_generated_password() {
        let (_store, mut ctx, mut dag) = setup(component(with_account(None)));
        AccountTransformer.transform(&mut ctx, &mut dag).await.expect("transform");

        assert!(actions(&dag)
            .contains(&("Secret/orders-mysql-account-root".to_string(), Action::Create)));
        assert_eq!(staged_password(&dag).len(), PASSWORD_LENGTH);
    }

    #[tokio::test]
    async fn test_existing_password_is_never_regenerated() {
        let (store, mut ctx, mut dag) = setup(component(with_account(None)));
        let synth = ctx.synthesized().expect("synthesized").clone();
        let live = ctx
            .builder
            .build_account_secret(&synth, &synth.system_accounts[0], "keep-me")
            .expect("build");
        store.insert(ManagedObject::from_resource(&live).expect("convert"));

        AccountTransformer.transform(&mut ctx, &mut dag).await.expect("transform");
        assert!(!dag.has_effect());
    }

    #[tokio::test]
    async fn test_referenced_secret_password_is_copied() {
        let (store, mut ctx, mut dag) = setup(component(with_account(Some("root-creds"))));
        store.insert(
            ManagedObject::from_resource(&Secret {
                metadata: ObjectMeta {
                    name: Some("root-creds".to_string()),
                    namespace: Some("db".to_string()),
                    ..Default::default()
                },
                data: Some(BTreeMap::from([(
                    PASSWORD_KEY.to_string(),
                    ByteString(b"provided".to_vec()),
                )])),
                ..Default::default()
            })
            .expect("convert"),
        );

        AccountTransformer.transform(&mut ctx, &mut dag).await.expect("transform");
        assert_eq!(staged_password(&dag), "provided");
    }

    #[tokio::test]
    async fn test_missing_referenced_secret_requeues() {
        let (_store, mut ctx, mut dag) = setup(component(with_account(Some("root-creds"))));
        let err = AccountTransformer
            .transform(&mut ctx, &mut dag)
            .await
            .unwrap_err();
        assert!(err.is_delayed_requeue());
        assert!(!dag.has_effect());
    }
}
