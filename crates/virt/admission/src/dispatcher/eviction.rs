//! Eviction admitter
//!
//! Evicting the launcher pod of an instance that should live-migrate away
//! from its node would kill the guest. Such evictions are turned into an
//! evacuation instead: the instance is marked with the node it must leave
//! and the eviction itself is denied with 429 so the caller retries later.
//!
//! This is the only admitter with a side effect. The evacuation patch is
//! issued at most once per request and never on dry-run.

use super::{Admitter, Verdict};
use crate::context::AdmissionContext;
use crate::envelope::{AdmissionRequest, Operation, ResourceKind, CODE_TOO_MANY_REQUESTS};
use crate::error::{AdmissionError, Result};
use crate::field::FieldPath;
use crate::finding::{Finding, ValidationOutcome};
use crate::lookup::ResourceLookup;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use virt_types::cluster::eviction_strategy;
use virt_types::vmi::CONDITION_MIGRATABLE;
use virt_types::{ClusterConfig, Eviction, VirtualMachineInstance};

const KIND: &str = "Eviction";

/// Turns launcher pod evictions into evacuations
#[derive(Debug, Clone)]
pub struct EvictionAdmitter {
    lookup: Arc<dyn ResourceLookup>,
}

impl EvictionAdmitter {
    pub fn new(lookup: Arc<dyn ResourceLookup>) -> Self {
        Self { lookup }
    }
}

/// Whether evicting the instance's pod should evacuate it instead
fn should_evacuate(vmi: &VirtualMachineInstance, config: &ClusterConfig) -> bool {
    let strategy = vmi
        .spec
        .eviction_strategy
        .as_deref()
        .or(config.eviction_strategy.as_deref());
    match strategy {
        Some(eviction_strategy::LIVE_MIGRATE) | Some(eviction_strategy::EXTERNAL) => true,
        Some(eviction_strategy::LIVE_MIGRATE_IF_POSSIBLE) => vmi
            .status
            .condition(CONDITION_MIGRATABLE)
            .is_some_and(|c| c.status == "True"),
        _ => false,
    }
}

fn evacuation_message(vmi: &VirtualMachineInstance) -> String {
    format!(
        "Eviction triggered evacuation of VMI \"{}/{}\"",
        vmi.metadata.namespace, vmi.metadata.name
    )
}

fn server_error(message: String) -> Verdict {
    ValidationOutcome::from_findings(vec![Finding::server_error(&FieldPath::root(), message)]).into()
}

#[async_trait]
impl Admitter for EvictionAdmitter {
    fn id(&self) -> &str {
        "eviction"
    }

    fn name(&self) -> &str {
        "Pod Eviction Admitter"
    }

    fn applies_to(&self, kind: &ResourceKind, operation: Operation) -> bool {
        *kind == ResourceKind::Eviction && operation == Operation::Create
    }

    async fn admit(
        &self,
        request: &AdmissionRequest,
        ctx: &AdmissionContext,
        config: &ClusterConfig,
    ) -> Result<Verdict> {
        if request.kind != ResourceKind::Eviction {
            return Err(AdmissionError::UnexpectedKind {
                expected: ResourceKind::Eviction.resource_name().to_string(),
            });
        }

        // The pod is named by the request; the body only repeats it
        let pod = if request.name.is_empty() {
            let eviction: Eviction = virt_types::decode(KIND, &request.object)?;
            eviction.metadata.name
        } else {
            request.name.clone()
        };

        let vmi = match self.lookup.vmi_for_pod(&request.namespace, &pod).await {
            Ok(Some(vmi)) => vmi,
            Ok(None) => return Ok(Verdict::allow()),
            Err(err) => {
                warn!(pod = %pod, error = %err, "Launcher pod lookup failed");
                return Ok(server_error(format!("could not look up the instance of pod {pod}: {err}")));
            }
        };

        if !should_evacuate(&vmi, config) {
            return Ok(Verdict::allow());
        }
        let Some(node) = vmi.status.node_name.as_deref().filter(|n| !n.is_empty()) else {
            return Ok(Verdict::allow());
        };

        let message = evacuation_message(&vmi);
        if vmi.status.evacuation_node_name.is_some() {
            debug!(request_id = %ctx.request_id, vmi = %vmi.metadata.name, "Evacuation already in progress");
            return Ok(Verdict::denied(CODE_TOO_MANY_REQUESTS, message));
        }
        if ctx.dry_run {
            return Ok(Verdict::denied(CODE_TOO_MANY_REQUESTS, message));
        }

        match self
            .lookup
            .patch_evacuation(&vmi.metadata.namespace, &vmi.metadata.name, node)
            .await
        {
            Ok(()) => {
                info!(
                    request_id = %ctx.request_id,
                    vmi = %vmi.metadata.name,
                    node = %node,
                    "Eviction triggered evacuation"
                );
                Ok(Verdict::denied(CODE_TOO_MANY_REQUESTS, message))
            }
            Err(err) if err.is_not_found() => Ok(Verdict::allow()),
            Err(err) => {
                warn!(vmi = %vmi.metadata.name, error = %err, "Evacuation patch failed");
                Ok(server_error(format!("could not mark VMI for evacuation: {err}")))
            }
        }
    }
}
