//! Data-driven rule tables
//!
//! A [`Rule`] is a pure check over one subject type. Rules are grouped into
//! [`RuleTable`]s kept sorted by a stable ordering key, and the
//! [`RuleRegistry`] holds one table per kind of subject.
//!
//! ## Evaluation
//!
//! Every rule runs, regardless of what earlier rules found. A rule marked
//! halting stops the rest of its table when it reports anything. A rule that
//! names a feature gate only runs while that gate is disabled; it detects
//! use of the gated feature and reports it.

use crate::error::RuleError;
use crate::field::FieldPath;
use crate::finding::Finding;
use serde::Serialize;
use std::fmt;
use std::time::Instant;
use tracing::debug;
use virt_types::migration::MigrationSpec;
use virt_types::{ClusterConfig, FeatureGate, ObjectMeta, VirtualMachineInstanceSpec, VirtualMachineSpec};

pub mod boot;
pub mod common;
pub mod cpu;
pub mod devices;
pub mod firmware;
pub mod gates;
pub mod hostname;
pub mod limits;
pub mod machine;
pub mod metadata;
pub mod migration;
pub mod network;
pub mod probes;
pub mod resources;
pub mod scheduling;
pub mod vm;
pub mod volumes;

/// Signature of a rule check
pub type CheckFn<T> = fn(&FieldPath, &T, &ClusterConfig) -> Vec<Finding>;

/// One registered check
pub struct Rule<T> {
    /// Unique id within the table, e.g. `resources.cpu_request_not_negative`
    pub id: &'static str,

    /// Ordering key; ties are broken by id
    pub order: u32,

    /// Gate whose absence this rule reports
    pub gate: Option<FeatureGate>,

    /// Stop the table when this rule reports findings
    pub halting: bool,

    pub check: CheckFn<T>,
}

impl<T> Rule<T> {
    /// A plain rule
    pub fn new(id: &'static str, order: u32, check: CheckFn<T>) -> Self {
        Self {
            id,
            order,
            gate: None,
            halting: false,
            check,
        }
    }

    /// Report usage of a feature behind a disabled gate
    pub fn gated(mut self, gate: FeatureGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Stop the table on findings
    pub fn halting(mut self) -> Self {
        self.halting = true;
        self
    }

    /// Whether the rule runs under the given configuration
    pub fn applies(&self, config: &ClusterConfig) -> bool {
        self.gate.map_or(true, |gate| !config.is_enabled(gate))
    }
}

impl<T> Clone for Rule<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            order: self.order,
            gate: self.gate,
            halting: self.halting,
            check: self.check,
        }
    }
}

impl<T> fmt::Debug for Rule<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("order", &self.order)
            .field("gate", &self.gate)
            .field("halting", &self.halting)
            .finish()
    }
}

/// Record of a single rule evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleEvaluationRecord {
    pub rule_id: String,
    pub findings: usize,
    /// The rule's gate was enabled
    pub skipped: bool,
    /// The rule stopped the table
    pub halted: bool,
    pub duration_us: u64,
}

/// Ordered set of rules over one subject type
pub struct RuleTable<T> {
    name: &'static str,
    rules: Vec<Rule<T>>,
}

impl<T> RuleTable<T> {
    /// An empty table
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            rules: Vec::new(),
        }
    }

    /// A table holding the given rules
    pub fn with_rules(name: &'static str, rules: Vec<Rule<T>>) -> Result<Self, RuleError> {
        let mut table = Self::new(name);
        for rule in rules {
            table.register(rule)?;
        }
        Ok(table)
    }

    /// Add a rule, keeping the table sorted
    pub fn register(&mut self, rule: Rule<T>) -> Result<(), RuleError> {
        if self.rules.iter().any(|r| r.id == rule.id) {
            return Err(RuleError::DuplicateRule {
                table: self.name.to_string(),
                id: rule.id.to_string(),
            });
        }
        self.rules.push(rule);
        self.rules.sort_by(|a, b| (a.order, a.id).cmp(&(b.order, b.id)));
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn rules(&self) -> &[Rule<T>] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run every applicable rule and collect findings in table order
    pub fn evaluate(&self, field: &FieldPath, subject: &T, config: &ClusterConfig) -> Vec<Finding> {
        self.evaluate_traced(field, subject, config).0
    }

    /// Run the table, also returning a record per rule
    pub fn evaluate_traced(
        &self,
        field: &FieldPath,
        subject: &T,
        config: &ClusterConfig,
    ) -> (Vec<Finding>, Vec<RuleEvaluationRecord>) {
        let mut findings = Vec::new();
        let mut records = Vec::with_capacity(self.rules.len());

        for rule in &self.rules {
            if !rule.applies(config) {
                records.push(RuleEvaluationRecord {
                    rule_id: rule.id.to_string(),
                    findings: 0,
                    skipped: true,
                    halted: false,
                    duration_us: 0,
                });
                continue;
            }

            let start = Instant::now();
            let found = (rule.check)(field, subject, config);
            let duration_us = start.elapsed().as_micros() as u64;
            let halted = rule.halting && !found.is_empty();

            if !found.is_empty() {
                debug!(
                    table = self.name,
                    rule = rule.id,
                    findings = found.len(),
                    halted,
                    "Rule reported findings"
                );
            }

            records.push(RuleEvaluationRecord {
                rule_id: rule.id.to_string(),
                findings: found.len(),
                skipped: false,
                halted,
                duration_us,
            });
            findings.extend(found);

            if halted {
                break;
            }
        }

        (findings, records)
    }
}

impl<T> fmt::Debug for RuleTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleTable")
            .field("name", &self.name)
            .field("rules", &self.rules)
            .finish()
    }
}

/// Rule tables keyed by subject
#[derive(Debug)]
pub struct RuleRegistry {
    /// Instance spec rules, shared by instances and VM templates
    pub vmi_spec: RuleTable<VirtualMachineInstanceSpec>,

    /// Rules that only apply to standalone instances
    pub vmi_extras: RuleTable<VirtualMachineInstanceSpec>,

    /// Object metadata rules
    pub metadata: RuleTable<ObjectMeta>,

    /// Virtual machine spec rules outside the template
    pub vm_spec: RuleTable<VirtualMachineSpec>,

    /// Migration spec rules
    pub migration: RuleTable<MigrationSpec>,
}

impl RuleRegistry {
    /// Registry with every built-in rule
    pub fn builtin() -> Result<Self, RuleError> {
        let mut vmi_spec = Vec::new();
        vmi_spec.extend(limits::rules());
        vmi_spec.extend(hostname::rules());
        vmi_spec.extend(resources::rules());
        vmi_spec.extend(machine::rules());
        vmi_spec.extend(cpu::rules());
        vmi_spec.extend(scheduling::rules());
        vmi_spec.extend(boot::rules());
        vmi_spec.extend(network::rules());
        vmi_spec.extend(devices::rules());
        vmi_spec.extend(probes::rules());
        vmi_spec.extend(firmware::rules());
        vmi_spec.extend(volumes::rules());
        vmi_spec.extend(gates::rules());

        Ok(Self {
            vmi_spec: RuleTable::with_rules("vmi_spec", vmi_spec)?,
            vmi_extras: RuleTable::with_rules("vmi_extras", volumes::instance_rules())?,
            metadata: RuleTable::with_rules("metadata", metadata::rules())?,
            vm_spec: RuleTable::with_rules("vm_spec", vm::rules())?,
            migration: RuleTable::with_rules("migration", migration::rules())?,
        })
    }
}
