//! The per-atom generate → compile → classify → repair loop.
//!
//! Hottest code path in the system. Each atom gets at most three oracle
//! round-trips (the initial generation included) and three deterministic
//! repair passes per compile. Diagnostics in the merge-phase categories are
//! filtered out before re-prompting; if nothing else remains, the fragment
//! is accepted.

use tokio_util::sync::CancellationToken;

use crate::atom::{Atom, AtomStatus, FailureCause};
use crate::compile::CompileContext;
use crate::config::ATOM_ROUND_TRIPS;
use crate::contract::FrozenCatalog;
use crate::diagnostics::{filter_for_regeneration, Diagnostic};
use crate::error::{Error, Result};
use crate::oracle::OracleClient;
use crate::prompt::{amplified_prompt, generation_prompt, repair_prompt, DependencyView, PromptContext};
use crate::repair::repair_fragment;
use crate::schemas::{FragmentResponse, SchemaKind};
use crate::syntax::{emit_signatures, parse_unit};

/// Terminal result of processing one atom.
#[derive(Clone, Debug)]
pub struct AtomOutcome {
    pub atom_id: String,
    pub status: AtomStatus,
    pub fragment: String,
    pub type_contract_extract: String,
    pub summary: String,
    pub diagnostics: Vec<Diagnostic>,
    pub retry_count: u32,
    pub validation_attempt_count: u32,
    pub failure_cause: Option<FailureCause>,
}

impl AtomOutcome {
    fn failed(atom_id: &str, diagnostics: Vec<Diagnostic>, retries: u32, validations: u32) -> Self {
        Self {
            atom_id: atom_id.to_string(),
            status: AtomStatus::Failed,
            fragment: String::new(),
            type_contract_extract: String::new(),
            summary: String::new(),
            diagnostics,
            retry_count: retries,
            validation_attempt_count: validations,
            failure_cause: Some(FailureCause::BudgetExhausted),
        }
    }
}

/// Drives single atoms to a terminal state.
#[derive(Clone)]
pub struct AtomPipeline {
    oracle: OracleClient,
}

impl AtomPipeline {
    pub fn new(oracle: OracleClient) -> Self {
        Self { oracle }
    }

    /// Process one atom to completion or failure.
    ///
    /// Only cancellation bubbles as an error; oracle exhaustion and
    /// unrepairable diagnostics produce a `Failed` outcome that the
    /// scheduler absorbs.
    pub async fn process(
        &self,
        atom: &Atom,
        catalog: &FrozenCatalog,
        dependencies: &[&Atom],
        cancel: &CancellationToken,
    ) -> Result<AtomOutcome> {
        let prompt_ctx = PromptContext {
            catalog,
            dependencies: dependencies
                .iter()
                .map(|atom| DependencyView { atom: *atom })
                .collect(),
        };
        let extracts: Vec<String> = dependencies
            .iter()
            .map(|d| d.type_contract_extract.clone())
            .collect();
        let compile_ctx = CompileContext {
            catalog,
            dependency_extracts: &extracts,
            owned_types: &atom.expected_types,
        };

        let mut retry_count = 0u32;
        let mut validation_attempts = 0u32;
        let mut prompt = generation_prompt(atom, &prompt_ctx);
        let mut last_diagnostics: Vec<Diagnostic> = Vec::new();

        while retry_count < ATOM_ROUND_TRIPS {
            let response = match self
                .oracle
                .generate::<FragmentResponse>(&prompt, SchemaKind::Fragment, cancel)
                .await
            {
                Ok(response) => response,
                Err(Error::Canceled) => return Err(Error::Canceled),
                Err(err) => {
                    tracing::warn!(atom = %atom.id, error = %err, "oracle gave up on fragment");
                    return Ok(AtomOutcome::failed(
                        &atom.id,
                        last_diagnostics,
                        retry_count + 1,
                        validation_attempts,
                    ));
                }
            };
            retry_count += 1;

            if response.code.trim().is_empty() {
                tracing::warn!(atom = %atom.id, attempt = retry_count, "oracle returned an empty fragment");
                last_diagnostics = vec![Diagnostic::from_code(
                    "CS1001",
                    "the generated fragment is empty",
                    Default::default(),
                )];
                prompt = repair_prompt(atom, &prompt_ctx, &response.code, &last_diagnostics);
                continue;
            }

            let repaired = repair_fragment(&response.code, &compile_ctx);
            validation_attempts += 1;
            if !repaired.applied.is_empty() {
                tracing::debug!(
                    atom = %atom.id,
                    rewrites = repaired.applied.len(),
                    passes = repaired.passes,
                    "auto-repair pass finished"
                );
            }

            // Merge-phase categories are stripped before deciding: they are
            // resolved deterministically later and must not burn a retry.
            let remaining = filter_for_regeneration(&repaired.output.diagnostics);
            if remaining.is_empty() {
                let extract = match parse_unit(&repaired.source) {
                    Ok(unit) => emit_signatures(&unit),
                    Err(_) => String::new(),
                };
                let summary = if response.summary.is_empty() {
                    format!("Generated {} for task {}", atom.expected_types.join(", "), atom.id)
                } else {
                    response.summary
                };
                tracing::info!(
                    atom = %atom.id,
                    round_trips = retry_count,
                    validations = validation_attempts,
                    "atom completed"
                );
                return Ok(AtomOutcome {
                    atom_id: atom.id.clone(),
                    status: AtomStatus::Completed,
                    fragment: repaired.source,
                    type_contract_extract: extract,
                    summary,
                    diagnostics: repaired.output.diagnostics,
                    retry_count,
                    validation_attempt_count: validation_attempts,
                    failure_cause: None,
                });
            }

            last_diagnostics = repaired.output.diagnostics.clone();
            tracing::warn!(
                atom = %atom.id,
                attempt = retry_count,
                unfixable = remaining.len(),
                "fragment still has unrepairable errors"
            );

            // The final round-trip gets the amplified prompt.
            prompt = if retry_count == ATOM_ROUND_TRIPS - 1 {
                amplified_prompt(atom, &prompt_ctx, &repaired.source, &remaining)
            } else {
                repair_prompt(atom, &prompt_ctx, &repaired.source, &remaining)
            };
        }

        tracing::warn!(atom = %atom.id, "retry budget exhausted");
        Ok(AtomOutcome::failed(
            &atom.id,
            last_diagnostics,
            retry_count,
            validation_attempts,
        ))
    }
}
