use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    canonical::canonicalize_json,
    config::SessionConfig,
    domain::{
        audit::{AuditEvent, AuditEventKind},
        hypothesis::{RootSeed, H_UND_ID},
        types::EvidenceBundle,
    },
    engine::session::{run_session, SessionRequest, SessionResult},
    error::{audit_failure, internal_error, invalid_request, EngineError},
    ports::{Clock, RunSessionDeps, SystemClock},
};

pub const SIMPLE_CLAIM_PROFILE: &str = "simple_v1";
pub const H_YES_ID: &str = "H_YES";
pub const H_NO_ID: &str = "H_NO";

const DEFAULT_SIMPLE_CREDITS: u64 = 12;

#[derive(Debug, Clone, Default)]
pub struct SimpleClaimOptions {
    pub credits: Option<u64>,
    pub config: Option<SessionConfig>,
    pub evidence: Option<EvidenceBundle>,
    /// Externally calibrated confidence. When it sits below the process
    /// confidence the opinion is projected down to it, never up.
    pub calibrated_confidence: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimpleClaimLabel {
    Yes,
    No,
    Underdetermined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleClaimOpinion {
    pub label: SimpleClaimLabel,
    pub root_id: String,
    pub credence: f64,
    pub confidence: f64,
    pub process_confidence: f64,
    #[serde(default)]
    pub calibrated_confidence: Option<f64>,
    pub tie_epsilon: f64,
    pub reason: String,
    pub scores: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimpleClaimResult {
    pub session: SessionResult,
    pub opinion: SimpleClaimOpinion,
}

/// The binary-claim policy bundle: a tighter frontier band, a light VOI
/// weight, and the three-slot obligation template.
pub fn simple_claim_config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.epsilon = 0.05;
    config.lambda_voi = 0.10;
    config.profile = SIMPLE_CLAIM_PROFILE.to_string();
    config.required_slots = vec![
        "availability".to_string(),
        "fit_to_key_features".to_string(),
        "defeater_resistance".to_string(),
    ];
    config
}

fn clean_claim(claim: &str) -> String {
    claim.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Frames a free-text claim as the two-root set H_YES / H_NO over the
/// standard absorbers.
pub fn build_simple_claim_request(
    claim: &str,
    options: &SimpleClaimOptions,
) -> Result<SessionRequest, EngineError> {
    let clean = clean_claim(claim);
    if clean.is_empty() {
        return Err(invalid_request("claim must be non-empty"));
    }
    let config = options.config.clone().unwrap_or_else(simple_claim_config);
    let roots = vec![
        RootSeed {
            root_id: H_YES_ID.to_string(),
            statement: clean.clone(),
            exclusion_clause:
                "Not explained by H_NO; unresolved uncertainty belongs in H_UND.".to_string(),
            components: Vec::new(),
            story_cardinality: None,
        },
        RootSeed {
            root_id: H_NO_ID.to_string(),
            statement: format!("It is not the case that: {clean}"),
            exclusion_clause:
                "Not explained by H_YES; unresolved uncertainty belongs in H_UND.".to_string(),
            components: Vec::new(),
            story_cardinality: None,
        },
    ];
    Ok(SessionRequest {
        claim: format!("Simple claim evaluation: {clean}"),
        roots,
        evidence: options.evidence.clone(),
        mece_assessments: Vec::new(),
        config,
        credits: options.credits.unwrap_or(DEFAULT_SIMPLE_CREDITS),
    })
}

/// Opinion over the final ledger: YES / NO by the highest mass, or
/// UNDERDETERMINED when the top two sit within the tie epsilon. Confidence
/// is the opinion root's k_root; an underdetermined opinion carries the
/// weaker of the two sides.
fn derive_opinion(
    yes_p: f64,
    no_p: f64,
    und_p: f64,
    yes_k: f64,
    no_k: f64,
    tie_epsilon: f64,
) -> SimpleClaimOpinion {
    let mut ranked = [(yes_p, H_YES_ID), (no_p, H_NO_ID), (und_p, H_UND_ID)];
    ranked.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(b.1))
    });
    let (top_p, top_id) = ranked[0];
    let second_p = ranked[1].0;
    let tie_detected = (top_p - second_p).abs() <= tie_epsilon;

    let (label, root_id, credence, reason) = if tie_detected {
        (
            SimpleClaimLabel::Underdetermined,
            H_UND_ID,
            und_p,
            "top_two_within_tie_epsilon",
        )
    } else {
        match top_id {
            H_YES_ID => (
                SimpleClaimLabel::Yes,
                H_YES_ID,
                yes_p,
                "highest_ledger_probability",
            ),
            H_NO_ID => (
                SimpleClaimLabel::No,
                H_NO_ID,
                no_p,
                "highest_ledger_probability",
            ),
            _ => (
                SimpleClaimLabel::Underdetermined,
                H_UND_ID,
                und_p,
                "highest_ledger_probability",
            ),
        }
    };

    let confidence = if root_id == H_YES_ID {
        yes_k
    } else if root_id == H_NO_ID {
        no_k
    } else {
        yes_k.min(no_k)
    };

    let mut scores = BTreeMap::new();
    scores.insert(H_YES_ID.to_string(), yes_p);
    scores.insert(H_NO_ID.to_string(), no_p);
    scores.insert(H_UND_ID.to_string(), und_p);

    SimpleClaimOpinion {
        label,
        root_id: root_id.to_string(),
        credence,
        confidence,
        process_confidence: confidence,
        calibrated_confidence: None,
        tie_epsilon,
        reason: reason.to_string(),
        scores,
    }
}

/// Binary YES/NO convenience use case over the standard engine: frames the
/// claim, runs a full session, derives an opinion from the final ledger,
/// and optionally projects confidence down onto an external calibration.
/// The extra events extend the session's audit trace in sequence.
pub async fn run_simple_claim_session(
    claim: &str,
    options: SimpleClaimOptions,
    deps: &RunSessionDeps,
) -> Result<SimpleClaimResult, EngineError> {
    let request = build_simple_claim_request(claim, &options)?;
    let clean = clean_claim(claim);
    let tie_epsilon = request.config.epsilon;
    let credits = request.credits;
    let tau = request.config.tau;

    let mut session = run_session(request, deps).await?;

    let clock: Arc<dyn Clock> = deps
        .clock
        .clone()
        .unwrap_or_else(|| Arc::new(SystemClock));
    let ts = clock.now_ms();

    append_trailing_event(
        &mut session,
        deps,
        ts,
        AuditEventKind::SimpleClaimModeUsed,
        &clean,
        json!({
            "profile": SIMPLE_CLAIM_PROFILE,
            "claim": clean,
            "roots": [H_YES_ID, H_NO_ID, H_UND_ID],
            "credits": credits,
            "tau": tau,
        }),
    )?;

    let yes_p = session.ledger.get(H_YES_ID).copied().unwrap_or(0.0);
    let no_p = session.ledger.get(H_NO_ID).copied().unwrap_or(0.0);
    let und_p = session.ledger.get(H_UND_ID).copied().unwrap_or(0.0);
    let yes_k = session
        .roots
        .get(H_YES_ID)
        .map(|root| root.k_root)
        .unwrap_or(0.15);
    let no_k = session
        .roots
        .get(H_NO_ID)
        .map(|root| root.k_root)
        .unwrap_or(0.15);

    let mut opinion = derive_opinion(yes_p, no_p, und_p, yes_k, no_k, tie_epsilon);

    if let Some(calibrated) = options.calibrated_confidence {
        let projected = opinion.process_confidence.min(calibrated);
        opinion.calibrated_confidence = Some(calibrated);
        if projected < opinion.process_confidence {
            append_trailing_event(
                &mut session,
                deps,
                ts,
                AuditEventKind::ConfidenceProjectedConservatively,
                &opinion.root_id,
                json!({
                    "process_confidence": opinion.process_confidence,
                    "calibrated_confidence": calibrated,
                    "projected_confidence": projected,
                }),
            )?;
        }
        opinion.confidence = projected;
    }

    let opinion_payload = serde_json::to_value(&opinion)
        .map_err(|err| internal_error(format!("failed to serialize opinion: {err}")))?;
    append_trailing_event(
        &mut session,
        deps,
        ts,
        AuditEventKind::SimpleClaimOpinionDerived,
        &opinion.root_id,
        opinion_payload,
    )?;

    Ok(SimpleClaimResult { session, opinion })
}

fn append_trailing_event(
    session: &mut SessionResult,
    deps: &RunSessionDeps,
    ts: u64,
    kind: AuditEventKind,
    target_id: &str,
    payload: serde_json::Value,
) -> Result<(), EngineError> {
    let event = AuditEvent {
        seq: session.audit.len() as u64,
        ts,
        kind,
        target_id: target_id.to_string(),
        payload: canonicalize_json(&payload),
        credits_before: session.credits_remaining,
        credits_after: session.credits_remaining,
    };
    deps.audit_sink
        .append(&event)
        .map_err(|err| audit_failure(format!("audit sink append failed: {err}")))?;
    session.audit.push(event);
    Ok(())
}
