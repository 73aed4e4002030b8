//! Scene-frame continuity guard.
//!
//! Oracle drafts are validated against the narrative stage and the scene
//! frame before they reach the player. A rejected draft is regenerated at
//! most once; if that is still invalid the guard assembles a deterministic
//! reply from the last valid fragments and the frame anchors.

use crate::budget::AiCallBudget;
use crate::narration::{call_budgeted, NarrativeDraft, NarrativeOracle, OracleCall, OraclePurpose};
use crate::sanitize::parse_narrative_draft;
use crate::text::{contains_any, normalize};
use crate::world::{NarrativeStage, ReplyFragments, SceneFrame, WorldState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Validation rounds allowed: the first draft plus one regeneration.
pub const MAX_VALIDATION_ROUNDS: u8 = 2;

const ARRIVAL_PHRASES: &[&str] = &[
    "tu arrives",
    "vous arrivez",
    "tu es arrive",
    "tu es arrivee",
    "vous etes arrive",
    "vous etes arrives",
    "te voici arrive",
    "te voila arrive",
    "vous voila arrives",
    "tu atteins",
    "vous atteignez",
    "you arrive",
    "you have arrived",
    "you've arrived",
    "you reach",
];

const UPDATE_CLAIMS: &[&str] = &[
    "mis a jour",
    "mise a jour",
    "est maintenant a jour",
    "etat du monde change",
    "is now updated",
    "has been updated",
    "state updated",
];

const ENTRY_PHRASES: &[&str] = &[
    "tu entres",
    "vous entrez",
    "tu franchis",
    "vous franchissez",
    "on te laisse passer",
    "on vous laisse passer",
    "you enter",
    "you step inside",
    "you are let in",
];

/// What a draft did wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Arrival narrated while the trip is only proposed.
    PrematureArrival,
    /// Claims a state update that did not happen.
    PhantomUpdate,
    /// Entry narrated while the access challenge is unresolved.
    PrematureEntry,
    /// Drift reported by the oracle check.
    FrameDrift,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub kind: ViolationKind,
    pub detail: String,
}

impl Violation {
    fn new(kind: ViolationKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// What a draft is validated against.
#[derive(Debug, Clone, Copy)]
pub struct ContinuityContext<'a> {
    pub stage: NarrativeStage,
    pub frame: &'a SceneFrame,
    /// Whether this turn actually changed the world.
    pub state_updated: bool,
}

impl<'a> ContinuityContext<'a> {
    pub fn for_world(world: &'a WorldState, state_updated: bool) -> Self {
        Self {
            stage: world.narrative_stage(),
            frame: &world.conversation.scene_frame,
            state_updated,
        }
    }
}

/// Validator output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Verdict {
    pub violations: Vec<Violation>,
    pub oracle_error: Option<String>,
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Checks a draft for continuity violations.
#[async_trait]
pub trait ContinuityValidator: Send + Sync {
    async fn validate(
        &self,
        draft: &NarrativeDraft,
        ctx: &ContinuityContext<'_>,
        budget: &mut AiCallBudget,
    ) -> Verdict;
}

// =============================================================================
// Validators
// =============================================================================

/// Phrase checks against the narrative stage. No oracle involved.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicValidator;

impl DeterministicValidator {
    /// Violations found in `text`.
    pub fn check_text(&self, text: &str, ctx: &ContinuityContext<'_>) -> Vec<Violation> {
        let text = normalize(text);
        let mut violations = Vec::new();
        if ctx.stage == NarrativeStage::TravelProposal && contains_any(&text, ARRIVAL_PHRASES) {
            violations.push(Violation::new(
                ViolationKind::PrematureArrival,
                "arrival narrated before the trip was confirmed",
            ));
        }
        if ctx.stage == NarrativeStage::AccessChallenge && contains_any(&text, ENTRY_PHRASES) {
            violations.push(Violation::new(
                ViolationKind::PrematureEntry,
                "entry narrated before access was granted",
            ));
        }
        if !ctx.state_updated && contains_any(&text, UPDATE_CLAIMS) {
            violations.push(Violation::new(
                ViolationKind::PhantomUpdate,
                "claims a state update that did not happen",
            ));
        }
        violations
    }
}

#[async_trait]
impl ContinuityValidator for DeterministicValidator {
    async fn validate(
        &self,
        draft: &NarrativeDraft,
        ctx: &ContinuityContext<'_>,
        _budget: &mut AiCallBudget,
    ) -> Verdict {
        Verdict {
            violations: self.check_text(&draft.visible_text(), ctx),
            oracle_error: None,
        }
    }
}

/// Deterministic checks, then an oracle drift check when the draft passed
/// them and the budget allows.
pub struct OracleDriftValidator {
    deterministic: DeterministicValidator,
    oracle: Arc<dyn NarrativeOracle>,
}

impl OracleDriftValidator {
    pub fn new(oracle: Arc<dyn NarrativeOracle>) -> Self {
        Self {
            deterministic: DeterministicValidator,
            oracle,
        }
    }
}

#[async_trait]
impl ContinuityValidator for OracleDriftValidator {
    async fn validate(
        &self,
        draft: &NarrativeDraft,
        ctx: &ContinuityContext<'_>,
        budget: &mut AiCallBudget,
    ) -> Verdict {
        let verdict = self.deterministic.validate(draft, ctx, budget).await;
        if !verdict.is_valid() {
            return verdict;
        }

        let call = OracleCall::new(
            OraclePurpose::ContinuityCheck,
            json!({
                "sceneFrame": ctx.frame,
                "narrativeStage": ctx.stage,
                "reply": draft.visible_text(),
            }),
        );
        let value = match call_budgeted(self.oracle.as_ref(), budget, &call).await {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "continuity oracle check skipped");
                return Verdict {
                    violations: Vec::new(),
                    oracle_error: Some(e.to_string()),
                };
            }
        };

        Verdict {
            violations: drift_violations(&value),
            oracle_error: None,
        }
    }
}

/// Read `{"valid", "violations"}`. Anything unreadable counts as valid.
fn drift_violations(value: &Value) -> Vec<Violation> {
    if value.get("valid").and_then(Value::as_bool) != Some(false) {
        return Vec::new();
    }
    let details: Vec<Violation> = value
        .get("violations")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .take(4)
                .map(|s| Violation::new(ViolationKind::FrameDrift, crate::text::truncate_chars(s.trim(), 160)))
                .collect()
        })
        .unwrap_or_default();
    if details.is_empty() {
        vec![Violation::new(ViolationKind::FrameDrift, "drift from the scene frame")]
    } else {
        details
    }
}

// =============================================================================
// Guard
// =============================================================================

/// How the guard settled a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuityReport {
    /// Validation rounds run.
    pub attempts: u8,
    pub violations: Vec<Violation>,
    pub regenerated: bool,
    pub fallback_used: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub oracle_errors: Vec<String>,
}

/// The accepted draft and how it was reached.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardOutcome {
    pub draft: NarrativeDraft,
    pub report: ContinuityReport,
}

/// What the guard needs to ask for a rewrite.
pub struct Regeneration<'a> {
    pub oracle: &'a dyn NarrativeOracle,
    /// The context document the rejected draft was produced from.
    pub context: &'a Value,
}

enum Step {
    Validate { draft: NarrativeDraft, round: u8 },
    Regenerate { rejected: NarrativeDraft },
    Accept(NarrativeDraft),
    Fallback,
}

/// Runs `Draft -> Validate -> {Accept | Regenerate -> Validate -> {Accept | Fallback}}`.
pub struct ContinuityGuard {
    validator: Arc<dyn ContinuityValidator>,
}

impl Default for ContinuityGuard {
    fn default() -> Self {
        Self::new(Arc::new(DeterministicValidator))
    }
}

impl ContinuityGuard {
    pub fn new(validator: Arc<dyn ContinuityValidator>) -> Self {
        Self { validator }
    }

    pub async fn settle(
        &self,
        draft: NarrativeDraft,
        ctx: &ContinuityContext<'_>,
        last_valid: &ReplyFragments,
        regeneration: Option<Regeneration<'_>>,
        budget: &mut AiCallBudget,
    ) -> GuardOutcome {
        let mut report = ContinuityReport::default();
        let mut step = Step::Validate { draft, round: 1 };

        let draft = loop {
            step = match step {
                Step::Validate { draft, round } => {
                    report.attempts = round;
                    let mut verdict = self.validator.validate(&draft, ctx, budget).await;
                    report.oracle_errors.extend(verdict.oracle_error.take());
                    if verdict.is_valid() {
                        Step::Accept(draft)
                    } else {
                        warn!(
                            round,
                            violations = verdict.violations.len(),
                            "continuity violation"
                        );
                        report.violations.extend(verdict.violations);
                        if round < MAX_VALIDATION_ROUNDS {
                            Step::Regenerate { rejected: draft }
                        } else {
                            Step::Fallback
                        }
                    }
                }
                Step::Regenerate { rejected } => {
                    match self.regenerate(&rejected, &report.violations, regeneration.as_ref(), budget).await {
                        Ok(draft) => {
                            report.regenerated = true;
                            Step::Validate { draft, round: report.attempts + 1 }
                        }
                        Err(reason) => {
                            report.oracle_errors.push(reason);
                            Step::Fallback
                        }
                    }
                }
                Step::Accept(draft) => break draft,
                Step::Fallback => {
                    report.fallback_used = true;
                    break fallback_draft(ctx, last_valid);
                }
            };
        };

        GuardOutcome { draft, report }
    }

    async fn regenerate(
        &self,
        rejected: &NarrativeDraft,
        violations: &[Violation],
        regeneration: Option<&Regeneration<'_>>,
        budget: &mut AiCallBudget,
    ) -> Result<NarrativeDraft, String> {
        let Some(regeneration) = regeneration else {
            return Err("no oracle to regenerate with".to_string());
        };
        let call = OracleCall::new(
            OraclePurpose::Regenerate,
            json!({
                "context": regeneration.context,
                "rejectedReply": rejected,
                "violations": violations,
            }),
        );
        let value = call_budgeted(regeneration.oracle, budget, &call)
            .await
            .map_err(|e| e.to_string())?;
        let draft = parse_narrative_draft(&value).map_err(|e| e.to_string())?;
        if draft.is_empty() {
            return Err("regenerated reply is empty".to_string());
        }
        Ok(draft)
    }
}

/// Frame-anchored reply built without the oracle.
///
/// Last valid fragments are reused only when they pass the deterministic
/// checks for the current stage.
pub fn fallback_draft(ctx: &ContinuityContext<'_>, last_valid: &ReplyFragments) -> NarrativeDraft {
    let checker = DeterministicValidator;
    let usable = |text: &str| !text.trim().is_empty() && checker.check_text(text, ctx).is_empty();
    let frame = ctx.frame;

    let scene = if usable(&last_valid.scene) {
        last_valid.scene.clone()
    } else {
        format!("Tu te trouves à {}.", frame.location_label)
    };

    let mut anchors = Vec::new();
    if let Some(poi) = &frame.active_poi_label {
        anchors.push(format!("Ton attention reste sur {poi}."));
    }
    if let Some(interlocutor) = &frame.active_interlocutor_label {
        anchors.push(format!("{interlocutor} attend ta réponse."));
    }
    if let Some(topic) = &frame.active_topic {
        anchors.push(format!("Il est toujours question de {topic}."));
    }
    match ctx.stage {
        NarrativeStage::TravelProposal => {
            anchors.push("Le départ attend ta confirmation.".to_string());
        }
        NarrativeStage::AccessChallenge => {
            anchors.push("On attend toujours ta réponse avant de te laisser passer.".to_string());
        }
        NarrativeStage::ActionConfirmation => {
            anchors.push("Ton action attend ta confirmation.".to_string());
        }
        NarrativeStage::Exploration | NarrativeStage::Conversation => {}
    }

    let action_result = if usable(&last_valid.action_result) {
        last_valid.action_result.clone()
    } else {
        String::new()
    };
    let consequences = last_valid
        .consequences
        .iter()
        .filter(|c| usable(c))
        .cloned()
        .collect();

    NarrativeDraft {
        scene: format!("{} {}", scene, anchors.join(" ")).trim().to_string(),
        action_result,
        consequences,
        confidence: 1.0,
        ..Default::default()
    }
}
