//! Intent classification and commitment inference.
//!
//! The heuristic classifier always runs. [`OracleClassifier`] sits in front
//! of it and only consults the oracle for low-confidence results when the
//! turn budget allows.

use crate::budget::{AiCallBudget, CallKind};
use crate::narration::{NarrativeOracle, OracleCall, OraclePurpose};
use crate::sanitize::parse_intent;
use crate::text::{capitalize, normalize};
use crate::world::WorldState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// What the player is trying to do this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    LoreQuestion,
    FreeExploration,
    StoryAction,
    SocialAction,
    SystemCommand,
}

/// Modal strength of the player's statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Commitment {
    /// "Et si...", "what if": never mutates.
    Hypothetique,
    /// Questions: answered without mutation.
    Informatif,
    /// "J'ouvre la porte."
    Declaratif,
    /// "Je veux ouvrir la porte."
    Volitif,
}

impl Commitment {
    /// Whether this commitment may change the world.
    pub fn is_binding(self) -> bool {
        matches!(self, Commitment::Declaratif | Commitment::Volitif)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

/// Coarse verb family detected in the message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    #[default]
    None,
    Travel,
    Talk,
    Farewell,
    Physical,
    Observe,
}

/// A classified player message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    #[serde(rename = "type")]
    pub intent_type: IntentType,
    pub confidence: f32,
    pub requires_check: bool,
    pub risk_level: RiskLevel,
    pub commitment: Commitment,
    pub reason: String,
    #[serde(default)]
    pub action: ActionKind,
    /// Resolved target label, if any.
    #[serde(default)]
    pub target: Option<String>,
    /// The message points at someone through a pronoun ("je lui parle").
    #[serde(default)]
    pub pronoun_reference: bool,
}

impl Intent {
    fn new(intent_type: IntentType, confidence: f32, reason: &str) -> Self {
        Self {
            intent_type,
            confidence,
            requires_check: false,
            risk_level: RiskLevel::None,
            commitment: Commitment::Declaratif,
            reason: reason.to_string(),
            action: ActionKind::None,
            target: None,
            pronoun_reference: false,
        }
    }

    /// A safe default for unparseable input.
    pub fn fallback() -> Self {
        let mut intent = Self::new(IntentType::FreeExploration, 0.3, "fallback");
        intent.commitment = Commitment::Informatif;
        intent
    }
}

/// Who produced the final classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierSource {
    Heuristic,
    Oracle,
}

/// Classifier output.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub intent: Intent,
    pub source: ClassifierSource,
    pub oracle_error: Option<String>,
}

// =============================================================================
// Phrase tables (normalized)
// =============================================================================

const HYPOTHETICAL: &[&str] = &[
    "et si",
    "si jamais",
    "hypothetiquement",
    "imaginons",
    "supposons",
    "que se passerait",
    "que se passerait-il",
    "qu'arriverait",
    "qu'arriverait-il",
    "what if",
    "suppose",
    "hypothetically",
    "what would happen",
    "would it work if",
];

const QUESTION_OPENERS: &[&str] = &[
    "qui",
    "quoi",
    "que",
    "qu'est-ce",
    "ou",
    "ou est",
    "comment",
    "pourquoi",
    "quel",
    "quelle",
    "quels",
    "quelles",
    "combien",
    "est-ce",
    "parle-moi",
    "raconte-moi",
    "what",
    "who",
    "where",
    "why",
    "how",
    "which",
    "tell me about",
    "is there",
    "are there",
];

const VOLITIVE: &[&str] = &[
    "je veux",
    "je voudrais",
    "j'aimerais",
    "je souhaite",
    "je compte",
    "je vais essayer",
    "j'essaie",
    "i want",
    "i'd like",
    "i would like",
    "i wish",
    "let me",
    "i try",
];

const TRAVEL: &[&str] = &[
    "je vais a",
    "je vais au",
    "je vais aux",
    "je vais vers",
    "je vais chez",
    "aller a",
    "aller au",
    "aller aux",
    "aller vers",
    "aller chez",
    "me rendre a",
    "me rendre au",
    "je me rends a",
    "je me rends au",
    "je me rends chez",
    "je pars pour",
    "je pars vers",
    "je pars",
    "je m'en vais",
    "partir",
    "je retourne a",
    "je retourne au",
    "retourner a",
    "retourner au",
    "je rejoins",
    "rejoindre",
    "direction",
    "go to",
    "go to the",
    "travel to",
    "head to",
    "walk to",
    "return to",
    "move to",
];

const TALK: &[&str] = &[
    "parler a",
    "parler au",
    "parler avec",
    "je parle a",
    "je parle au",
    "je parle avec",
    "demander a",
    "demander au",
    "je demande a",
    "je demande au",
    "je m'adresse a",
    "je m'adresse au",
    "j'aborde",
    "aborder",
    "je salue",
    "saluer",
    "j'interpelle",
    "interpeller",
    "talk to",
    "talk with",
    "speak to",
    "speak with",
    "i ask",
    "i greet",
    "i approach",
];

const TALK_PRONOUN: &[&str] = &[
    "je lui parle",
    "je lui demande",
    "je lui dis",
    "je leur parle",
    "je leur demande",
    "lui parler",
    "lui demander",
    "talk to him",
    "talk to her",
    "talk to them",
    "ask him",
    "ask her",
    "ask them",
    "i ask him",
    "i ask her",
];

const FAREWELL: &[&str] = &[
    "au revoir",
    "adieu",
    "je prends conge",
    "je le quitte",
    "je la quitte",
    "je les quitte",
    "bonne journee",
    "a bientot",
    "goodbye",
    "farewell",
    "bye",
    "see you",
];

const PHYSICAL: &[&str] = &[
    "j'attaque",
    "attaquer",
    "je frappe",
    "frapper",
    "je poignarde",
    "poignarder",
    "je tue",
    "tuer",
    "je vole",
    "voler",
    "je menace",
    "menacer",
    "j'incendie",
    "incendier",
    "je force",
    "forcer",
    "je crochete",
    "crocheter",
    "je soudoie",
    "soudoyer",
    "j'enfonce",
    "enfoncer",
    "je casse",
    "casser",
    "je fouille",
    "fouiller",
    "je grimpe",
    "grimper",
    "je saute",
    "sauter",
    "j'ouvre",
    "ouvrir",
    "je prends",
    "prendre",
    "j'achete",
    "acheter",
    "je vends",
    "vendre",
    "je me cache",
    "je me faufile",
    "i attack",
    "attack",
    "i stab",
    "i kill",
    "kill",
    "i steal",
    "steal",
    "i threaten",
    "threaten",
    "i burn",
    "i force",
    "i pick",
    "i bribe",
    "bribe",
    "i break",
    "i search",
    "i climb",
    "i jump",
    "i open",
    "open",
    "i take",
    "i buy",
    "i sell",
    "i hide",
    "i sneak",
];

const OBSERVE: &[&str] = &[
    "je regarde",
    "j'observe",
    "observer",
    "regarder",
    "j'ecoute",
    "je scrute",
    "j'examine",
    "examiner",
    "je me promene",
    "je flane",
    "look around",
    "i look",
    "i observe",
    "i listen",
    "i examine",
    "i wander",
];

const HIGH_RISK: &[&str] = &[
    "j'attaque",
    "attaquer",
    "je frappe",
    "frapper",
    "je poignarde",
    "poignarder",
    "je tue",
    "tuer",
    "je vole",
    "voler",
    "je menace",
    "menacer",
    "j'incendie",
    "incendier",
    "mettre le feu",
    "i attack",
    "attack",
    "i stab",
    "i kill",
    "kill",
    "i steal",
    "steal",
    "i threaten",
    "threaten",
    "i burn",
];

const MEDIUM_RISK: &[&str] = &[
    "je force",
    "forcer",
    "je crochete",
    "crocheter",
    "je soudoie",
    "soudoyer",
    "j'enfonce",
    "enfoncer",
    "je casse",
    "casser",
    "je fouille",
    "fouiller",
    "je grimpe",
    "grimper",
    "je me cache",
    "je me faufile",
    "je mens",
    "mentir",
    "i force",
    "i pick",
    "i bribe",
    "bribe",
    "i break",
    "i search",
    "i climb",
    "i hide",
    "i sneak",
    "i lie",
];

const PRONOUNS: &[&str] = &[
    "lui", "elle", "il", "eux", "elles", "leur", "him", "her", "them", "it", "ca", "cela", "ceci",
    "celui-ci", "celle-ci", "celui-la", "celle-la", "y",
];

const ARTICLES: &[&str] = &[
    "le", "la", "les", "un", "une", "des", "du", "de", "the", "a", "an", "mon", "ma", "mes", "ce",
    "cette", "cet", "ces", "son", "sa", "ses",
];

const STOP_WORDS: &[&str] = &[
    "et", "puis", "pour", "afin", "avant", "apres", "mais", "and", "then", "before", "after", "but",
];

const MAX_TARGET_WORDS: usize = 5;

// =============================================================================
// Heuristic classifier
// =============================================================================

/// Whitespace tokens of a message, each paired with its folded form.
struct Tokens<'a> {
    original: Vec<&'a str>,
    folded: Vec<String>,
}

impl<'a> Tokens<'a> {
    fn new(message: &'a str) -> Self {
        let original: Vec<&str> = message.split_whitespace().collect();
        let folded = original
            .iter()
            .map(|t| {
                normalize(t)
                    .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'' && c != '-')
                    .to_string()
            })
            .collect();
        Self { original, folded }
    }

    /// Earliest occurrence of any phrase as whole tokens: `(start, end)`.
    fn find_any(&self, phrases: &[&str]) -> Option<(usize, usize)> {
        phrases
            .iter()
            .filter_map(|p| self.find(p))
            .min_by_key(|(start, end)| (*start, usize::MAX - end))
    }

    fn find(&self, phrase: &str) -> Option<(usize, usize)> {
        let words: Vec<&str> = phrase.split_whitespace().collect();
        if words.is_empty() || words.len() > self.folded.len() {
            return None;
        }
        (0..=self.folded.len() - words.len())
            .find(|&i| {
                words
                    .iter()
                    .enumerate()
                    .all(|(j, w)| self.folded[i + j] == *w)
            })
            .map(|i| (i, i + words.len()))
    }

    fn contains_any(&self, phrases: &[&str]) -> bool {
        self.find_any(phrases).is_some()
    }

    /// A clause opening with "si je" / "si j'...": "Si je saute, je tombe ?"
    /// counts, "je ne sais pas si je pars" does not.
    fn opens_with_conditional(&self) -> bool {
        self.folded.windows(2).enumerate().any(|(i, pair)| {
            let clause_start = i == 0
                || self.original[i - 1].ends_with(|c: char| matches!(c, '.' | '!' | '?' | ';' | ':'));
            clause_start && pair[0] == "si" && (pair[1] == "je" || pair[1].starts_with("j'"))
        })
    }

    /// Target phrase starting at token `from`, in the player's own spelling.
    ///
    /// Leading articles are stripped; extraction stops at punctuation, a
    /// connector word, or after a few words.
    fn target_after(&self, from: usize) -> Option<TargetPhrase> {
        let mut i = from;
        while i < self.folded.len() && ARTICLES.contains(&self.folded[i].as_str()) {
            i += 1;
        }
        let mut words: Vec<String> = Vec::new();
        let mut first_folded = None;
        while i < self.original.len() && words.len() < MAX_TARGET_WORDS {
            let folded = self.folded[i].as_str();
            if folded.is_empty() || STOP_WORDS.contains(&folded) {
                break;
            }
            let raw = self.original[i];
            let mut word = raw
                .trim_end_matches(|c: char| !c.is_alphanumeric())
                .trim_start_matches(|c: char| !c.is_alphanumeric())
                .to_string();
            if words.is_empty() {
                word = strip_elision(&word);
                first_folded = Some(strip_elision(folded));
            }
            if !word.is_empty() {
                words.push(word);
            }
            if raw.ends_with(|c: char| matches!(c, ',' | '.' | '!' | '?' | ';' | ':')) {
                break;
            }
            i += 1;
        }
        if words.is_empty() {
            return None;
        }
        let first = first_folded.unwrap_or_default();
        Some(TargetPhrase {
            label: capitalize(&words.join(" ")),
            is_pronoun: words.len() == 1 && PRONOUNS.contains(&first.as_str()),
        })
    }
}

struct TargetPhrase {
    label: String,
    is_pronoun: bool,
}

fn strip_elision(word: &str) -> String {
    for prefix in ["l'", "d'", "l\u{2019}", "d\u{2019}", "L'", "D'", "L\u{2019}", "D\u{2019}"] {
        if let Some(rest) = word.strip_prefix(prefix) {
            return rest.to_string();
        }
    }
    word.to_string()
}

/// Infer the commitment tier independently of the intent type.
pub fn infer_commitment(message: &str) -> Commitment {
    let tokens = Tokens::new(message);
    if tokens.contains_any(HYPOTHETICAL) || tokens.opens_with_conditional() {
        return Commitment::Hypothetique;
    }
    let asks = message.trim_end().ends_with('?')
        || tokens
            .find_any(QUESTION_OPENERS)
            .is_some_and(|(start, _)| start == 0);
    if tokens.contains_any(VOLITIVE) && !message.trim_end().ends_with('?') {
        return Commitment::Volitif;
    }
    if asks {
        return Commitment::Informatif;
    }
    Commitment::Declaratif
}

/// Risk of an action message.
pub fn infer_risk(message: &str) -> RiskLevel {
    let tokens = Tokens::new(message);
    if tokens.contains_any(HIGH_RISK) {
        RiskLevel::High
    } else if tokens.contains_any(MEDIUM_RISK) {
        RiskLevel::Medium
    } else if tokens.contains_any(PHYSICAL) || tokens.contains_any(TRAVEL) {
        RiskLevel::Low
    } else {
        RiskLevel::None
    }
}

/// Deterministic first-pass classifier. No external calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    pub fn classify(&self, message: &str, world: &WorldState) -> Intent {
        let trimmed = message.trim();
        if trimmed.starts_with('/') {
            let mut intent = Intent::new(IntentType::SystemCommand, 1.0, "slash command");
            intent.commitment = Commitment::Informatif;
            return intent;
        }
        if trimmed.is_empty() {
            return Intent::fallback();
        }

        let tokens = Tokens::new(trimmed);
        let commitment = infer_commitment(trimmed);
        let risk_level = infer_risk(trimmed);
        let (action, target, pronoun_reference) = detect_action(&tokens, world);

        let conversation = &world.conversation;
        let has_interlocutor = conversation.active_interlocutor.is_some();
        let (intent_type, confidence, reason) =
            if trimmed.contains('?') && !world.has_pending_gate() && !has_interlocutor {
                (IntentType::LoreQuestion, 0.7, "question outside any conversation")
            } else if world.has_pending_gate() {
                (IntentType::StoryAction, 0.75, "answer to an outstanding gate")
            } else if has_interlocutor {
                (IntentType::SocialAction, 0.7, "active interlocutor")
            } else {
                match action {
                    ActionKind::Travel | ActionKind::Physical => {
                        (IntentType::StoryAction, 0.65, "action verb")
                    }
                    ActionKind::Talk | ActionKind::Farewell => {
                        (IntentType::SocialAction, 0.65, "addressing someone")
                    }
                    ActionKind::Observe => (IntentType::FreeExploration, 0.6, "observation"),
                    ActionKind::None => (IntentType::FreeExploration, 0.5, "no action detected"),
                }
            };

        Intent {
            intent_type,
            confidence,
            requires_check: risk_level >= RiskLevel::Medium,
            risk_level,
            commitment,
            reason: reason.to_string(),
            action,
            target,
            pronoun_reference,
        }
    }
}

fn detect_action(tokens: &Tokens<'_>, world: &WorldState) -> (ActionKind, Option<String>, bool) {
    if tokens.contains_any(TALK_PRONOUN) {
        return (ActionKind::Talk, None, true);
    }

    let candidates = [
        (ActionKind::Farewell, FAREWELL),
        (ActionKind::Travel, TRAVEL),
        (ActionKind::Talk, TALK),
        (ActionKind::Physical, PHYSICAL),
        (ActionKind::Observe, OBSERVE),
    ];
    let found = candidates
        .iter()
        .filter_map(|(kind, phrases)| tokens.find_any(phrases).map(|span| (*kind, span)))
        .min_by_key(|(_, (start, end))| (*start, usize::MAX - end));

    let Some((kind, (_, end))) = found else {
        return (ActionKind::None, None, false);
    };

    match kind {
        ActionKind::Farewell => (kind, None, false),
        ActionKind::Travel => {
            let target = tokens.target_after(end).map(|t| {
                world
                    .place_by_label(&t.label)
                    .map(|p| p.label.clone())
                    .unwrap_or(t.label)
            });
            (kind, target, false)
        }
        _ => match tokens.target_after(end) {
            Some(t) if t.is_pronoun => (kind, None, true),
            Some(t) => (kind, Some(t.label), false),
            None => (kind, None, false),
        },
    }
}

// =============================================================================
// Strategies
// =============================================================================

/// A way of classifying a player message.
#[async_trait]
pub trait ClassifierStrategy: Send + Sync {
    async fn classify(
        &self,
        message: &str,
        world: &WorldState,
        budget: &mut AiCallBudget,
    ) -> Classification;
}

#[async_trait]
impl ClassifierStrategy for HeuristicClassifier {
    async fn classify(
        &self,
        message: &str,
        world: &WorldState,
        _budget: &mut AiCallBudget,
    ) -> Classification {
        Classification {
            intent: HeuristicClassifier::classify(self, message, world),
            source: ClassifierSource::Heuristic,
            oracle_error: None,
        }
    }
}

/// Oracle-assisted classification composed in front of the heuristic.
///
/// The oracle is asked only when the heuristic confidence is below
/// `threshold` and a fallback-kind call is available. Its answer is parsed
/// into the same enums; on any failure the heuristic result stands.
pub struct OracleClassifier {
    heuristic: HeuristicClassifier,
    oracle: Arc<dyn NarrativeOracle>,
    threshold: f32,
}

impl OracleClassifier {
    pub fn new(oracle: Arc<dyn NarrativeOracle>, threshold: f32) -> Self {
        Self {
            heuristic: HeuristicClassifier,
            oracle,
            threshold,
        }
    }
}

#[async_trait]
impl ClassifierStrategy for OracleClassifier {
    async fn classify(
        &self,
        message: &str,
        world: &WorldState,
        budget: &mut AiCallBudget,
    ) -> Classification {
        let heuristic = self.heuristic.classify(message, world);
        let unchanged = |oracle_error: Option<String>| Classification {
            intent: heuristic.clone(),
            source: ClassifierSource::Heuristic,
            oracle_error,
        };

        if heuristic.intent_type == IntentType::SystemCommand
            || heuristic.confidence >= self.threshold
        {
            return unchanged(None);
        }
        if !budget.try_consume(OraclePurpose::Classify.label(), CallKind::Fallback) {
            debug!("classifier oracle skipped, budget exhausted");
            return unchanged(None);
        }

        let call = OracleCall::new(
            OraclePurpose::Classify,
            json!({
                "message": message,
                "world": world.summary(),
                "heuristic": heuristic,
            }),
        );
        let value = match self.oracle.call(&call).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "classifier oracle failed, keeping heuristic");
                return unchanged(Some(e.to_string()));
            }
        };

        match parse_intent(&value) {
            Ok(mut intent) => {
                if intent.target.is_none() {
                    intent.target = heuristic.target.clone();
                }
                if intent.action == ActionKind::None {
                    intent.action = heuristic.action;
                }
                intent.pronoun_reference |= heuristic.pronoun_reference;
                // A conditional phrasing is never promoted to a commitment.
                if heuristic.commitment == Commitment::Hypothetique {
                    intent.commitment = Commitment::Hypothetique;
                }
                debug!(
                    from = ?heuristic.intent_type,
                    to = ?intent.intent_type,
                    "oracle classification override"
                );
                Classification {
                    intent,
                    source: ClassifierSource::Oracle,
                    oracle_error: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "oracle classification rejected");
                unchanged(Some(e.to_string()))
            }
        }
    }
}
