//! Trigger conditions gating suite items.
//!
//! A condition is evaluated once per suite item, immediately before the
//! item would execute, against state accumulated from the items that ran
//! before it. Evaluation is deterministic and never mutates that state.

use serde::{Deserialize, Serialize};

use crate::domain::{ConditionEvaluation, OutcomeClass, RiskLevel, SuiteRunItem};
use crate::error::ConfigError;

/// Rule deciding whether a suite item executes, tagged by
/// `trigger_condition_type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger_condition_type", rename_all = "snake_case")]
pub enum TriggerCondition {
    Always,
    RiskThreshold(RiskThreshold),
    SentimentShift(SentimentShift),
    KeywordMatch(KeywordMatch),
    OutcomeMatch(OutcomeMatch),
    AgentResponse(AgentResponse),
}

impl Default for TriggerCondition {
    fn default() -> Self {
        Self::Always
    }
}

impl TriggerCondition {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::RiskThreshold(_) => "risk_threshold",
            Self::SentimentShift(_) => "sentiment_shift",
            Self::KeywordMatch(_) => "keyword_match",
            Self::OutcomeMatch(_) => "outcome_match",
            Self::AgentResponse(_) => "agent_response",
        }
    }

    pub fn is_always(&self) -> bool {
        matches!(self, Self::Always)
    }

    /// The rule implementation selected by the tag
    pub fn rule(&self) -> &dyn TriggerRule {
        match self {
            Self::Always => &AlwaysRule,
            Self::RiskThreshold(r) => r,
            Self::SentimentShift(r) => r,
            Self::KeywordMatch(r) => r,
            Self::OutcomeMatch(r) => r,
            Self::AgentResponse(r) => r,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rule().validate()
    }
}

/// Behaviour every trigger condition type provides
pub trait TriggerRule {
    /// Check the parameters against this type's schema
    fn validate(&self) -> Result<(), ConfigError>;

    /// Decide whether the item runs
    fn evaluate(&self, state: &AccumulatedState) -> ConditionEvaluation;

    fn describe(&self) -> String;
}

/// Evaluate `condition` against `state`
pub fn evaluate(condition: &TriggerCondition, state: &AccumulatedState) -> ConditionEvaluation {
    condition.rule().evaluate(state)
}

/// Outcomes of the suite items executed so far
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccumulatedState {
    /// Highest risk level seen; `Low` when nothing ran yet
    pub highest_risk: RiskLevel,

    /// Risk level of the most recent executed item
    pub latest_risk: Option<RiskLevel>,

    /// Key findings of every executed item, newline separated
    pub findings_text: String,

    /// Summed sentiment delta
    pub sentiment_delta: f64,

    /// Outcome class of the most recent executed item
    pub last_outcome: Option<OutcomeClass>,

    pub responding_roles: Vec<String>,

    /// Number of executed items folded in
    pub items: usize,
}

impl AccumulatedState {
    /// Fold the completed and failed items, in order
    pub fn from_items(items: &[SuiteRunItem]) -> Self {
        let mut state = Self::default();
        let mut findings: Vec<&str> = Vec::new();

        for item in items.iter().filter(|i| i.is_executed()) {
            if let Some(risk) = item.risk_level {
                state.highest_risk = state.highest_risk.max(risk);
                state.latest_risk = Some(risk);
            }
            findings.extend(item.key_findings.iter().map(String::as_str));
            state.sentiment_delta += item.sentiment_delta;
            if item.outcome.is_some() {
                state.last_outcome = item.outcome;
            }
            for role in &item.responding_roles {
                if !state.responding_roles.iter().any(|r| r.eq_ignore_ascii_case(role)) {
                    state.responding_roles.push(role.clone());
                }
            }
            state.items += 1;
        }

        state.findings_text = findings.join("\n");
        state
    }
}

struct AlwaysRule;

impl TriggerRule for AlwaysRule {
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn evaluate(&self, _state: &AccumulatedState) -> ConditionEvaluation {
        ConditionEvaluation::met("always")
    }

    fn describe(&self) -> String {
        "always".to_string()
    }
}

/// Comparison operator for risk thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    #[serde(alias = ">=")]
    Gte,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = "==")]
    Eq,
    #[serde(alias = "<=")]
    Lte,
    #[serde(alias = "<")]
    Lt,
}

impl Default for Comparison {
    fn default() -> Self {
        Self::Gte
    }
}

impl Comparison {
    pub fn apply<T: Ord>(&self, lhs: T, rhs: T) -> bool {
        match self {
            Self::Gte => lhs >= rhs,
            Self::Gt => lhs > rhs,
            Self::Eq => lhs == rhs,
            Self::Lte => lhs <= rhs,
            Self::Lt => lhs < rhs,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Gte => ">=",
            Self::Gt => ">",
            Self::Eq => "==",
            Self::Lte => "<=",
            Self::Lt => "<",
        }
    }
}

/// Run when the accumulated risk compares favourably with a level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskThreshold {
    pub min_risk_level: RiskLevel,
    #[serde(default)]
    pub operator: Comparison,
}

impl TriggerRule for RiskThreshold {
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn evaluate(&self, state: &AccumulatedState) -> ConditionEvaluation {
        let detail = format!(
            "accumulated risk {} {} {}",
            state.highest_risk,
            self.operator.symbol(),
            self.min_risk_level
        );
        if self.operator.apply(state.highest_risk, self.min_risk_level) {
            ConditionEvaluation::met(detail)
        } else {
            ConditionEvaluation::unmet(detail)
        }
    }

    fn describe(&self) -> String {
        format!("risk {} {}", self.operator.symbol(), self.min_risk_level)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftDirection {
    Positive,
    Negative,
    Any,
}

impl Default for ShiftDirection {
    fn default() -> Self {
        Self::Any
    }
}

/// Run when sentiment moved in a direction, optionally by at least a floor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentShift {
    #[serde(default)]
    pub direction: ShiftDirection,
    #[serde(default)]
    pub min_magnitude: Option<f64>,
}

impl TriggerRule for SentimentShift {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.min_magnitude {
            Some(m) if !(m >= 0.0) => Err(ConfigError::new(
                "sentiment_shift",
                "min_magnitude must be a non-negative number",
            )),
            _ => Ok(()),
        }
    }

    fn evaluate(&self, state: &AccumulatedState) -> ConditionEvaluation {
        let delta = state.sentiment_delta;
        let detail = format!("sentiment delta {:+.3}", delta);

        // No movement is not a shift in any direction
        let direction_ok = match self.direction {
            ShiftDirection::Positive => delta > 0.0,
            ShiftDirection::Negative => delta < 0.0,
            ShiftDirection::Any => delta != 0.0,
        };
        let magnitude_ok = self
            .min_magnitude
            .map(|floor| delta.abs() >= floor)
            .unwrap_or(true);

        if direction_ok && magnitude_ok {
            ConditionEvaluation::met(detail)
        } else {
            ConditionEvaluation::unmet(detail)
        }
    }

    fn describe(&self) -> String {
        match self.min_magnitude {
            Some(m) => format!("sentiment shift {:?} by at least {}", self.direction, m),
            None => format!("sentiment shift {:?}", self.direction),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    Any,
    All,
}

impl Default for MatchMode {
    fn default() -> Self {
        Self::Any
    }
}

/// Run when accumulated findings mention the keywords
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordMatch {
    pub keywords: Vec<String>,
    #[serde(default)]
    pub mode: MatchMode,
    #[serde(default)]
    pub case_sensitive: bool,
}

impl TriggerRule for KeywordMatch {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.keywords.is_empty() {
            return Err(ConfigError::new("keyword_match", "keywords must not be empty"));
        }
        if self.keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::new("keyword_match", "keywords must not be blank"));
        }
        Ok(())
    }

    fn evaluate(&self, state: &AccumulatedState) -> ConditionEvaluation {
        let haystack = if self.case_sensitive {
            state.findings_text.clone()
        } else {
            state.findings_text.to_lowercase()
        };

        let found: Vec<&str> = self
            .keywords
            .iter()
            .filter(|k| {
                if self.case_sensitive {
                    haystack.contains(k.as_str())
                } else {
                    haystack.contains(&k.to_lowercase())
                }
            })
            .map(String::as_str)
            .collect();

        let met = match self.mode {
            MatchMode::Any => !found.is_empty(),
            MatchMode::All => found.len() == self.keywords.len(),
        };
        let detail = format!(
            "matched {}/{} keywords [{}]",
            found.len(),
            self.keywords.len(),
            found.join(", ")
        );

        if met {
            ConditionEvaluation::met(detail)
        } else {
            ConditionEvaluation::unmet(detail)
        }
    }

    fn describe(&self) -> String {
        format!("{:?} of [{}]", self.mode, self.keywords.join(", "))
    }
}

/// Run when the previous executed item ended with an outcome class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeMatch {
    pub expected: OutcomeClass,
}

impl TriggerRule for OutcomeMatch {
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn evaluate(&self, state: &AccumulatedState) -> ConditionEvaluation {
        match state.last_outcome {
            Some(outcome) if outcome == self.expected => {
                ConditionEvaluation::met(format!("previous outcome was {}", outcome))
            }
            Some(outcome) => ConditionEvaluation::unmet(format!(
                "previous outcome was {}, expected {}",
                outcome, self.expected
            )),
            None => ConditionEvaluation::unmet("no prior outcome"),
        }
    }

    fn describe(&self) -> String {
        format!("previous outcome is {}", self.expected)
    }
}

/// Run when an agent in a role has responded in an earlier item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub role: String,
}

impl TriggerRule for AgentResponse {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.role.trim().is_empty() {
            return Err(ConfigError::new("agent_response", "role must not be empty"));
        }
        Ok(())
    }

    fn evaluate(&self, state: &AccumulatedState) -> ConditionEvaluation {
        if state
            .responding_roles
            .iter()
            .any(|r| r.eq_ignore_ascii_case(self.role.trim()))
        {
            ConditionEvaluation::met(format!("{} responded", self.role))
        } else {
            ConditionEvaluation::unmet(format!("{} has not responded", self.role))
        }
    }

    fn describe(&self) -> String {
        format!("{} responded", self.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SuiteRunItemStatus;
    use uuid::Uuid;

    fn executed(risk: RiskLevel, findings: &[&str], sentiment: f64, roles: &[&str]) -> SuiteRunItem {
        let mut item = SuiteRunItem::pending(Uuid::new_v4(), Uuid::new_v4(), "prior".to_string(), 0);
        item.status = SuiteRunItemStatus::Completed;
        item.risk_level = Some(risk);
        item.key_findings = findings.iter().map(|s| s.to_string()).collect();
        item.sentiment_delta = sentiment;
        item.outcome = Some(OutcomeClass::Success);
        item.responding_roles = roles.iter().map(|s| s.to_string()).collect();
        item
    }

    fn state(items: &[SuiteRunItem]) -> AccumulatedState {
        AccumulatedState::from_items(items)
    }

    #[test]
    fn test_condition_yaml_tag() {
        let yaml = r#"
trigger_condition_type: risk_threshold
min_risk_level: high
"#;
        let condition: TriggerCondition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            condition,
            TriggerCondition::RiskThreshold(RiskThreshold {
                min_risk_level: RiskLevel::High,
                operator: Comparison::Gte,
            })
        );

        let always: TriggerCondition = serde_yaml::from_str("trigger_condition_type: always").unwrap();
        assert!(always.is_always());
    }

    #[test]
    fn test_risk_threshold_defaults_to_low() {
        let condition = TriggerCondition::RiskThreshold(RiskThreshold {
            min_risk_level: RiskLevel::High,
            operator: Comparison::Gte,
        });

        let empty = state(&[]);
        assert_eq!(empty.highest_risk, RiskLevel::Low);
        assert!(!evaluate(&condition, &empty).met);

        let hot = state(&[executed(RiskLevel::Critical, &[], 0.0, &[])]);
        assert!(evaluate(&condition, &hot).met);
    }

    #[test]
    fn test_risk_threshold_operators() {
        let s = state(&[executed(RiskLevel::Medium, &[], 0.0, &[])]);
        let check = |operator, level| {
            RiskThreshold {
                min_risk_level: level,
                operator,
            }
            .evaluate(&s)
            .met
        };

        assert!(check(Comparison::Eq, RiskLevel::Medium));
        assert!(check(Comparison::Lt, RiskLevel::High));
        assert!(!check(Comparison::Gt, RiskLevel::Medium));
        assert!(check(Comparison::Lte, RiskLevel::Medium));
    }

    #[test]
    fn test_keyword_match_modes() {
        let s = state(&[executed(
            RiskLevel::Low,
            &["Data Exfiltration detected", "legal notified"],
            0.0,
            &[],
        )]);

        let any = KeywordMatch {
            keywords: vec!["exfiltration".to_string(), "ransom".to_string()],
            mode: MatchMode::Any,
            case_sensitive: false,
        };
        assert!(any.evaluate(&s).met);

        let all = KeywordMatch {
            mode: MatchMode::All,
            ..any.clone()
        };
        assert!(!all.evaluate(&s).met);

        let sensitive = KeywordMatch {
            keywords: vec!["exfiltration".to_string()],
            mode: MatchMode::Any,
            case_sensitive: true,
        };
        assert!(!sensitive.evaluate(&s).met);
    }

    #[test]
    fn test_sentiment_shift() {
        let negative = state(&[executed(RiskLevel::Low, &[], -0.4, &[])]);
        let flat = state(&[executed(RiskLevel::Low, &[], 0.0, &[])]);

        let down = SentimentShift {
            direction: ShiftDirection::Negative,
            min_magnitude: Some(0.3),
        };
        assert!(down.evaluate(&negative).met);
        assert!(!down.evaluate(&flat).met);

        let large = SentimentShift {
            direction: ShiftDirection::Negative,
            min_magnitude: Some(0.5),
        };
        assert!(!large.evaluate(&negative).met);

        let any = SentimentShift {
            direction: ShiftDirection::Any,
            min_magnitude: None,
        };
        assert!(any.evaluate(&negative).met);
        assert!(!any.evaluate(&flat).met);
    }

    #[test]
    fn test_outcome_match() {
        let rule = OutcomeMatch {
            expected: OutcomeClass::Failure,
        };
        assert!(!rule.evaluate(&state(&[])).met);

        let mut failed = executed(RiskLevel::High, &[], 0.0, &[]);
        failed.status = SuiteRunItemStatus::Failed;
        failed.outcome = Some(OutcomeClass::Failure);
        let s = state(&[executed(RiskLevel::Low, &[], 0.0, &[]), failed]);
        assert!(rule.evaluate(&s).met);
    }

    #[test]
    fn test_agent_response_case_insensitive() {
        let s = state(&[executed(RiskLevel::Low, &[], 0.0, &["CISO", "legal"])]);
        assert!(AgentResponse { role: "ciso".to_string() }.evaluate(&s).met);
        assert!(!AgentResponse { role: "pr".to_string() }.evaluate(&s).met);
    }

    #[test]
    fn test_skipped_items_do_not_accumulate() {
        let mut skipped = executed(RiskLevel::Critical, &["breach"], 0.9, &["ciso"]);
        skipped.status = SuiteRunItemStatus::Skipped;

        let s = state(&[skipped]);
        assert_eq!(s, AccumulatedState::default());
    }

    #[test]
    fn test_validation() {
        let empty = TriggerCondition::KeywordMatch(KeywordMatch {
            keywords: Vec::new(),
            mode: MatchMode::Any,
            case_sensitive: false,
        });
        assert!(empty.validate().is_err());

        let negative = TriggerCondition::SentimentShift(SentimentShift {
            direction: ShiftDirection::Any,
            min_magnitude: Some(-1.0),
        });
        assert!(negative.validate().is_err());

        assert!(TriggerCondition::Always.validate().is_ok());
    }
}
