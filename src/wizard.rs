//! Multi-step brief form with completion gating and a submission guard.
//!
//! The wizard never talks to the network. It only decides whether the
//! collected answers may be handed to the submission gate, and it makes sure
//! a submission can only come from an explicit submit action on the last
//! step.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::AppError;
use crate::jobs::{BriefPayload, Language};

/// Minimum length of the target audience description.
const MIN_AUDIENCE_CHARS: usize = 20;

// ─────────────────────────────────────────────────────────────────────────────
// Fields and steps
// ─────────────────────────────────────────────────────────────────────────────

/// Input fields of the brief form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Field {
    CompanyName,
    Sector,
    Tone,
    Language,
    TargetAudience,
    AdditionalInfo,
}

impl Field {
    /// Wire name of the field, also used to attach errors.
    pub fn key(&self) -> &'static str {
        match self {
            Field::CompanyName => "companyName",
            Field::Sector => "sector",
            Field::Tone => "tone",
            Field::Language => "language",
            Field::TargetAudience => "targetAudience",
            Field::AdditionalInfo => "additionalInfo",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        [
            Field::CompanyName,
            Field::Sector,
            Field::Tone,
            Field::Language,
            Field::TargetAudience,
            Field::AdditionalInfo,
        ]
        .into_iter()
        .find(|field| field.key() == key)
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, Field::AdditionalInfo)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One page of the wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Step {
    pub title: &'static str,
    pub fields: &'static [Field],
}

impl Step {
    /// Fields that must be present before the step counts as complete.
    pub fn required_fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.fields.iter().copied().filter(|field| !field.is_optional())
    }
}

/// Ordered wizard steps.
pub const STEPS: [Step; 4] = [
    Step {
        title: "Company Details",
        fields: &[Field::CompanyName, Field::Sector],
    },
    Step {
        title: "Brand Personality",
        fields: &[Field::Tone, Field::Language],
    },
    Step {
        title: "Target Audience",
        fields: &[Field::TargetAudience],
    },
    Step {
        title: "Additional Context",
        fields: &[Field::AdditionalInfo],
    },
];

/// Index of the step that carries the submit action.
pub const LAST_STEP: usize = STEPS.len() - 1;

// ─────────────────────────────────────────────────────────────────────────────
// SubmitBlock
// ─────────────────────────────────────────────────────────────────────────────

/// Why the wizard refused to hand over a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SubmitBlock {
    /// The submit action was attempted away from the last step.
    NotTerminalStep { current: usize },
    /// No explicit submit action preceded the attempt (for example an Enter
    /// key press inside a field).
    NotUserInitiated,
    /// A previous submission has not resolved yet.
    InFlight,
    /// A required answer is missing or invalid.
    Incomplete { step: usize, field: Field },
}

impl fmt::Display for SubmitBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitBlock::NotTerminalStep { current } => write!(
                f,
                "Finish the remaining steps first (currently on step {} of {}).",
                current + 1,
                STEPS.len()
            ),
            SubmitBlock::NotUserInitiated => {
                f.write_str("Use the submit button to create the brief.")
            }
            SubmitBlock::InFlight => f.write_str("The brief is already being submitted."),
            SubmitBlock::Incomplete { step, field } => write!(
                f,
                "Step {} is incomplete: {} is required.",
                step + 1,
                field
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FormWizard
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of an Enter key press inside a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnterOutcome {
    /// Moved to the given step.
    Advanced(usize),
    /// Nothing happened; Enter never submits.
    Ignored,
}

/// Draft answers plus navigation state for one wizard session.
#[derive(Debug, Clone)]
pub struct FormWizard {
    answers: BTreeMap<Field, String>,
    current: usize,
    user_initiated_submit: bool,
}

impl Default for FormWizard {
    fn default() -> Self {
        Self::new()
    }
}

impl FormWizard {
    /// Starts a draft on the first step. The language defaults to English.
    pub fn new() -> Self {
        let mut answers = BTreeMap::new();
        answers.insert(Field::Language, Language::En.as_str().to_string());
        Self {
            answers,
            current: 0,
            user_initiated_submit: false,
        }
    }

    pub fn current_step(&self) -> usize {
        self.current
    }

    pub fn is_on_last_step(&self) -> bool {
        self.current == LAST_STEP
    }

    pub fn is_submit_armed(&self) -> bool {
        self.user_initiated_submit
    }

    pub fn answer(&self, field: Field) -> Option<&str> {
        self.answers.get(&field).map(String::as_str)
    }

    /// Records an answer. Blank values clear the field.
    pub fn set_answer(&mut self, field: Field, value: &str) -> Result<(), AppError> {
        let value = value.trim();
        if value.is_empty() {
            self.answers.remove(&field);
            return Ok(());
        }

        if field == Field::Language {
            let language = Language::parse(value).ok_or_else(|| AppError::Validation {
                field: field.key().to_string(),
                message: "must be en or fr".to_string(),
            })?;
            self.answers.insert(field, language.as_str().to_string());
            return Ok(());
        }

        self.answers.insert(field, value.to_string());
        Ok(())
    }

    /// A step is complete when every required field has an answer. Optional
    /// fields never block.
    pub fn is_step_complete(&self, step: usize) -> bool {
        match STEPS.get(step) {
            Some(step) => step
                .required_fields()
                .all(|field| self.answers.contains_key(&field)),
            None => false,
        }
    }

    /// Checks presence and content rules of one step.
    pub fn validate_step(&self, step: usize) -> Result<(), AppError> {
        let Some(definition) = STEPS.get(step) else {
            return Err(AppError::Internal(format!("No wizard step {}", step)));
        };

        for field in definition.required_fields() {
            match self.answers.get(&field) {
                None => {
                    return Err(AppError::Validation {
                        field: field.key().to_string(),
                        message: "is required".to_string(),
                    })
                }
                Some(value)
                    if field == Field::TargetAudience
                        && value.chars().count() < MIN_AUDIENCE_CHARS =>
                {
                    return Err(AppError::Validation {
                        field: field.key().to_string(),
                        message: format!("needs at least {} characters", MIN_AUDIENCE_CHARS),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Moves forward when the current step validates.
    pub fn next(&mut self) -> Result<usize, AppError> {
        self.user_initiated_submit = false;
        self.validate_step(self.current)?;
        if self.current < LAST_STEP {
            self.current += 1;
        }
        Ok(self.current)
    }

    /// Moves back one step. Always allowed.
    pub fn back(&mut self) -> usize {
        self.user_initiated_submit = false;
        self.current = self.current.saturating_sub(1);
        self.current
    }

    /// First step whose required answers are not all present.
    fn first_incomplete_step(&self) -> usize {
        (0..STEPS.len())
            .find(|&step| !self.is_step_complete(step))
            .unwrap_or(LAST_STEP)
    }

    /// Backward jumps are free; forward jumps only reach complete steps or
    /// the step right after the last complete one.
    pub fn can_jump_to(&self, step: usize) -> bool {
        if step >= STEPS.len() {
            return false;
        }
        step <= self.current || self.is_step_complete(step) || step == self.first_incomplete_step()
    }

    pub fn jump_to(&mut self, step: usize) -> Result<usize, AppError> {
        self.user_initiated_submit = false;
        if !self.can_jump_to(step) {
            return Err(AppError::Validation {
                field: "step".to_string(),
                message: format!("step {} is not reachable yet", step + 1),
            });
        }
        self.current = step;
        Ok(self.current)
    }

    /// Enter inside a field advances on intermediate steps and never arms a
    /// submission.
    pub fn press_enter(&mut self) -> EnterOutcome {
        if self.is_on_last_step() {
            return EnterOutcome::Ignored;
        }
        match self.next() {
            Ok(step) => EnterOutcome::Advanced(step),
            Err(_) => EnterOutcome::Ignored,
        }
    }

    /// The explicit submit action. Arms the submission only on the last step.
    pub fn request_submit(&mut self) -> Result<(), SubmitBlock> {
        if !self.is_on_last_step() {
            self.user_initiated_submit = false;
            return Err(SubmitBlock::NotTerminalStep {
                current: self.current,
            });
        }
        self.user_initiated_submit = true;
        Ok(())
    }

    /// Builds the payload if a user-initiated submission is armed on the
    /// last step and every step validates.
    pub fn take_submission(&self) -> Result<BriefPayload, SubmitBlock> {
        if !self.is_on_last_step() {
            return Err(SubmitBlock::NotTerminalStep {
                current: self.current,
            });
        }
        if !self.user_initiated_submit {
            return Err(SubmitBlock::NotUserInitiated);
        }

        for step in 0..STEPS.len() {
            if let Err(AppError::Validation { field, .. }) = self.validate_step(step) {
                let field = Field::from_key(&field).unwrap_or(Field::CompanyName);
                return Err(SubmitBlock::Incomplete { step, field });
            }
        }

        let text = |field: Field| self.answer(field).unwrap_or_default().to_string();
        Ok(BriefPayload {
            company_name: text(Field::CompanyName),
            sector: text(Field::Sector),
            tone: text(Field::Tone),
            target_audience: text(Field::TargetAudience),
            language: self
                .answer(Field::Language)
                .and_then(Language::parse)
                .unwrap_or_default(),
            additional_info: self.answer(Field::AdditionalInfo).map(str::to_string),
        })
    }

    /// Clears the submit flag once an attempt has resolved.
    pub fn resolve_submit(&mut self) {
        self.user_initiated_submit = false;
    }

    /// Discards the draft after a successful submission.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A wizard with every step answered, sitting on the last step.
    pub(crate) fn filled_wizard() -> FormWizard {
        let mut wizard = FormWizard::new();
        wizard.set_answer(Field::CompanyName, "Acme Coffee").unwrap();
        wizard.set_answer(Field::Sector, "Food & Beverage").unwrap();
        wizard.set_answer(Field::Tone, "Friendly").unwrap();
        wizard.set_answer(Field::Language, "fr").unwrap();
        wizard
            .set_answer(
                Field::TargetAudience,
                "Urban commuters who want quality coffee on the go",
            )
            .unwrap();
        for _ in 0..LAST_STEP {
            wizard.next().unwrap();
        }
        wizard
    }

    #[test]
    fn optional_fields_never_block_completion() {
        let wizard = FormWizard::new();
        assert!(wizard.is_step_complete(3));
        assert!(!wizard.is_step_complete(0));
        assert!(!wizard.is_step_complete(STEPS.len()));
    }

    #[test]
    fn language_defaults_to_english_and_rejects_unknown() {
        let mut wizard = FormWizard::new();
        assert_eq!(wizard.answer(Field::Language), Some("en"));

        let err = wizard.set_answer(Field::Language, "de").unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "language"));
        assert_eq!(wizard.answer(Field::Language), Some("en"));

        wizard.set_answer(Field::Language, " FR ").unwrap();
        assert_eq!(wizard.answer(Field::Language), Some("fr"));
    }

    #[test]
    fn next_requires_current_step_to_validate() {
        let mut wizard = FormWizard::new();
        wizard.set_answer(Field::CompanyName, "Acme").unwrap();

        let err = wizard.next().unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "sector"));
        assert_eq!(wizard.current_step(), 0);

        wizard.set_answer(Field::Sector, "Retail").unwrap();
        assert_eq!(wizard.next().unwrap(), 1);
    }

    #[test]
    fn short_audience_fails_validation_but_counts_as_present() {
        let mut wizard = FormWizard::new();
        wizard.set_answer(Field::TargetAudience, "Students").unwrap();
        assert!(wizard.is_step_complete(2));
        assert!(wizard.validate_step(2).is_err());
    }

    #[test]
    fn blank_answer_clears_field() {
        let mut wizard = FormWizard::new();
        wizard.set_answer(Field::CompanyName, "Acme").unwrap();
        wizard.set_answer(Field::CompanyName, "   ").unwrap();
        assert_eq!(wizard.answer(Field::CompanyName), None);
    }

    #[test]
    fn back_is_always_allowed() {
        let mut wizard = filled_wizard();
        assert_eq!(wizard.back(), 2);
        assert_eq!(wizard.back(), 1);
        assert_eq!(wizard.back(), 0);
        assert_eq!(wizard.back(), 0);
    }

    #[test]
    fn jumps_reach_only_complete_steps_or_the_next_open_one() {
        let mut wizard = FormWizard::new();
        wizard.set_answer(Field::CompanyName, "Acme").unwrap();
        wizard.set_answer(Field::Sector, "Retail").unwrap();

        // Step 2 still lacks a tone, so it is the next open step.
        assert!(wizard.can_jump_to(1));
        assert!(!wizard.can_jump_to(2));
        assert!(wizard.jump_to(2).is_err());

        wizard.set_answer(Field::Tone, "Bold").unwrap();
        assert!(wizard.can_jump_to(2));
        assert_eq!(wizard.jump_to(2).unwrap(), 2);
        assert!(!wizard.can_jump_to(STEPS.len()));
    }

    #[test]
    fn submit_off_last_step_is_refused() {
        let mut wizard = FormWizard::new();
        assert_eq!(
            wizard.request_submit(),
            Err(SubmitBlock::NotTerminalStep { current: 0 })
        );
        assert!(!wizard.is_submit_armed());
        assert!(matches!(
            wizard.take_submission(),
            Err(SubmitBlock::NotTerminalStep { .. })
        ));
    }

    #[test]
    fn enter_never_arms_submission() {
        let mut wizard = filled_wizard();
        assert_eq!(wizard.press_enter(), EnterOutcome::Ignored);
        assert!(!wizard.is_submit_armed());
        assert_eq!(wizard.take_submission(), Err(SubmitBlock::NotUserInitiated));

        wizard.back();
        assert_eq!(wizard.press_enter(), EnterOutcome::Advanced(LAST_STEP));
        assert!(!wizard.is_submit_armed());
    }

    #[test]
    fn navigation_clears_armed_submit() {
        let mut wizard = filled_wizard();
        wizard.request_submit().unwrap();
        assert!(wizard.is_submit_armed());

        wizard.back();
        assert!(!wizard.is_submit_armed());

        wizard.next().unwrap();
        assert_eq!(wizard.take_submission(), Err(SubmitBlock::NotUserInitiated));
    }

    #[test]
    fn armed_submission_builds_payload() {
        let mut wizard = filled_wizard();
        wizard.set_answer(Field::AdditionalInfo, "Launching in spring").unwrap();
        wizard.request_submit().unwrap();

        let payload = wizard.take_submission().expect("payload");
        assert_eq!(payload.company_name, "Acme Coffee");
        assert_eq!(payload.language, Language::Fr);
        assert_eq!(payload.additional_info.as_deref(), Some("Launching in spring"));
    }

    #[test]
    fn armed_submission_with_cleared_answer_reports_step() {
        let mut wizard = filled_wizard();
        wizard.set_answer(Field::Sector, "").unwrap();
        wizard.request_submit().unwrap();

        assert_eq!(
            wizard.take_submission(),
            Err(SubmitBlock::Incomplete {
                step: 0,
                field: Field::Sector
            })
        );
    }

    #[test]
    fn reset_discards_draft() {
        let mut wizard = filled_wizard();
        wizard.request_submit().unwrap();
        wizard.reset();

        assert_eq!(wizard.current_step(), 0);
        assert!(!wizard.is_submit_armed());
        assert_eq!(wizard.answer(Field::CompanyName), None);
    }

    #[test]
    fn submit_block_messages_are_readable() {
        let msg = SubmitBlock::Incomplete {
            step: 2,
            field: Field::TargetAudience,
        }
        .to_string();
        assert!(msg.contains("Step 3"));
        assert!(msg.contains("targetAudience"));
    }
}
