use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    dao::models::{ChoiceEntity, GameEntity, QuestionEntity},
    dto::format_system_time,
};

/// Smallest number of choices a question may offer.
pub const MIN_CHOICES: usize = 2;
/// Largest number of choices a question may offer.
pub const MAX_CHOICES: usize = 6;

/// Payload used to author a new question set.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateGameRequest {
    #[validate(length(min = 1, max = 120))]
    pub title: String,
    #[validate(length(min = 1), nested)]
    pub questions: Vec<QuestionInput>,
}

/// Incoming question definition.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QuestionInput {
    pub prompt: String,
    /// Between 2 and 6 choices, exactly one marked correct.
    pub choices: Vec<ChoiceInput>,
}

impl Validate for QuestionInput {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.prompt.trim().is_empty() {
            let mut err = ValidationError::new("prompt_blank");
            err.message = Some("Question prompt must not be blank".into());
            errors.add("prompt", err);
        }

        if !(MIN_CHOICES..=MAX_CHOICES).contains(&self.choices.len()) {
            let mut err = ValidationError::new("choices_count");
            err.message = Some(
                format!(
                    "A question needs between {MIN_CHOICES} and {MAX_CHOICES} choices (got {})",
                    self.choices.len()
                )
                .into(),
            );
            errors.add("choices", err);
        }

        let correct = self.choices.iter().filter(|choice| choice.is_correct).count();
        if correct != 1 {
            let mut err = ValidationError::new("choices_correct");
            err.message =
                Some(format!("Exactly one choice must be correct (got {correct})").into());
            errors.add("choices", err);
        }

        if self.choices.iter().any(|choice| choice.text.trim().is_empty()) {
            let mut err = ValidationError::new("choice_blank");
            err.message = Some("Choice text must not be blank".into());
            errors.add("choices", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Incoming answer choice.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChoiceInput {
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

/// Authored game as seen by its host, correct answers included.
#[derive(Debug, Serialize, ToSchema)]
pub struct GameSummary {
    pub id: Uuid,
    pub title: String,
    pub created_at: String,
    pub questions: Vec<QuestionSummary>,
}

/// Host projection of a question.
#[derive(Debug, Serialize, ToSchema)]
pub struct QuestionSummary {
    pub id: Uuid,
    pub prompt: String,
    pub choices: Vec<ChoiceSummary>,
}

/// Host projection of a choice.
#[derive(Debug, Serialize, ToSchema)]
pub struct ChoiceSummary {
    pub id: Uuid,
    pub text: String,
    pub is_correct: bool,
}

impl CreateGameRequest {
    /// Split the request into its trimmed title and freshly identified questions.
    pub fn into_parts(self) -> (String, Vec<QuestionEntity>) {
        let questions = self
            .questions
            .into_iter()
            .map(|question| QuestionEntity {
                id: Uuid::new_v4(),
                prompt: question.prompt.trim().to_string(),
                choices: question
                    .choices
                    .into_iter()
                    .map(|choice| ChoiceEntity {
                        id: Uuid::new_v4(),
                        text: choice.text.trim().to_string(),
                        is_correct: choice.is_correct,
                    })
                    .collect(),
            })
            .collect();
        (self.title.trim().to_string(), questions)
    }
}

impl From<GameEntity> for GameSummary {
    fn from(game: GameEntity) -> Self {
        Self {
            id: game.id,
            title: game.title,
            created_at: format_system_time(game.created_at),
            questions: game
                .questions
                .into_iter()
                .map(|question| QuestionSummary {
                    id: question.id,
                    prompt: question.prompt,
                    choices: question
                        .choices
                        .into_iter()
                        .map(|choice| ChoiceSummary {
                            id: choice.id,
                            text: choice.text,
                            is_correct: choice.is_correct,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(choices: &[(&str, bool)]) -> QuestionInput {
        QuestionInput {
            prompt: "Capital of France?".into(),
            choices: choices
                .iter()
                .map(|(text, is_correct)| ChoiceInput {
                    text: (*text).into(),
                    is_correct: *is_correct,
                })
                .collect(),
        }
    }

    #[test]
    fn well_formed_question_passes() {
        assert!(question(&[("Paris", true), ("Lyon", false)]).validate().is_ok());
    }

    #[test]
    fn question_needs_exactly_one_correct_choice() {
        assert!(question(&[("Paris", true), ("Lyon", true)]).validate().is_err());
        assert!(question(&[("Paris", false), ("Lyon", false)]).validate().is_err());
    }

    #[test]
    fn question_choice_count_is_bounded() {
        assert!(question(&[("Paris", true)]).validate().is_err());
        let seven: Vec<(&str, bool)> = (0..7).map(|i| ("x", i == 0)).collect();
        assert!(question(&seven).validate().is_err());
    }

    #[test]
    fn game_reports_invalid_nested_questions() {
        let request = CreateGameRequest {
            title: "Geography".into(),
            questions: vec![
                question(&[("Paris", true), ("Lyon", false)]),
                question(&[("Paris", false), ("Lyon", false)]),
            ],
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn game_needs_questions() {
        let request = CreateGameRequest {
            title: "Geography".into(),
            questions: vec![],
        };
        assert!(request.validate().is_err());
    }
}
