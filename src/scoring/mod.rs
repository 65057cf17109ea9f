//! Answer validation and scoring.
//!
//! Pure and deterministic: the same request always yields the same
//! evaluation, and nothing in here errors. Payloads that cannot be coerced
//! to the question's answer format score 0% instead of being rejected, so
//! answer counts stay consistent.

pub mod text;

use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Coerced player submission, tagged by answer format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "format", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnswerPayload {
    OptionId(OptionId),
    OptionIds(Vec<OptionId>),
    Boolean(bool),
    Text(String),
    Number(f64),
    OrderArray(Vec<OptionId>),
    NoAnswer,
}

impl AnswerPayload {
    /// Flat string rendering stored as the answer's `normalized` field.
    pub fn render(&self) -> String {
        match self {
            AnswerPayload::OptionId(id) => id.clone(),
            AnswerPayload::OptionIds(ids) => ids.join(","),
            AnswerPayload::Boolean(b) => b.to_string(),
            AnswerPayload::Text(t) => t.clone(),
            AnswerPayload::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            AnswerPayload::OrderArray(ids) => ids.join(","),
            AnswerPayload::NoAnswer => String::new(),
        }
    }
}

/// Everything the scorer needs about one submission.
pub struct ScoreRequest<'a> {
    pub question_type: QuestionType,
    pub submission: &'a serde_json::Value,
    pub options: &'a [QuestionOption],
    pub settings: &'a ItemSettings,
    /// The player's streak before this answer
    pub streak: u32,
}

/// The scorer's verdict. `score` is final except for the speed-podium
/// bonus, which is folded in after lock.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub is_correct: Option<bool>,
    pub score_percentage: u8,
    pub score: i64,
    pub normalized_answer: String,
    pub canonical_answer: AnswerPayload,
    pub format: AnswerFormat,
}

/// The one format each question type's submissions take.
pub fn answer_format(qt: QuestionType) -> AnswerFormat {
    use QuestionType::*;
    match qt {
        McSingle | PhotoQuestion | AudioQuestion | VideoQuestion | YoutubeWhoSaidIt | Poll => {
            AnswerFormat::OptionId
        }
        McMultiple => AnswerFormat::OptionIds,
        TrueFalse => AnswerFormat::Boolean,
        OpenText | PhotoOpen | AudioOpen | VideoOpen | MusicGuessTitle | MusicGuessArtist
        | YoutubeNextLine | YoutubeSceneQuestion => AnswerFormat::Text,
        Estimation | MusicGuessYear => AnswerFormat::Number,
        Order => AnswerFormat::OrderArray,
    }
}

pub fn scoring_mode(qt: QuestionType) -> ScoringMode {
    use QuestionType::*;
    match qt {
        McSingle | TrueFalse | PhotoQuestion | AudioQuestion | VideoQuestion
        | YoutubeWhoSaidIt => ScoringMode::ExactMatch,
        McMultiple => ScoringMode::PartialMulti,
        Order => ScoringMode::PartialOrder,
        OpenText | PhotoOpen | AudioOpen | VideoOpen | MusicGuessTitle | MusicGuessArtist
        | YoutubeNextLine | YoutubeSceneQuestion => ScoringMode::FuzzyText,
        Estimation => ScoringMode::NumericDistance,
        MusicGuessYear => ScoringMode::YearDistance,
        Poll => ScoringMode::NoScore,
    }
}

/// Whether the host may manually override the percentage after reveal.
pub fn is_manually_adjustable(qt: QuestionType) -> bool {
    scoring_mode(qt) == ScoringMode::FuzzyText
}

/// Best-effort coercion of a raw client value to the given format.
pub fn coerce(raw: &serde_json::Value, format: AnswerFormat) -> Option<AnswerPayload> {
    use serde_json::Value;
    match format {
        AnswerFormat::OptionId => match raw {
            Value::String(s) if !s.is_empty() => Some(AnswerPayload::OptionId(s.clone())),
            _ => None,
        },
        AnswerFormat::OptionIds => match raw {
            Value::Array(items) => {
                let mut seen = BTreeSet::new();
                let mut ids = Vec::new();
                for item in items {
                    let id = item.as_str()?;
                    if seen.insert(id.to_string()) {
                        ids.push(id.to_string());
                    }
                }
                Some(AnswerPayload::OptionIds(ids))
            }
            Value::String(s) if !s.is_empty() => {
                Some(AnswerPayload::OptionIds(vec![s.clone()]))
            }
            _ => None,
        },
        AnswerFormat::Boolean => coerce_boolean(raw).map(AnswerPayload::Boolean),
        AnswerFormat::Text => match raw {
            Value::String(s) => Some(AnswerPayload::Text(s.clone())),
            Value::Number(n) => Some(AnswerPayload::Text(n.to_string())),
            Value::Bool(b) => Some(AnswerPayload::Text(b.to_string())),
            _ => None,
        },
        AnswerFormat::Number => coerce_number(raw).map(AnswerPayload::Number),
        AnswerFormat::OrderArray => match raw {
            Value::Array(items) => {
                let mut ids = Vec::with_capacity(items.len());
                for item in items {
                    ids.push(item.as_str()?.to_string());
                }
                Some(AnswerPayload::OrderArray(ids))
            }
            _ => None,
        },
        AnswerFormat::NoAnswer => Some(AnswerPayload::NoAnswer),
    }
}

fn coerce_boolean(raw: &serde_json::Value) -> Option<bool> {
    use serde_json::Value;
    match raw {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "ja" | "1" => Some(true),
            "false" | "no" | "nein" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_number(raw: &serde_json::Value) -> Option<f64> {
    use serde_json::Value;
    match raw {
        Value::Number(n) => n.as_f64(),
        // Comma decimal separators show up from some locales
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

/// Extract the canonical correct answer from options and settings.
pub fn canonical_answer(
    qt: QuestionType,
    options: &[QuestionOption],
    settings: &ItemSettings,
) -> AnswerPayload {
    use QuestionType::*;
    match qt {
        McSingle | PhotoQuestion | AudioQuestion | VideoQuestion | YoutubeWhoSaidIt => options
            .iter()
            .find(|o| o.is_correct)
            .map(|o| AnswerPayload::OptionId(o.id.clone()))
            .unwrap_or(AnswerPayload::NoAnswer),
        McMultiple => AnswerPayload::OptionIds(
            options
                .iter()
                .filter(|o| o.is_correct)
                .map(|o| o.id.clone())
                .collect(),
        ),
        TrueFalse => {
            // The correct option's label decides the canonical boolean;
            // falls back to "first option means true" for unlabeled pairs.
            let answer = options
                .iter()
                .position(|o| o.is_correct)
                .map(|idx| {
                    coerce_boolean(&serde_json::Value::String(options[idx].text.clone()))
                        .unwrap_or(idx == 0)
                })
                .unwrap_or(false);
            AnswerPayload::Boolean(answer)
        }
        Order => {
            let mut ordered: Vec<&QuestionOption> = options.iter().collect();
            ordered.sort_by_key(|o| o.order.unwrap_or(u32::MAX));
            AnswerPayload::OrderArray(ordered.into_iter().map(|o| o.id.clone()).collect())
        }
        Estimation | MusicGuessYear => settings
            .correct_answer
            .as_ref()
            .and_then(coerce_number)
            .map(AnswerPayload::Number)
            .unwrap_or(AnswerPayload::NoAnswer),
        OpenText | PhotoOpen | AudioOpen | VideoOpen | MusicGuessTitle | MusicGuessArtist
        | YoutubeNextLine | YoutubeSceneQuestion => settings
            .correct_answer
            .as_ref()
            .and_then(|v| v.as_str())
            .map(|s| AnswerPayload::Text(text::normalize(s)))
            .unwrap_or(AnswerPayload::NoAnswer),
        Poll => AnswerPayload::NoAnswer,
    }
}

/// Evaluate one submission. Never fails; uncoercible payloads score 0%.
pub fn evaluate(req: &ScoreRequest) -> Evaluation {
    let format = answer_format(req.question_type);
    let mode = scoring_mode(req.question_type);
    let canonical = canonical_answer(req.question_type, req.options, req.settings);

    let coerced = coerce(req.submission, format);
    let normalized_answer = match &coerced {
        Some(AnswerPayload::Text(t)) => text::normalize(t),
        Some(payload) => payload.render(),
        None => String::new(),
    };

    let (is_correct, score_percentage) = match (&coerced, mode) {
        (_, ScoringMode::NoScore) => (None, 100),
        (None, _) => (Some(false), 0),
        (Some(payload), mode) => {
            let pct = percentage(payload, &canonical, mode, req.settings);
            let correct = match mode {
                // Any accepted spelling tier counts as a correct answer
                ScoringMode::FuzzyText => pct > 0,
                _ => pct == 100,
            };
            (Some(correct), pct)
        }
    };

    let score = final_score(
        req.settings,
        score_percentage,
        req.streak,
        mode == ScoringMode::NoScore,
    );

    Evaluation {
        is_correct,
        score_percentage,
        score,
        normalized_answer,
        canonical_answer: canonical,
        format,
    }
}

fn percentage(
    payload: &AnswerPayload,
    canonical: &AnswerPayload,
    mode: ScoringMode,
    settings: &ItemSettings,
) -> u8 {
    match mode {
        ScoringMode::ExactMatch => {
            if payload == canonical {
                100
            } else {
                0
            }
        }
        ScoringMode::PartialMulti => {
            let (AnswerPayload::OptionIds(picked), AnswerPayload::OptionIds(correct)) =
                (payload, canonical)
            else {
                return 0;
            };
            if correct.is_empty() {
                return 0;
            }
            let correct_set: BTreeSet<&String> = correct.iter().collect();
            let n = correct.len() as f64;
            let mut pct = 0.0;
            for id in picked {
                if correct_set.contains(id) {
                    pct += 100.0 / n;
                } else {
                    pct -= 50.0 / n;
                }
            }
            pct.clamp(0.0, 100.0).round() as u8
        }
        ScoringMode::PartialOrder => {
            let (AnswerPayload::OrderArray(submitted), AnswerPayload::OrderArray(correct)) =
                (payload, canonical)
            else {
                return 0;
            };
            if correct.is_empty() {
                return 0;
            }
            let in_place = correct
                .iter()
                .zip(submitted.iter())
                .filter(|(a, b)| a == b)
                .count();
            (100.0 * in_place as f64 / correct.len() as f64).round() as u8
        }
        ScoringMode::FuzzyText => {
            let AnswerPayload::Text(submitted) = payload else {
                return 0;
            };
            let submitted = text::normalize(submitted);
            let mut candidates: Vec<String> = Vec::new();
            if let AnswerPayload::Text(correct) = canonical {
                candidates.push(correct.clone());
            }
            candidates.extend(settings.acceptable_answers.iter().map(|a| text::normalize(a)));

            let best = candidates
                .iter()
                .map(|c| text::similarity(&submitted, c))
                .fold(0.0_f64, f64::max);
            fuzzy_tier(best)
        }
        ScoringMode::NumericDistance => {
            let (AnswerPayload::Number(submitted), AnswerPayload::Number(correct)) =
                (payload, canonical)
            else {
                return 0;
            };
            let delta_pct = if *correct == 0.0 {
                if *submitted == 0.0 {
                    0.0
                } else {
                    f64::INFINITY
                }
            } else {
                ((submitted - correct) / correct).abs() * 100.0
            };
            numeric_tier(delta_pct, settings.margin_percent)
        }
        ScoringMode::YearDistance => {
            let (AnswerPayload::Number(submitted), AnswerPayload::Number(correct)) =
                (payload, canonical)
            else {
                return 0;
            };
            year_tier((submitted - correct).abs().round() as u64)
        }
        ScoringMode::NoScore => 100,
    }
}

/// Tiered percentage for fuzzy text by normalized similarity.
fn fuzzy_tier(similarity: f64) -> u8 {
    if similarity >= 1.0 {
        100
    } else if similarity >= 0.95 {
        90
    } else if similarity >= 0.90 {
        80
    } else if similarity >= 0.85 {
        70
    } else if similarity >= 0.80 {
        50
    } else {
        0
    }
}

/// Tiered percentage for estimation by relative distance in percent.
fn numeric_tier(delta_pct: f64, margin_pct: f64) -> u8 {
    if delta_pct <= margin_pct {
        100
    } else if delta_pct <= 5.0 {
        90
    } else if delta_pct <= 10.0 {
        80
    } else if delta_pct <= 15.0 {
        60
    } else if delta_pct <= 25.0 {
        40
    } else if delta_pct <= 50.0 {
        20
    } else {
        0
    }
}

/// Tiered percentage for year guesses by absolute distance.
fn year_tier(delta: u64) -> u8 {
    match delta {
        0 => 100,
        1 => 90,
        2 => 70,
        3 => 50,
        4..=5 => 30,
        6..=10 => 10,
        _ => 0,
    }
}

fn final_score(settings: &ItemSettings, pct: u8, streak: u32, no_score: bool) -> i64 {
    if no_score {
        return 0;
    }
    let base = (settings.base_points as f64 * pct as f64 / 100.0).round() as i64;
    if pct == 100 && settings.streak_bonus {
        base + settings.streak_points as i64 * streak as i64
    } else {
        base
    }
}
