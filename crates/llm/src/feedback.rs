//! Post-call scorecard evaluation
//!
//! One stateless chat completion over the full transcript, scored against
//! nine sales-coaching criteria and folded into the category structure the
//! client renders.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use pitchcall_core::{ChatRole, ChatTurn, PersonaId};

use crate::client::LlmConfig;
use crate::LlmError;

const FEEDBACK_PROMPT: &str = r#"You are a sales coach evaluating a cold call transcript. Be strict but fair.

PERSONA CONTEXT:
{persona_context}

TRANSCRIPT:
{transcript}

Evaluate against these 9 criteria. For each, return true ONLY if clearly demonstrated:

OPENER (2 criteria):
1. permission_opener: Asked for permission or time before pitching
2. used_research: Referenced specific info about prospect/company

SOCIAL_PROOF (2 criteria):
3. provided_proof: Gave concrete example/case study/metric
4. checked_relevance: Asked if the proof resonated or was relevant

DISCOVERY (1 criterion):
5. asked_preconceptions: Asked what prospect already knows/thinks about the space

CLOSING (2 criteria):
6. next_steps: Proposed clear next action
7. meeting_booked: Got commitment for follow-up

TAKEAWAY (2 criteria):
8. confirmed_time: Re-confirmed availability/timing works
9. success_criteria: Asked what would make next call successful

Also provide:
- summary: One short phrase (max 5 words) capturing main advice
- strengths: Array of 1-2 short strength tags (max 3 words each)
- improvements: Array of 1-2 short improvement tags (max 3 words each)

Return ONLY valid JSON:
{
  "criteria": {
    "permission_opener": bool,
    "used_research": bool,
    "provided_proof": bool,
    "checked_relevance": bool,
    "asked_preconceptions": bool,
    "next_steps": bool,
    "meeting_booked": bool,
    "confirmed_time": bool,
    "success_criteria": bool
  },
  "summary": "string",
  "strengths": ["string"],
  "improvements": ["string"]
}"#;

fn persona_context(persona: PersonaId) -> &'static str {
    match persona {
        PersonaId::A => {
            "Joe - Director of Operations at Bain & Co. Time-constrained, direct, \
             efficiency-focused."
        }
        PersonaId::B => {
            "Sam - CEO of BlackRock. Professional, high-level, ROI-focused, dislikes buzzwords."
        }
    }
}

/// Scorecard returned to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scorecard {
    pub overall_score: Score,
    pub categories: Vec<Category>,
    pub summary: String,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub correct: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub criteria: Vec<Criterion>,
    pub score: Score,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criterion {
    pub name: String,
    pub passed: bool,
}

/// Render the chat history as a readable transcript
fn format_transcript(transcript: &[ChatTurn]) -> String {
    transcript
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                ChatRole::User => "Sales Rep",
                ChatRole::Assistant => "Prospect",
            };
            format!("{}: {}", speaker, turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fold the model's criteria JSON into the category/score structure
fn build_scorecard(result: &Value) -> Scorecard {
    let criteria = &result["criteria"];
    let passed = |key: &str| criteria.get(key).and_then(Value::as_bool).unwrap_or(false);

    let layout: &[(&str, &[(&str, &str)])] = &[
        (
            "Opener",
            &[
                ("Permission based opener?", "permission_opener"),
                ("Used research on prospect?", "used_research"),
            ],
        ),
        (
            "Social Proof",
            &[
                ("Provided social proof?", "provided_proof"),
                ("Asked if social proof was relevant?", "checked_relevance"),
            ],
        ),
        (
            "Discovery",
            &[("SDR asked for preconceptions?", "asked_preconceptions")],
        ),
        (
            "Closing",
            &[
                ("Next steps agreed upon?", "next_steps"),
                ("Follow-up meeting booked?", "meeting_booked"),
            ],
        ),
        (
            "Takeaway",
            &[
                ("Re-confirmed time works?", "confirmed_time"),
                ("Asked for success criteria?", "success_criteria"),
            ],
        ),
    ];

    let mut total_correct = 0;
    let mut total_criteria = 0;
    let categories = layout
        .iter()
        .map(|(name, entries)| {
            let criteria: Vec<Criterion> = entries
                .iter()
                .map(|(label, key)| Criterion {
                    name: (*label).to_string(),
                    passed: passed(key),
                })
                .collect();
            let correct = criteria.iter().filter(|c| c.passed).count();
            total_correct += correct;
            total_criteria += criteria.len();
            Category {
                name: (*name).to_string(),
                score: Score {
                    correct,
                    total: criteria.len(),
                },
                criteria,
            }
        })
        .collect();

    let tags = |key: &str| -> Vec<String> {
        result
            .get(key)
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    };

    Scorecard {
        overall_score: Score {
            correct: total_correct,
            total: total_criteria,
        },
        categories,
        summary: result
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or("Keep improving")
            .to_string(),
        strengths: tags("strengths"),
        improvements: tags("improvements"),
    }
}

/// Strip an optional markdown code fence from the model output
fn strip_code_fence(content: &str) -> &str {
    let content = content.trim();
    if let Some(inner) = content.split("```json").nth(1) {
        return inner.split("```").next().unwrap_or("").trim();
    }
    if let Some(inner) = content.split("```").nth(1) {
        return inner.trim();
    }
    content
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: String,
}

/// Evaluate a finished call transcript.
///
/// A model reply that fails JSON parsing yields an empty scorecard rather
/// than an error; upstream failures propagate.
pub async fn evaluate_call(
    http: &reqwest::Client,
    config: &LlmConfig,
    transcript: &[ChatTurn],
    persona: PersonaId,
) -> Result<Scorecard, LlmError> {
    let prompt = FEEDBACK_PROMPT
        .replace("{persona_context}", persona_context(persona))
        .replace("{transcript}", &format_transcript(transcript));

    let request = serde_json::json!({
        "model": config.model,
        "messages": [{ "role": "user", "content": prompt }],
        "temperature": 0.1,
        "max_tokens": 500,
    });

    let response = http
        .post(config.completions_url())
        .bearer_auth(&config.api_key)
        .json(&request)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        return Err(LlmError::Api(format!("scoring request failed: {}", status)));
    }

    let body: CompletionResponse = response
        .json()
        .await
        .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
    let content = body
        .choices
        .first()
        .map(|c| c.message.content.as_str())
        .unwrap_or("");

    match serde_json::from_str::<Value>(strip_code_fence(content)) {
        Ok(result) => Ok(build_scorecard(&result)),
        Err(e) => {
            tracing::error!("failed to parse scoring response: {}", e);
            Ok(build_scorecard(&serde_json::json!({
                "criteria": {},
                "summary": "Analysis failed",
                "strengths": [],
                "improvements": [],
            })))
        }
    }
}
