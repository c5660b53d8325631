use crate::language::LanguageMode;
use crate::ledger::Turn;
use crate::report::FinalReport;
use crate::{Command, SessionEvent};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("exchange request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed exchange payload: {0}")]
    Malformed(String),
}

/// One turn reply from the collaborator: short feedback on the submitted
/// answer plus the next question. `evaluation` is empty exactly for the
/// opening question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    pub evaluation: String,
    pub next_question: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }

    fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into() }
    }
}

/// Explicit conversational handle created by `open_session` and threaded into
/// every `submit_answer` call. The session owns it; the client holds no
/// cross-call state, so retries and fresh sessions can never cross-contaminate.
#[derive(Debug, Clone)]
pub struct ExchangeContext {
    language: LanguageMode,
    messages: Vec<ChatMessage>,
}

impl ExchangeContext {
    pub fn new(language: LanguageMode, system_prompt: impl Into<String>) -> Self {
        Self {
            language,
            messages: vec![ChatMessage::system(system_prompt)],
        }
    }

    pub fn language(&self) -> LanguageMode {
        self.language
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::assistant(content));
    }

    /// Record a completed exchange. Called by the session only after the
    /// collaborator accepted the answer, so a failed call leaves the context
    /// exactly as it was.
    pub fn record_exchange(&mut self, answer: &str, reply: &TurnResult) {
        self.push_user(answer);
        match serde_json::to_string(reply) {
            Ok(raw) => self.push_assistant(raw),
            Err(e) => {
                tracing::error!("failed to serialize turn reply into context: {e}");
                self.push_assistant(reply.next_question.clone());
            }
        }
    }
}

/// The turn exchange collaborator: turns a transcript into the next question
/// and a closed-turn history into a final report.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Examiner: Send + Sync {
    /// Initialize a fresh exchange context for this language and return the
    /// opening question (its `evaluation` is empty).
    async fn open_session(
        &self,
        language: LanguageMode,
    ) -> Result<(ExchangeContext, TurnResult), ExchangeError>;

    /// Submit one answer against a previously opened context; returns short
    /// feedback plus the next question. The context is not mutated here.
    async fn submit_answer(
        &self,
        context: &ExchangeContext,
        answer: &str,
    ) -> Result<TurnResult, ExchangeError>;

    /// Build the final report from the closed-turn history. Stateless with
    /// respect to prior calls; the full history is passed explicitly.
    async fn close_session(
        &self,
        turns: &[Turn],
        language: LanguageMode,
    ) -> Result<FinalReport, ExchangeError>;
}

/// Execute one exchange command against an examiner, wrapping the outcome in
/// the completion event the session expects. The epoch stamp rides along
/// untouched so stale completions can be discarded at the session boundary.
pub async fn run_exchange(examiner: &dyn Examiner, command: Command) -> Option<SessionEvent> {
    match command {
        Command::OpenExchange { epoch, language } => Some(SessionEvent::Opened {
            epoch,
            outcome: examiner.open_session(language).await,
        }),
        Command::SubmitExchange { epoch, context, answer } => Some(SessionEvent::Answered {
            epoch,
            outcome: examiner.submit_answer(&context, &answer).await,
        }),
        Command::CloseExchange { epoch, turns, language } => Some(SessionEvent::Reported {
            epoch,
            outcome: examiner.close_session(&turns, language).await,
        }),
        _ => None,
    }
}

// Wire shapes of the chat completions endpoint.
#[derive(Debug, Deserialize)]
struct LlmResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: String,
}

/// HTTP examiner over an OpenAI-style chat completions API.
pub struct ExaminerClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl ExaminerClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        }
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ExchangeError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "response_format": { "type": "json_object" },
            "temperature": 0.3,
        });

        let resp = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<LlmResponse>()
            .await?;

        let content = resp
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| ExchangeError::Malformed("no choices in reply".to_string()))?;
        Ok(content)
    }
}

#[async_trait]
impl Examiner for ExaminerClient {
    async fn open_session(
        &self,
        language: LanguageMode,
    ) -> Result<(ExchangeContext, TurnResult), ExchangeError> {
        let mut context = ExchangeContext::new(language, interviewer_prompt(language));
        context.push_user(begin_signal(language));

        let content = self.complete(context.messages()).await?;
        let first = parse_turn_result(&content, true)?;
        context.push_assistant(content);
        Ok((context, first))
    }

    async fn submit_answer(
        &self,
        context: &ExchangeContext,
        answer: &str,
    ) -> Result<TurnResult, ExchangeError> {
        let mut messages = context.messages().to_vec();
        messages.push(ChatMessage::user(answer));

        let content = self.complete(&messages).await?;
        parse_turn_result(&content, false)
    }

    async fn close_session(
        &self,
        turns: &[Turn],
        language: LanguageMode,
    ) -> Result<FinalReport, ExchangeError> {
        let transcript = serde_json::to_string_pretty(turns)
            .map_err(|e| ExchangeError::Malformed(format!("unencodable transcript: {e}")))?;
        let messages = vec![
            ChatMessage::system(report_prompt(language)),
            ChatMessage::user(transcript),
        ];

        let content = self.complete(&messages).await?;
        parse_final_report(&content)
    }
}

/// Validate one turn payload. Empty fields are an error, never coerced: the
/// opening reply must carry an empty evaluation and every later reply a
/// non-empty one, and the next question is always required.
pub fn parse_turn_result(content: &str, opening: bool) -> Result<TurnResult, ExchangeError> {
    let reply: TurnResult = serde_json::from_str(content)
        .map_err(|e| ExchangeError::Malformed(format!("invalid turn payload: {e}")))?;

    if reply.next_question.trim().is_empty() {
        return Err(ExchangeError::Malformed("empty nextQuestion".to_string()));
    }
    if opening && !reply.evaluation.trim().is_empty() {
        return Err(ExchangeError::Malformed(
            "opening reply must not carry an evaluation".to_string(),
        ));
    }
    if !opening && reply.evaluation.trim().is_empty() {
        return Err(ExchangeError::Malformed("empty evaluation".to_string()));
    }
    Ok(reply)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReport {
    score: i64,
    summary: String,
    good_points: Vec<String>,
    bad_points: Vec<String>,
    advice: String,
}

pub fn parse_final_report(content: &str) -> Result<FinalReport, ExchangeError> {
    let raw: RawReport = serde_json::from_str(content)
        .map_err(|e| ExchangeError::Malformed(format!("invalid report payload: {e}")))?;

    if !(0..=100).contains(&raw.score) {
        return Err(ExchangeError::Malformed(format!(
            "score out of range: {}",
            raw.score
        )));
    }
    if raw.summary.trim().is_empty() {
        return Err(ExchangeError::Malformed("empty summary".to_string()));
    }
    Ok(FinalReport {
        score: raw.score as u8,
        summary: raw.summary,
        strengths: raw.good_points,
        improvements: raw.bad_points,
        advice: raw.advice,
    })
}

fn interviewer_prompt(language: LanguageMode) -> String {
    match language {
        LanguageMode::English => r#"You are a professional job interviewer running a timed mock interview.
Ask exactly one question per reply. Keep questions concise and conversational.
Respond with STRICT JSON only: {"evaluation": "<one or two sentences on the candidate's previous answer>", "nextQuestion": "<the next interview question>"}.
For your very first reply set "evaluation" to the empty string.
Do not add any text outside the JSON object."#
            .to_string(),
        LanguageMode::Japanese => r#"あなたは模擬面接を行うプロの面接官です。
一度の返答につき質問は必ず一つだけにしてください。質問は簡潔で自然な日本語にしてください。
必ず次の形式のJSONだけで返答してください: {"evaluation": "<直前の回答への1〜2文のフィードバック>", "nextQuestion": "<次の面接の質問>"}。
最初の返答では "evaluation" を空文字列にしてください。
JSONオブジェクト以外の文字は出力しないでください。"#
            .to_string(),
    }
}

fn begin_signal(language: LanguageMode) -> &'static str {
    match language {
        LanguageMode::English => "Begin the interview with your first question.",
        LanguageMode::Japanese => "面接を開始してください。最初の質問をお願いします。",
    }
}

fn report_prompt(language: LanguageMode) -> String {
    match language {
        LanguageMode::English => r#"You are grading a finished mock interview. The user message contains the full transcript as a JSON array of turns (question, answer, evaluation).
Respond with STRICT JSON only:
{"score": <integer 0-100>, "summary": "<a short overall assessment>", "goodPoints": ["<strength>", "<strength>", "<strength>"], "badPoints": ["<improvement>", "<improvement>", "<improvement>"], "advice": "<one actionable piece of advice>"}.
Judge only what is in the transcript. Do not add any text outside the JSON object."#
            .to_string(),
        LanguageMode::Japanese => r#"終了した模擬面接を採点してください。ユーザーメッセージには全ターン（質問・回答・フィードバック）のJSON配列が含まれています。
必ず次の形式のJSONだけで返答してください:
{"score": <0〜100の整数>, "summary": "<全体の短い講評>", "goodPoints": ["<良かった点>", "<良かった点>", "<良かった点>"], "badPoints": ["<改善点>", "<改善点>", "<改善点>"], "advice": "<具体的なアドバイス一つ>"}。
トランスクリプトに含まれる内容だけで判断してください。JSONオブジェクト以外の文字は出力しないでください。"#
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_valid_turn_reply() {
        let reply = parse_turn_result(
            r#"{"evaluation": "Good clarity.", "nextQuestion": "Why this role?"}"#,
            false,
        )
        .unwrap();
        assert_eq!(reply.evaluation, "Good clarity.");
        assert_eq!(reply.next_question, "Why this role?");
    }

    #[test]
    fn opening_reply_must_have_empty_evaluation() {
        let ok = parse_turn_result(
            r#"{"evaluation": "", "nextQuestion": "Tell me about yourself"}"#,
            true,
        );
        assert!(ok.is_ok());

        let err = parse_turn_result(
            r#"{"evaluation": "nice", "nextQuestion": "Tell me about yourself"}"#,
            true,
        );
        assert!(matches!(err, Err(ExchangeError::Malformed(_))));
    }

    #[test]
    fn empty_fields_are_errors_not_coerced() {
        let no_question = parse_turn_result(r#"{"evaluation": "ok", "nextQuestion": "  "}"#, false);
        assert!(matches!(no_question, Err(ExchangeError::Malformed(_))));

        let no_evaluation = parse_turn_result(r#"{"evaluation": "", "nextQuestion": "Next?"}"#, false);
        assert!(matches!(no_evaluation, Err(ExchangeError::Malformed(_))));

        let garbage = parse_turn_result("not json", false);
        assert!(matches!(garbage, Err(ExchangeError::Malformed(_))));
    }

    #[test]
    fn parses_a_valid_report_and_rejects_bad_scores() {
        let content = r#"{
            "score": 78,
            "summary": "Structured answers, thin on examples.",
            "goodPoints": ["clear", "calm", "honest"],
            "badPoints": ["short answers", "few numbers", "no questions back"],
            "advice": "Prepare two concrete stories."
        }"#;
        let report = parse_final_report(content).unwrap();
        assert_eq!(report.score, 78);
        assert_eq!(report.strengths.len(), 3);
        assert_eq!(report.improvements.len(), 3);

        for bad in [
            r#"{"score": 130, "summary": "s", "goodPoints": [], "badPoints": [], "advice": "a"}"#,
            r#"{"score": -5, "summary": "s", "goodPoints": [], "badPoints": [], "advice": "a"}"#,
            r#"{"score": 50, "summary": "  ", "goodPoints": [], "badPoints": [], "advice": "a"}"#,
        ] {
            assert!(matches!(
                parse_final_report(bad),
                Err(ExchangeError::Malformed(_))
            ));
        }
    }

    #[test]
    fn record_exchange_appends_user_then_assistant() {
        let mut context = ExchangeContext::new(LanguageMode::English, "system");
        let reply = TurnResult {
            evaluation: "Good.".into(),
            next_question: "Why?".into(),
        };
        context.record_exchange("I am an engineer.", &reply);

        let messages = context.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[1].content, "I am an engineer.");
        assert_eq!(messages[2].role, "assistant");
        assert!(messages[2].content.contains("nextQuestion"));
    }

    #[tokio::test]
    async fn run_exchange_routes_commands_and_keeps_the_epoch() {
        let mut examiner = MockExaminer::new();
        examiner.expect_open_session().returning(|language| {
            Ok((
                ExchangeContext::new(language, "system"),
                TurnResult {
                    evaluation: String::new(),
                    next_question: "Tell me about yourself".into(),
                },
            ))
        });

        let event = run_exchange(
            &examiner,
            Command::OpenExchange {
                epoch: 7,
                language: LanguageMode::English,
            },
        )
        .await;

        match event {
            Some(SessionEvent::Opened { epoch, outcome }) => {
                assert_eq!(epoch, 7);
                let (_, first) = outcome.unwrap();
                assert_eq!(first.next_question, "Tell me about yourself");
            }
            other => panic!("expected Opened event, got {other:?}"),
        }

        assert!(run_exchange(&examiner, Command::StartCapture).await.is_none());
    }

    // Live call against the real API; run with `cargo test -- --ignored` and
    // OPENAI_API_KEY set.
    #[tokio::test]
    #[ignore]
    async fn live_open_session_returns_a_first_question() {
        let api_key = std::env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY not set");
        let examiner = ExaminerClient::new(api_key, "gpt-4o".to_string());

        let (context, first) = examiner
            .open_session(LanguageMode::English)
            .await
            .expect("open_session failed");
        assert!(!first.next_question.is_empty());
        assert!(first.evaluation.is_empty());
        assert_eq!(context.messages().len(), 3);
    }
}
