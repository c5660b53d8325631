use crate::language::LanguageMode;
use serde::{Deserialize, Serialize};

/// Terminal artifact of a session, built by the collaborator from the closed
/// turns. On the wire the strength/improvement lists are named
/// `goodPoints`/`badPoints`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub score: u8,
    pub summary: String,
    #[serde(rename = "goodPoints")]
    pub strengths: Vec<String>,
    #[serde(rename = "badPoints")]
    pub improvements: Vec<String>,
    pub advice: String,
}

impl FinalReport {
    /// Locally synthesized placeholder used when report generation fails, so
    /// the session can still reach its terminal state.
    pub fn degraded(language: LanguageMode, detail: &str) -> Self {
        let (summary, advice) = match language {
            LanguageMode::English => (
                format!("The evaluation service could not produce a report ({detail}). Your answers were recorded, but no score is available for this session."),
                "Please try another session later.".to_string(),
            ),
            LanguageMode::Japanese => (
                format!("評価サービスからレポートを取得できませんでした（{detail}）。回答は記録されましたが、今回のセッションのスコアはありません。"),
                "時間をおいて、もう一度セッションをお試しください。".to_string(),
            ),
        };
        Self {
            score: 0,
            summary,
            strengths: Vec::new(),
            improvements: Vec::new(),
            advice,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_report_scores_zero_and_explains_itself() {
        let report = FinalReport::degraded(LanguageMode::English, "connection reset");
        assert_eq!(report.score, 0);
        assert!(report.summary.contains("connection reset"));
        assert!(report.strengths.is_empty());

        let report_ja = FinalReport::degraded(LanguageMode::Japanese, "timeout");
        assert_eq!(report_ja.score, 0);
        assert!(report_ja.summary.contains("timeout"));
    }

    #[test]
    fn wire_names_use_good_and_bad_points() {
        let report = FinalReport {
            score: 82,
            summary: "solid".into(),
            strengths: vec!["clear".into()],
            improvements: vec!["examples".into()],
            advice: "practice".into(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("goodPoints").is_some());
        assert!(json.get("badPoints").is_some());
        assert!(json.get("strengths").is_none());
    }
}
