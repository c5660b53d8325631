pub mod capture;
pub mod examiner;
pub mod language;
pub mod ledger;
pub mod report;
pub mod session;
pub mod timer;

use crate::examiner::{ExchangeContext, ExchangeError, TurnResult};
use crate::language::LanguageMode;
use crate::ledger::Turn;
use crate::report::FinalReport;

/// Side effects the session core asks the runtime to perform.
///
/// This enum is the primary API for decoupling the session's decision-making
/// from the runtime's execution of side effects (capture control, exchange
/// dispatch, presentation). The runtime executes commands in order, which is
/// what guarantees capture is stopped before any exchange call goes out.
#[derive(Debug, Clone)]
pub enum Command {
    StartCapture,
    StopCapture,
    /// Open a fresh exchange context and fetch the opening question.
    OpenExchange { epoch: u64, language: LanguageMode },
    /// Submit one frozen answer against the session's exchange context.
    SubmitExchange {
        epoch: u64,
        context: ExchangeContext,
        answer: String,
    },
    /// Request the final report from the closed turns.
    CloseExchange {
        epoch: u64,
        turns: Vec<Turn>,
        language: LanguageMode,
    },
    ShowQuestion { sequence: u32, text: String },
    ShowEvaluation(String),
    ShowReport(FinalReport),
    ShowError(String),
    /// The session returned to idle; nothing is running anymore.
    SessionClosed,
}

/// Everything that can happen to a session, funneled through one channel so
/// state transitions are processed strictly one at a time.
#[derive(Debug)]
pub enum SessionEvent {
    /// User command: start a session with the given language and time limit.
    Start { language: LanguageMode, minutes: u32 },
    /// User command: submit the current answer buffer.
    Submit,
    /// User command: end the interview early and go straight to the report.
    Finish,
    /// User command: abandon the session.
    Quit,
    /// User command: toggle the capture device while answering.
    ToggleCapture,
    /// One second of wall clock elapsed.
    Tick,
    /// Full accumulated utterance snapshot from the capture adapter.
    Transcript(String),
    /// The capture stream terminated without being asked to stop.
    CaptureEnded,
    /// Completion of an `OpenExchange` command.
    Opened {
        epoch: u64,
        outcome: Result<(ExchangeContext, TurnResult), ExchangeError>,
    },
    /// Completion of a `SubmitExchange` command.
    Answered {
        epoch: u64,
        outcome: Result<TurnResult, ExchangeError>,
    },
    /// Completion of a `CloseExchange` command.
    Reported {
        epoch: u64,
        outcome: Result<FinalReport, ExchangeError>,
    },
}
