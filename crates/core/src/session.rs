use crate::examiner::{ExchangeContext, ExchangeError, TurnResult};
use crate::language::LanguageMode;
use crate::ledger::{Ledger, Turn};
use crate::report::FinalReport;
use crate::timer::{DeadlineTimer, TimerEvent};
use crate::{Command, SessionEvent};
use thiserror::Error;
use tokio::sync::mpsc::Sender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Initializing,
    Active,
    Processing,
    Finished,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("speech capture is not supported on this device")]
    CaptureUnsupported,
    #[error("could not start the interview: {0}")]
    OpenFailed(String),
    #[error("could not deliver the answer: {0}")]
    TurnFailed(String),
    #[error("could not build the final report: {0}")]
    ReportFailed(String),
    #[error("session precondition violated: {0}")]
    Precondition(&'static str),
    #[error("runtime command channel closed")]
    ChannelClosed,
}

/// The interview session orchestrator.
///
/// Owns the status, the turn ledger, the active answer buffer and the
/// countdown, and coordinates capture, exchange and timer through the
/// `Command`/`SessionEvent` pair. All events pass through `handle` one at a
/// time, so transitions are serialized and a late tick, capture snapshot or
/// exchange completion from a superseded state is simply discarded.
pub struct InterviewSession {
    status: SessionStatus,
    language: LanguageMode,
    epoch: u64,
    timer: DeadlineTimer,
    ledger: Ledger,
    active_buffer: String,
    pending_answer: Option<String>,
    exchange: Option<ExchangeContext>,
    report: Option<FinalReport>,
    last_error: Option<String>,
    /// Set while Processing when the exchange in flight is the closing
    /// report request rather than a turn submission.
    closing: bool,
    capture_supported: bool,
    listening: bool,
}

impl InterviewSession {
    pub fn new(capture_supported: bool) -> Self {
        Self {
            status: SessionStatus::Idle,
            language: LanguageMode::English,
            epoch: 0,
            timer: DeadlineTimer::new(0),
            ledger: Ledger::new(),
            active_buffer: String::new(),
            pending_answer: None,
            exchange: None,
            report: None,
            last_error: None,
            closing: false,
            capture_supported,
            listening: false,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn language(&self) -> LanguageMode {
        self.language
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.timer.remaining()
    }

    pub fn turns(&self) -> &[Turn] {
        self.ledger.turns()
    }

    pub fn active_buffer(&self) -> &str {
        &self.active_buffer
    }

    pub fn report(&self) -> Option<&FinalReport> {
        self.report.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Process one event to completion. Recoverable failures become state
    /// transitions plus a displayable message; an `Err` here means either a
    /// broken invariant (a bug) or a runtime that went away.
    pub async fn handle(
        &mut self,
        event: SessionEvent,
        commands: &Sender<Command>,
    ) -> Result<(), SessionError> {
        match event {
            SessionEvent::Start { language, minutes } => {
                self.start(language, minutes, commands).await
            }
            SessionEvent::Submit => self.submit(commands).await,
            SessionEvent::Finish => {
                if self.status == SessionStatus::Active {
                    self.close_session(commands).await
                } else {
                    Ok(())
                }
            }
            SessionEvent::Quit => self.quit(commands).await,
            SessionEvent::ToggleCapture => self.toggle_capture(commands).await,
            SessionEvent::Tick => self.tick(commands).await,
            SessionEvent::Transcript(text) => {
                // Latest snapshot wins; anything arriving outside an active
                // turn belongs to a state we already left.
                if self.status == SessionStatus::Active {
                    self.active_buffer = text;
                }
                Ok(())
            }
            SessionEvent::CaptureEnded => self.capture_ended(commands).await,
            SessionEvent::Opened { epoch, outcome } => {
                self.on_opened(epoch, outcome, commands).await
            }
            SessionEvent::Answered { epoch, outcome } => {
                self.on_answered(epoch, outcome, commands).await
            }
            SessionEvent::Reported { epoch, outcome } => {
                self.on_reported(epoch, outcome, commands).await
            }
        }
    }

    async fn start(
        &mut self,
        language: LanguageMode,
        minutes: u32,
        commands: &Sender<Command>,
    ) -> Result<(), SessionError> {
        if self.status != SessionStatus::Idle {
            tracing::warn!(status = ?self.status, "ignoring start outside idle");
            return Ok(());
        }
        if minutes == 0 {
            return Err(SessionError::Precondition("time limit must be positive"));
        }
        if !self.capture_supported {
            let message = SessionError::CaptureUnsupported.to_string();
            self.last_error = Some(message.clone());
            return self.send(commands, Command::ShowError(message)).await;
        }

        self.reset();
        self.language = language;
        self.timer = DeadlineTimer::new(minutes * 60);
        self.epoch += 1;
        self.status = SessionStatus::Initializing;
        tracing::info!(%language, minutes, epoch = self.epoch, "starting interview session");
        self.send(commands, Command::OpenExchange { epoch: self.epoch, language })
            .await
    }

    async fn on_opened(
        &mut self,
        epoch: u64,
        outcome: Result<(ExchangeContext, TurnResult), ExchangeError>,
        commands: &Sender<Command>,
    ) -> Result<(), SessionError> {
        if epoch != self.epoch || self.status != SessionStatus::Initializing {
            tracing::debug!(epoch, current = self.epoch, "discarding stale open completion");
            return Ok(());
        }
        match outcome {
            Ok((context, first)) => {
                self.exchange = Some(context);
                let sequence = self
                    .ledger
                    .open_turn(first.next_question.clone())
                    .map_err(|_| SessionError::Precondition("opening turn on a dirty ledger"))?;
                self.active_buffer.clear();
                self.status = SessionStatus::Active;
                self.timer.start();
                self.listening = true;
                self.send(commands, Command::StartCapture).await?;
                self.send(
                    commands,
                    Command::ShowQuestion { sequence, text: first.next_question },
                )
                .await
            }
            Err(e) => {
                let message = SessionError::OpenFailed(e.to_string()).to_string();
                tracing::warn!("{message}");
                self.status = SessionStatus::Idle;
                self.last_error = Some(message.clone());
                self.send(commands, Command::ShowError(message)).await
            }
        }
    }

    async fn submit(&mut self, commands: &Sender<Command>) -> Result<(), SessionError> {
        if self.status != SessionStatus::Active {
            return Ok(());
        }
        let answer = self.active_buffer.trim();
        if answer.is_empty() {
            return Ok(());
        }
        let answer = answer.to_string();
        let context = self
            .exchange
            .clone()
            .ok_or(SessionError::Precondition("submitting without an exchange context"))?;

        // Freeze the turn: nothing may race this submission.
        self.timer.pause();
        self.status = SessionStatus::Processing;
        self.closing = false;
        self.listening = false;
        self.pending_answer = Some(answer.clone());
        self.send(commands, Command::StopCapture).await?;
        self.send(commands, Command::SubmitExchange { epoch: self.epoch, context, answer })
            .await
    }

    async fn on_answered(
        &mut self,
        epoch: u64,
        outcome: Result<TurnResult, ExchangeError>,
        commands: &Sender<Command>,
    ) -> Result<(), SessionError> {
        if epoch != self.epoch || self.status != SessionStatus::Processing || self.closing {
            tracing::debug!(epoch, current = self.epoch, "discarding stale turn completion");
            return Ok(());
        }
        match outcome {
            Ok(reply) => {
                let answer = self
                    .pending_answer
                    .take()
                    .ok_or(SessionError::Precondition("turn reply without a pending answer"))?;
                self.ledger
                    .close_open_turn(answer.clone(), Some(reply.evaluation.clone()))
                    .map_err(|_| SessionError::Precondition("no open turn to close"))?;
                if let Some(context) = self.exchange.as_mut() {
                    context.record_exchange(&answer, &reply);
                }
                let sequence = self
                    .ledger
                    .open_turn(reply.next_question.clone())
                    .map_err(|_| SessionError::Precondition("previous turn still open"))?;

                self.active_buffer.clear();
                self.status = SessionStatus::Active;
                self.timer.start();
                self.listening = true;
                self.send(commands, Command::StartCapture).await?;
                self.send(commands, Command::ShowEvaluation(reply.evaluation)).await?;
                self.send(
                    commands,
                    Command::ShowQuestion { sequence, text: reply.next_question },
                )
                .await
            }
            Err(e) => {
                // Recoverable: the ledger and the frozen buffer are untouched,
                // so the user can retry the same answer.
                let message = SessionError::TurnFailed(e.to_string()).to_string();
                tracing::warn!("{message}");
                self.pending_answer = None;
                self.last_error = Some(message.clone());
                self.status = SessionStatus::Active;
                self.timer.start();
                self.listening = true;
                self.send(commands, Command::StartCapture).await?;
                self.send(commands, Command::ShowError(message)).await
            }
        }
    }

    /// Shared closing path for deadline expiry and an explicit finish: stop
    /// everything, drop the unanswered open turn from the report input, and
    /// hand the closed turns to the exchange.
    async fn close_session(&mut self, commands: &Sender<Command>) -> Result<(), SessionError> {
        self.timer.pause();
        self.status = SessionStatus::Processing;
        self.closing = true;
        self.listening = false;
        self.pending_answer = None;
        self.active_buffer.clear();
        self.send(commands, Command::StopCapture).await?;
        self.send(
            commands,
            Command::CloseExchange {
                epoch: self.epoch,
                turns: self.ledger.closed_turns(),
                language: self.language,
            },
        )
        .await
    }

    async fn on_reported(
        &mut self,
        epoch: u64,
        outcome: Result<FinalReport, ExchangeError>,
        commands: &Sender<Command>,
    ) -> Result<(), SessionError> {
        if epoch != self.epoch || self.status != SessionStatus::Processing || !self.closing {
            tracing::debug!(epoch, current = self.epoch, "discarding stale report completion");
            return Ok(());
        }
        let report = match outcome {
            Ok(report) => report,
            Err(e) => {
                // The terminal state must stay reachable: fall back to a
                // locally synthesized placeholder.
                let message = SessionError::ReportFailed(e.to_string()).to_string();
                tracing::warn!("{message}");
                self.last_error = Some(message);
                FinalReport::degraded(self.language, &e.to_string())
            }
        };
        self.closing = false;
        self.report = Some(report.clone());
        self.status = SessionStatus::Finished;
        tracing::info!(score = report.score, "interview finished");
        self.send(commands, Command::ShowReport(report)).await
    }

    async fn tick(&mut self, commands: &Sender<Command>) -> Result<(), SessionError> {
        match self.timer.tick() {
            Some(TimerEvent::Expired) if self.status == SessionStatus::Active => {
                tracing::info!("session deadline reached");
                self.close_session(commands).await
            }
            _ => Ok(()),
        }
    }

    async fn toggle_capture(&mut self, commands: &Sender<Command>) -> Result<(), SessionError> {
        if self.status != SessionStatus::Active {
            return Ok(());
        }
        if self.listening {
            self.listening = false;
            self.send(commands, Command::StopCapture).await
        } else {
            self.listening = true;
            self.send(commands, Command::StartCapture).await
        }
    }

    async fn capture_ended(&mut self, commands: &Sender<Command>) -> Result<(), SessionError> {
        self.listening = false;
        if self.status == SessionStatus::Active {
            let message = "speech capture stopped unexpectedly".to_string();
            self.last_error = Some(message.clone());
            return self.send(commands, Command::ShowError(message)).await;
        }
        Ok(())
    }

    async fn quit(&mut self, commands: &Sender<Command>) -> Result<(), SessionError> {
        if self.status == SessionStatus::Idle {
            return Ok(());
        }
        tracing::info!(status = ?self.status, "quitting session");
        // A bumped epoch invalidates whatever exchange call is still in
        // flight; its completion will find a stale stamp and be discarded.
        self.epoch += 1;
        self.timer.pause();
        self.status = SessionStatus::Idle;
        self.reset();
        self.send(commands, Command::StopCapture).await?;
        self.send(commands, Command::SessionClosed).await
    }

    fn reset(&mut self) {
        self.ledger.clear();
        self.active_buffer.clear();
        self.pending_answer = None;
        self.exchange = None;
        self.report = None;
        self.last_error = None;
        self.closing = false;
        self.listening = false;
    }

    async fn send(
        &self,
        commands: &Sender<Command>,
        command: Command,
    ) -> Result<(), SessionError> {
        commands
            .send(command)
            .await
            .map_err(|_| SessionError::ChannelClosed)
    }
}
