use serde::Serialize;
use thiserror::Error;

/// One question/answer exchange unit.
///
/// `sequence` and `question` are set at creation and never change. `answer`
/// and `evaluation` are set together, exactly once, when the turn is closed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub sequence: u32,
    pub question: String,
    pub answer: String,
    pub evaluation: Option<String>,
}

impl Turn {
    /// A turn is open until its answer has been recorded.
    pub fn is_open(&self) -> bool {
        self.answer.is_empty()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("a turn is already open")]
    TurnStillOpen,
    #[error("no open turn to close")]
    NoOpenTurn,
    #[error("refusing to close a turn with an empty answer")]
    EmptyAnswer,
}

/// Ordered record of all turns in a session. Append-only, except that the
/// most recent entry is mutated once when it is closed.
#[derive(Debug, Default)]
pub struct Ledger {
    turns: Vec<Turn>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new open turn. At most one turn may be open at a time.
    /// Returns the assigned 1-based sequence number.
    pub fn open_turn(&mut self, question: String) -> Result<u32, LedgerError> {
        if self.turns.last().is_some_and(Turn::is_open) {
            return Err(LedgerError::TurnStillOpen);
        }
        let sequence = self.turns.len() as u32 + 1;
        self.turns.push(Turn {
            sequence,
            question,
            answer: String::new(),
            evaluation: None,
        });
        Ok(sequence)
    }

    /// Close the open turn, recording its answer and evaluation together.
    pub fn close_open_turn(
        &mut self,
        answer: String,
        evaluation: Option<String>,
    ) -> Result<(), LedgerError> {
        if answer.trim().is_empty() {
            return Err(LedgerError::EmptyAnswer);
        }
        match self.turns.last_mut() {
            Some(turn) if turn.is_open() => {
                turn.answer = answer;
                turn.evaluation = evaluation;
                Ok(())
            }
            _ => Err(LedgerError::NoOpenTurn),
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The subsequence of answered turns, cloned for the report exchange.
    pub fn closed_turns(&self) -> Vec<Turn> {
        self.turns.iter().filter(|t| !t.is_open()).cloned().collect()
    }

    pub fn open_turn_ref(&self) -> Option<&Turn> {
        self.turns.last().filter(|t| t.is_open())
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_are_dense_and_one_based() {
        let mut ledger = Ledger::new();
        assert_eq!(ledger.open_turn("q1".into()), Ok(1));
        ledger
            .close_open_turn("a1".into(), Some("fine".into()))
            .unwrap();
        assert_eq!(ledger.open_turn("q2".into()), Ok(2));
        ledger.close_open_turn("a2".into(), None).unwrap();
        assert_eq!(ledger.open_turn("q3".into()), Ok(3));

        let seqs: Vec<u32> = ledger.turns().iter().map(|t| t.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn at_most_one_open_turn() {
        let mut ledger = Ledger::new();
        ledger.open_turn("q1".into()).unwrap();
        assert_eq!(ledger.open_turn("q2".into()), Err(LedgerError::TurnStillOpen));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn closing_requires_an_open_turn_and_a_real_answer() {
        let mut ledger = Ledger::new();
        assert_eq!(
            ledger.close_open_turn("a".into(), None),
            Err(LedgerError::NoOpenTurn)
        );
        ledger.open_turn("q1".into()).unwrap();
        assert_eq!(
            ledger.close_open_turn("   ".into(), None),
            Err(LedgerError::EmptyAnswer)
        );
        ledger.close_open_turn("real answer".into(), None).unwrap();
        assert_eq!(
            ledger.close_open_turn("again".into(), None),
            Err(LedgerError::NoOpenTurn)
        );
    }

    #[test]
    fn closed_turns_excludes_the_trailing_open_question() {
        let mut ledger = Ledger::new();
        ledger.open_turn("q1".into()).unwrap();
        ledger
            .close_open_turn("a1".into(), Some("good".into()))
            .unwrap();
        ledger.open_turn("q2".into()).unwrap();

        let closed = ledger.closed_turns();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].sequence, 1);
        assert_eq!(ledger.len(), 2);
        assert!(ledger.open_turn_ref().is_some());
    }
}
