//! Transaction batcher
//!
//! Accumulates a sequence of named commands and sends them as one round
//! trip, so multi-step setup (clear inventory, reset position, load
//! entities) looks atomic to callers. Partial failure of one command never
//! aborts the remainder of the same round trip; per-command failures are
//! surfaced in the result map, distinct from successes.

use crate::decode::{decode, Decoded};
use crate::error::BatchError;
use crate::transport::{BatchCommand, Transport};
use indexmap::IndexMap;
use std::time::Duration;

/// Prefix marking a raw, non-measured script statement on the wire.
pub const RAW_PREFIX: &str = "/raw ";

/// Reply prefix the simulator uses for commands it could not execute.
pub const ERROR_PREFIX: &str = "error:";

/// Outcome of one command within an executed batch.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Raw reply body as received.
    pub raw: String,
    /// Decoded reply.
    pub decoded: Decoded,
    /// Time from batch submission until this reply was read.
    pub elapsed: Duration,
}

impl CommandOutcome {
    /// Whether the simulator reported this command as failed, or the reply
    /// could not be decoded at all.
    #[inline]
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.raw.starts_with(ERROR_PREFIX) || self.decoded.is_failure()
    }

    /// The simulator-side failure message, if any.
    #[must_use]
    pub fn failure_message(&self) -> Option<&str> {
        if let Some(rest) = self.raw.strip_prefix(ERROR_PREFIX) {
            return Some(rest.trim());
        }
        match &self.decoded {
            Decoded::Failure(reason) => Some(reason),
            Decoded::Value(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchState {
    Open,
    Executed,
}

#[derive(Debug, Clone)]
struct BatchEntry {
    id: String,
    command: String,
    raw: bool,
}

/// An ordered, single-use batch of named commands.
///
/// Lifecycle: `begin` -> `add`* -> `execute`. The batch always clears
/// itself after `execute`, success or failure, so a transaction can never
/// be replayed by accident.
#[derive(Debug)]
pub struct CommandBatch {
    entries: Vec<BatchEntry>,
    state: BatchState,
}

impl CommandBatch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            state: BatchState::Open,
        }
    }

    /// Start a fresh batch. Discards any uncommitted prior batch with a
    /// warning - committed work is never lost because `execute` clears.
    pub fn begin(&mut self) {
        if self.state == BatchState::Open && !self.entries.is_empty() {
            tracing::warn!(
                discarded = self.entries.len(),
                "begin() discarding uncommitted batch entries"
            );
        }
        self.entries.clear();
        self.state = BatchState::Open;
    }

    /// Append one command under a batch-unique identifier. `raw` commands
    /// are prefixed on the wire to mark them as non-measured script
    /// statements; non-raw commands go out verbatim (already-rendered
    /// templates).
    pub fn add(
        &mut self,
        id: impl Into<String>,
        command: impl Into<String>,
        raw: bool,
    ) -> Result<(), BatchError> {
        let id = id.into();
        if self.state == BatchState::Executed {
            return Err(BatchError::AddAfterExecute(id));
        }
        if self.entries.iter().any(|e| e.id == id) {
            return Err(BatchError::DuplicateId(id));
        }
        self.entries.push(BatchEntry {
            id,
            command: command.into(),
            raw,
        });
        Ok(())
    }

    /// Number of commands queued in the open batch.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Send the batch as one round trip and decode every reply.
    ///
    /// Returns identifier -> outcome in submission order. The batch is
    /// cleared afterward regardless of the result.
    pub async fn execute(
        &mut self,
        transport: &mut dyn Transport,
    ) -> Result<IndexMap<String, CommandOutcome>, BatchError> {
        let entries = std::mem::take(&mut self.entries);
        self.state = BatchState::Executed;
        if entries.is_empty() {
            return Err(BatchError::Empty);
        }

        let commands: Vec<BatchCommand> = entries
            .iter()
            .map(|e| BatchCommand {
                id: e.id.clone(),
                body: if e.raw {
                    format!("{RAW_PREFIX}{}", e.command)
                } else {
                    e.command.clone()
                },
            })
            .collect();

        let replies = transport.send_batch(&commands).await?;

        let mut outcomes = IndexMap::with_capacity(replies.len());
        for reply in replies {
            let decoded = decode(&reply.body);
            outcomes.insert(
                reply.id,
                CommandOutcome {
                    raw: reply.body,
                    decoded,
                    elapsed: reply.elapsed,
                },
            );
        }
        Ok(outcomes)
    }
}

impl Default for CommandBatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Value;
    use crate::error::ProtocolError;
    use crate::transport::RawReply;
    use std::time::Instant;

    /// Transport double that answers from a fixed command -> reply map.
    struct MapTransport {
        replies: Vec<(&'static str, &'static str)>,
        seen: Vec<String>,
    }

    #[async_trait::async_trait]
    impl Transport for MapTransport {
        async fn send(&mut self, command: &str) -> Result<String, ProtocolError> {
            self.seen.push(command.to_string());
            Ok(self.lookup(command))
        }

        async fn send_batch(
            &mut self,
            commands: &[BatchCommand],
        ) -> Result<Vec<RawReply>, ProtocolError> {
            let started = Instant::now();
            let mut out = Vec::new();
            for command in commands {
                self.seen.push(command.body.clone());
                out.push(RawReply {
                    id: command.id.clone(),
                    body: self.lookup(&command.body),
                    elapsed: started.elapsed(),
                });
            }
            Ok(out)
        }

        async fn reconnect(&mut self) -> Result<(), ProtocolError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ProtocolError> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    impl MapTransport {
        fn lookup(&self, command: &str) -> String {
            self.replies
                .iter()
                .find(|(c, _)| *c == command)
                .map(|(_, r)| r.to_string())
                .unwrap_or_else(|| "error: unknown command".to_string())
        }
    }

    #[tokio::test]
    async fn execute_returns_outcomes_in_submission_order() {
        let mut transport = MapTransport {
            replies: vec![
                ("/raw a()", "1"),
                ("/raw b()", "2"),
                ("c()", "{ [1] = 3 }"),
            ],
            seen: Vec::new(),
        };
        let mut batch = CommandBatch::new();
        batch.begin();
        batch.add("first", "a()", true).unwrap();
        batch.add("second", "b()", true).unwrap();
        batch.add("third", "c()", false).unwrap();

        let outcomes = batch.execute(&mut transport).await.unwrap();
        let ids: Vec<&String> = outcomes.keys().collect();
        assert_eq!(ids, ["first", "second", "third"]);
        assert_eq!(
            outcomes["third"].decoded,
            Decoded::Value(Value::Seq(vec![Value::Int(3)]))
        );
        // Raw entries were marked on the wire, the template entry was not.
        assert_eq!(transport.seen, ["/raw a()", "/raw b()", "c()"]);
    }

    #[tokio::test]
    async fn elapsed_is_monotone_in_submission_order() {
        let mut transport = MapTransport {
            replies: vec![("/raw a()", "1"), ("/raw b()", "2"), ("/raw c()", "3")],
            seen: Vec::new(),
        };
        let mut batch = CommandBatch::new();
        batch.begin();
        for id in ["a", "b", "c"] {
            batch.add(id, format!("{id}()"), true).unwrap();
        }
        let outcomes = batch.execute(&mut transport).await.unwrap();
        let elapsed: Vec<_> = outcomes.values().map(|o| o.elapsed).collect();
        for window in elapsed.windows(2) {
            assert!(window[0] <= window[1]);
        }
    }

    #[tokio::test]
    async fn per_command_failures_do_not_abort_the_batch() {
        let mut transport = MapTransport {
            replies: vec![("/raw good()", "42")],
            seen: Vec::new(),
        };
        let mut batch = CommandBatch::new();
        batch.begin();
        batch.add("good", "good()", true).unwrap();
        batch.add("bad", "missing()", true).unwrap();

        let outcomes = batch.execute(&mut transport).await.unwrap();
        assert!(!outcomes["good"].is_failure());
        assert!(outcomes["bad"].is_failure());
        assert_eq!(outcomes["bad"].failure_message(), Some("unknown command"));
    }

    #[tokio::test]
    async fn add_after_execute_is_an_error_until_begin() {
        let mut transport = MapTransport {
            replies: vec![("/raw a()", "1")],
            seen: Vec::new(),
        };
        let mut batch = CommandBatch::new();
        batch.begin();
        batch.add("a", "a()", true).unwrap();
        batch.execute(&mut transport).await.unwrap();

        assert!(matches!(
            batch.add("b", "b()", true),
            Err(BatchError::AddAfterExecute(_))
        ));
        batch.begin();
        assert!(batch.add("b", "b()", true).is_ok());
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let mut batch = CommandBatch::new();
        batch.begin();
        batch.add("x", "a()", true).unwrap();
        assert!(matches!(
            batch.add("x", "b()", true),
            Err(BatchError::DuplicateId(_))
        ));
    }

    #[tokio::test]
    async fn batch_clears_even_on_transport_failure() {
        struct FailingTransport;

        #[async_trait::async_trait]
        impl Transport for FailingTransport {
            async fn send(&mut self, _command: &str) -> Result<String, ProtocolError> {
                Err(ProtocolError::ConnectionClosed)
            }
            async fn send_batch(
                &mut self,
                _commands: &[BatchCommand],
            ) -> Result<Vec<RawReply>, ProtocolError> {
                Err(ProtocolError::ConnectionClosed)
            }
            async fn reconnect(&mut self) -> Result<(), ProtocolError> {
                Ok(())
            }
            async fn close(&mut self) -> Result<(), ProtocolError> {
                Ok(())
            }
            fn is_open(&self) -> bool {
                false
            }
        }

        let mut transport = FailingTransport;
        let mut batch = CommandBatch::new();
        batch.begin();
        batch.add("a", "a()", true).unwrap();
        let result = batch.execute(&mut transport).await;
        assert!(matches!(result, Err(BatchError::Transport(_))));
        assert!(batch.is_empty());
        // Replay is impossible without a fresh begin().
        assert!(matches!(
            batch.add("a", "a()", true),
            Err(BatchError::AddAfterExecute(_))
        ));
    }

    #[tokio::test]
    async fn empty_batch_cannot_execute() {
        let mut transport = MapTransport {
            replies: vec![],
            seen: Vec::new(),
        };
        let mut batch = CommandBatch::new();
        batch.begin();
        assert!(matches!(
            batch.execute(&mut transport).await,
            Err(BatchError::Empty)
        ));
    }
}
