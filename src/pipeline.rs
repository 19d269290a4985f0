//! C4: orders synchronous command/reply pairs FIFO, one in flight at a time.
//!
//! The pipeline does not own the socket. `submit`/`handle_reply` return the
//! command text that the caller (the connection task) should write next, if
//! any — this keeps the ordering logic testable without a real socket (see
//! S2 in the tests below).

use std::collections::VecDeque;

use crate::message::ControlMessage;

/// What a command's reply sink is invoked with.
#[derive(Debug)]
pub enum CommandOutcome {
    Reply(ControlMessage),
    ConnectionLost,
}

pub type ReplySink = Box<dyn FnOnce(CommandOutcome) + Send>;

struct PendingCommand {
    text: String,
    sink: ReplySink,
}

/// The FIFO command queue. One command is ever "in flight": the head of the
/// queue, whose text was handed back to the caller to write.
#[derive(Default)]
pub struct CommandPipeline {
    queue: VecDeque<PendingCommand>,
}

impl CommandPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queues `text`. Returns `Some(text)` if the queue was empty before
    /// this call — the caller must write it to the socket immediately,
    /// since nothing else will trigger that write.
    pub fn submit(&mut self, text: String, sink: ReplySink) -> Option<String> {
        let was_empty = self.queue.is_empty();
        self.queue.push_back(PendingCommand {
            text: text.clone(),
            sink,
        });
        was_empty.then_some(text)
    }

    /// A reply arrived. Resolves the head-of-queue command's sink and
    /// returns the next command's text, if any, for the caller to write.
    pub fn handle_reply(&mut self, message: ControlMessage) -> Option<String> {
        if let Some(pending) = self.queue.pop_front() {
            (pending.sink)(CommandOutcome::Reply(message));
        }
        self.queue.front().map(|p| p.text.clone())
    }

    /// The connection is gone. Every pending sink is notified exactly once
    /// with `ConnectionLost`, in submission order, and the queue is
    /// drained.
    pub fn abort_all(&mut self) {
        while let Some(pending) = self.queue.pop_front() {
            (pending.sink)(CommandOutcome::ConnectionLost);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn message(text: &str) -> ControlMessage {
        ControlMessage {
            status_code: 250,
            lines: vec![text.to_string()],
        }
    }

    fn recording_sink(log: Arc<Mutex<Vec<String>>>, label: &'static str) -> ReplySink {
        Box::new(move |outcome| {
            let entry = match outcome {
                CommandOutcome::Reply(m) => format!("{label}:{}", m.raw()),
                CommandOutcome::ConnectionLost => format!("{label}:lost"),
            };
            log.lock().unwrap().push(entry);
        })
    }

    #[test]
    fn s2_only_first_command_is_written_until_its_reply_arrives() {
        let mut pipeline = CommandPipeline::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let write_a = pipeline.submit("A".to_string(), recording_sink(Arc::clone(&log), "A"));
        assert_eq!(write_a, Some("A".to_string()));

        let write_b = pipeline.submit("B".to_string(), recording_sink(Arc::clone(&log), "B"));
        assert_eq!(write_b, None, "B must not be written while A is in flight");

        let write_c = pipeline.submit("C".to_string(), recording_sink(Arc::clone(&log), "C"));
        assert_eq!(write_c, None);

        assert_eq!(pipeline.len(), 3);

        let next = pipeline.handle_reply(message("250 OK"));
        assert_eq!(next, Some("B".to_string()), "B becomes in-flight after A's reply");
        assert_eq!(*log.lock().unwrap(), vec!["A:250 OK".to_string()]);

        let next = pipeline.handle_reply(message("250 OK"));
        assert_eq!(next, Some("C".to_string()));

        let next = pipeline.handle_reply(message("250 OK"));
        assert_eq!(next, None);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["A:250 OK".to_string(), "B:250 OK".to_string(), "C:250 OK".to_string()]
        );
    }

    #[test]
    fn error_reply_still_consumes_head_of_queue() {
        let mut pipeline = CommandPipeline::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        pipeline.submit("A".to_string(), recording_sink(Arc::clone(&log), "A"));
        pipeline.submit("B".to_string(), recording_sink(Arc::clone(&log), "B"));

        let error = ControlMessage {
            status_code: 515,
            lines: vec!["515 Authentication failed".to_string()],
        };
        let next = pipeline.handle_reply(error);
        assert_eq!(next, Some("B".to_string()));
        assert_eq!(*log.lock().unwrap(), vec!["A:515 Authentication failed".to_string()]);
    }

    #[test]
    fn connection_loss_aborts_every_pending_command_exactly_once() {
        let mut pipeline = CommandPipeline::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        pipeline.submit("A".to_string(), recording_sink(Arc::clone(&log), "A"));
        pipeline.submit("B".to_string(), recording_sink(Arc::clone(&log), "B"));
        pipeline.submit("C".to_string(), recording_sink(Arc::clone(&log), "C"));

        pipeline.abort_all();

        assert!(pipeline.is_empty());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["A:lost".to_string(), "B:lost".to_string(), "C:lost".to_string()]
        );
    }
}
