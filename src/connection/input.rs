//! Hand-off between reactor read completions and the receive loop.

use std::{fmt, io};

use tokio::sync::{Mutex, mpsc};

use crate::buffer::Segment;

/// What a read from [`SocketInput`] produced.
#[derive(Debug)]
pub enum InputEvent {
    /// A segment of received bytes.
    Data(Segment),
    /// The peer ended the stream.
    Completed,
    /// The transport failed.
    Failed(io::Error),
    /// A reader was woken without data, typically to observe a stop request.
    Interrupted,
}

enum Message {
    Data(Segment),
    Completed,
    Failed(io::Error),
    Wake,
}

/// Ordered stream of received segments.
///
/// Reactor completions push into it through an [`InputWriter`]; the
/// connection's receive loop pulls from it. A connection filter reads the
/// raw input and produces a new one carrying plaintext.
pub struct SocketInput {
    writer: InputWriter,
    reader: Mutex<Reader>,
}

struct Reader {
    rx: mpsc::UnboundedReceiver<Message>,
    finished: bool,
}

/// Producer half of a [`SocketInput`].
#[derive(Clone)]
pub struct InputWriter {
    tx: mpsc::UnboundedSender<Message>,
}

impl SocketInput {
    /// Create an empty input.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            writer: InputWriter { tx },
            reader: Mutex::new(Reader {
                rx,
                finished: false,
            }),
        }
    }

    /// Handle for producing into this input.
    #[must_use]
    pub fn writer(&self) -> InputWriter { self.writer.clone() }

    /// Wait for the next event.
    ///
    /// Once the stream has completed or failed, every further read returns
    /// [`InputEvent::Completed`].
    pub async fn read(&self) -> InputEvent {
        let mut reader = self.reader.lock().await;
        if reader.finished {
            return InputEvent::Completed;
        }
        match reader.rx.recv().await {
            Some(Message::Data(segment)) => InputEvent::Data(segment),
            Some(Message::Wake) => InputEvent::Interrupted,
            Some(Message::Failed(e)) => {
                reader.finished = true;
                InputEvent::Failed(e)
            }
            Some(Message::Completed) | None => {
                reader.finished = true;
                InputEvent::Completed
            }
        }
    }

    /// Wake a pending reader without delivering data.
    pub fn interrupt(&self) { self.writer.send(Message::Wake); }
}

impl Default for SocketInput {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for SocketInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketInput").finish_non_exhaustive()
    }
}

impl InputWriter {
    fn send(&self, message: Message) {
        // The reader may already be gone during teardown.
        let _ = self.tx.send(message);
    }

    /// Append received bytes.
    pub fn push(&self, segment: Segment) { self.send(Message::Data(segment)); }

    /// Signal an orderly end of stream.
    pub fn complete(&self) { self.send(Message::Completed); }

    /// Signal a transport failure.
    pub fn fail(&self, error: io::Error) { self.send(Message::Failed(error)); }
}

impl fmt::Debug for InputWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputWriter")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}
