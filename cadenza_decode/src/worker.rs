// Background generation: one session on its own thread.
//
// The scoring model is the expensive part of a session and must not block
// the host's UI or audio loop, so `spawn_generation` moves the decoder and
// the model onto a worker thread. The worker streams `GenerationUpdate`s
// through an `mpsc` channel: a `Progress` after every appended token and a
// `Chunk` of detokenized events every `yield_every` tokens (the seed comes
// out in the first chunk, the remainder after the session ends, even when it
// ends in an error). The host polls without blocking, or iterates to block
// until the worker is done.
//
// Cancellation goes through the decoder's `CancelToken` and takes effect at
// the next step boundary. If the host drops the handle's receiver the worker
// notices the failed send and cancels itself.
//
// The session is started on the caller's thread before spawning, so preset
// and mask errors are reported synchronously.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::GenerateError;
use crate::model::ScoringModel;
use crate::session::{Decoder, FinishReason, StreamChunk};

#[derive(Clone, Debug, PartialEq)]
pub enum GenerationUpdate {
    Progress { history_len: usize },
    Chunk(StreamChunk),
}

/// What the worker thread returns: the decoder (for reuse or inspection)
/// and why the session ended.
pub type WorkerResult = Result<(Decoder, FinishReason), GenerateError>;

pub struct GenerationHandle {
    cancel: CancelToken,
    updates: Receiver<GenerationUpdate>,
    thread: thread::JoinHandle<WorkerResult>,
}

impl GenerationHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Updates that have arrived so far, without blocking.
    pub fn poll(&self) -> Vec<GenerationUpdate> {
        self.updates.try_iter().collect()
    }

    /// Block for updates until the worker finishes.
    pub fn iter(&self) -> mpsc::Iter<'_, GenerationUpdate> {
        self.updates.iter()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the worker. Updates not yet received are discarded.
    pub fn join(self) -> WorkerResult {
        self.thread.join().map_err(|_| GenerateError::WorkerPanicked)?
    }
}

/// Start a session on `decoder` and run it to completion on a new thread.
pub fn spawn_generation<M>(mut decoder: Decoder, model: M) -> Result<GenerationHandle, GenerateError>
where
    M: ScoringModel + Send + 'static,
{
    decoder.start_session()?;
    let cancel = decoder.cancel_token();
    let (tx, rx) = mpsc::channel();
    let thread = thread::spawn(move || run_worker(decoder, model, tx));
    Ok(GenerationHandle {
        cancel,
        updates: rx,
        thread,
    })
}

fn run_worker<M: ScoringModel>(
    mut decoder: Decoder,
    mut model: M,
    tx: Sender<GenerationUpdate>,
) -> WorkerResult {
    let batch = decoder.config().yield_every;
    let send = |decoder: &Decoder, update: GenerationUpdate| {
        if tx.send(update).is_err() && !decoder.cancel_token().is_cancelled() {
            debug!("generation updates receiver dropped; cancelling");
            decoder.cancel_token().cancel();
        }
    };

    let outcome = loop {
        if decoder.pending_len() >= batch {
            let chunk = decoder.take_pending();
            send(&decoder, GenerationUpdate::Chunk(chunk));
        }
        match decoder.advance(&mut model) {
            Ok(Some(reason)) => break Ok(reason),
            Ok(None) => {
                let history_len = decoder.history().len();
                send(&decoder, GenerationUpdate::Progress { history_len });
            }
            Err(e) => break Err(e),
        }
    };
    // A failed session still delivers what it appended.
    if decoder.has_pending() {
        let chunk = decoder.take_pending();
        send(&decoder, GenerationUpdate::Chunk(chunk));
    }
    outcome.map(|reason| (decoder, reason))
}
