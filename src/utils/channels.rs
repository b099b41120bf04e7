use crate::speech::{PipelineEvent, Utterance};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

/// Default capacity of the event channel
pub const EVENT_BUFFER: usize = 256;

/// Channels connecting producers to the speech worker
pub struct PipelineChannels {
    /// Unbounded so `enqueue` never blocks
    pub utterance_tx: Sender<Utterance>,
    pub utterance_rx: Receiver<Utterance>,
    /// Never sent on; dropping the sender wakes the worker for shutdown
    pub shutdown_tx: Sender<()>,
    pub shutdown_rx: Receiver<()>,
    /// Bounded; the worker drops events instead of blocking when it is full
    pub event_tx: Sender<PipelineEvent>,
    pub event_rx: Receiver<PipelineEvent>,
}

impl PipelineChannels {
    pub fn new(event_buffer: usize) -> Self {
        let (utterance_tx, utterance_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = bounded(0);
        let (event_tx, event_rx) = bounded(event_buffer);

        Self {
            utterance_tx,
            utterance_rx,
            shutdown_tx,
            shutdown_rx,
            event_tx,
            event_rx,
        }
    }
}

impl Default for PipelineChannels {
    fn default() -> Self {
        Self::new(EVENT_BUFFER)
    }
}
