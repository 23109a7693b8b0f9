//! Lock-free transport command queue.
//!
//! Discrete transport operations travel from the control thread to the
//! audio thread over an SPSC ringbuffer and are drained at block
//! boundaries, so no mid-block state changes occur. Continuous parameters
//! (pitch, volume, stretch) do not come through here; they live in
//! [`super::SessionAtomics`] and are sampled once per block.
//!
//! `rtrb` is allocation-free after construction and wait-free on both
//! ends, which is what lets the audio callback drain commands without ever
//! blocking on the control thread.

use basedrop::Shared;

use crate::types::AudioClip;

/// Queue depth; transport commands are rare, this is generous.
const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Transport commands processed at the start of each audio block.
pub enum SessionCommand {
    /// Resume playback
    Play,
    /// Hold position, output silence
    Pause,
    /// Jump to an input-domain frame
    Seek(u64),
    /// Loop a practice region (input-domain frames, start < end)
    SetLoop { start: u64, end: u64 },
    /// Drop the loop region
    ClearLoop,
    /// Swap in a different clip without tearing the session down.
    /// `Shared` defers the old clip's deallocation off the audio thread.
    ReplaceClip(Shared<AudioClip>),
}

/// Control-side handle for pushing commands.
pub struct CommandSender {
    producer: rtrb::Producer<SessionCommand>,
}

impl CommandSender {
    /// Push a command; drops it with a warning if the queue is full
    /// (the audio thread is clearly not draining, so blocking would only
    /// make things worse).
    pub fn send(&mut self, command: SessionCommand) {
        if self.producer.push(command).is_err() {
            log::warn!("session command queue full, command dropped");
        }
    }
}

/// Create the SPSC command channel
pub fn command_channel() -> (CommandSender, rtrb::Consumer<SessionCommand>) {
    let (producer, consumer) = rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY);
    (CommandSender { producer }, consumer)
}
