use crate::sync::Outbound;
use shared::Packet;
use std::sync::Mutex;

/// Outbound sink that keeps everything it is given.
#[derive(Default)]
pub(crate) struct Recorder {
    sent: Mutex<Vec<Packet>>,
}

impl Recorder {
    pub(crate) fn sent(&self) -> Vec<Packet> {
        self.sent.lock().unwrap().clone()
    }
}

impl Outbound for Recorder {
    fn send(&self, packet: Packet) -> bool {
        self.sent.lock().unwrap().push(packet);
        true
    }
}
