/// Throughput counters collected as frames are handed to the transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxStats {
    /// Frames handed out.
    pub frames: u64,
    /// Payloads carried by those frames.
    pub payloads: u64,
    /// Fewest payloads seen in one frame.
    pub payloads_min: Option<usize>,
    /// Most payloads seen in one frame.
    pub payloads_max: Option<usize>,
    /// Sum of on-wire frame sizes.
    pub bytes: u64,
    /// Smallest on-wire frame.
    pub size_min: Option<usize>,
    /// Largest on-wire frame.
    pub size_max: Option<usize>,
}

impl TxStats {
    pub(crate) fn record(&mut self, payloads: usize, wire_len: usize) {
        self.frames += 1;
        self.payloads += payloads as u64;
        self.bytes += wire_len as u64;
        self.payloads_min = Some(self.payloads_min.map_or(payloads, |m| m.min(payloads)));
        self.payloads_max = Some(self.payloads_max.map_or(payloads, |m| m.max(payloads)));
        self.size_min = Some(self.size_min.map_or(wire_len, |m| m.min(wire_len)));
        self.size_max = Some(self.size_max.map_or(wire_len, |m| m.max(wire_len)));
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Average payloads per frame, `None` before the first frame.
    pub fn mean_payloads(&self) -> Option<f64> {
        (self.frames > 0).then(|| self.payloads as f64 / self.frames as f64)
    }

    /// Average on-wire frame size, `None` before the first frame.
    pub fn mean_frame_size(&self) -> Option<f64> {
        (self.frames > 0).then(|| self.bytes as f64 / self.frames as f64)
    }
}
