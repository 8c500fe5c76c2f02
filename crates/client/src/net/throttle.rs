/// Fixed-window send limiter for outbound input. Sends past the limit are
/// refused until the window rolls over; nothing is queued.
#[derive(Debug, Clone)]
pub struct InputThrottle {
    limit: u32,
    window_ms: f64,
    window_start_ms: Option<f64>,
    sent: u32,
    dropped: u64,
}

impl InputThrottle {
    pub fn new(limit: u32, window_ms: f64) -> Self {
        Self {
            limit,
            window_ms,
            window_start_ms: None,
            sent: 0,
            dropped: 0,
        }
    }

    pub fn try_send(&mut self, now_ms: f64) -> bool {
        let expired = match self.window_start_ms {
            Some(start) => now_ms - start >= self.window_ms,
            None => true,
        };
        if expired {
            self.window_start_ms = Some(now_ms);
            self.sent = 0;
        }

        if self.sent >= self.limit {
            self.dropped += 1;
            return false;
        }
        self.sent += 1;
        true
    }

    pub fn sent_in_window(&self) -> u32 {
        self.sent
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn reset(&mut self) {
        self.window_start_ms = None;
        self.sent = 0;
    }
}
