use std::convert::TryInto;
use std::time::{Duration, Instant};

/// Measures a sequence of work items, e.g. the passes of one frame.
pub struct WorkTimer {
    lap_start: Instant,
    total_time: Duration,
    items_completed: u32,
}

impl WorkTimer {
    pub fn start() -> Self {
        Self {
            lap_start: Instant::now(),
            total_time: Duration::new(0, 0),
            items_completed: 0,
        }
    }

    pub fn total_time(&self) -> Duration {
        self.total_time
    }

    pub fn items_completed(&self) -> u32 {
        self.items_completed
    }

    pub fn complete_item(&mut self, d: Duration) {
        self.total_time += d;
        self.items_completed += 1;
    }

    /// Completes one item that lasted from the previous lap (or the start) until now.
    pub fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now - self.lap_start;
        self.lap_start = now;
        self.complete_item(elapsed);
        elapsed
    }

    pub fn average_time_us(&self) -> u32 {
        let total_time_us: u32 = self.total_time.as_micros().try_into().unwrap_or(u32::MAX);

        total_time_us / self.items_completed.max(1)
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
