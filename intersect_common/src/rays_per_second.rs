use std::collections::VecDeque;

pub struct RaysPerSecond {
    history: VecDeque<f64>
}

impl Default for RaysPerSecond {
    fn default() -> Self {
        Self::new()
    }
}

impl RaysPerSecond {
    pub const RUNNING_AVG_LENGTH: usize = 10;

    pub fn new() -> Self {
        Self {
            history: VecDeque::<f64>::with_capacity(Self::RUNNING_AVG_LENGTH)
        }
    }

    pub fn update(&mut self, rays_per_second: f64) {
        self.history.push_front(rays_per_second);
        if self.history.len() > Self::RUNNING_AVG_LENGTH {
            self.history.pop_back();
        }
    }

    pub fn get_avg(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.history.iter().sum();
        sum / self.history.len() as f64
    }
}
