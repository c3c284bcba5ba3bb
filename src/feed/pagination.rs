/// Visible-count cursor: grows by a fixed step per sentinel intersection, up
/// to a hard ceiling. Past the ceiling the feed stops loading and points the
/// reader at the filters instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibleCount {
    count: usize,
    step: usize,
    max: usize,
}

impl VisibleCount {
    pub fn new(step: usize, max: usize) -> Self {
        let step = step.max(1);
        let max = max.max(step);
        Self { count: step, step, max }
    }

    pub fn get(&self) -> usize {
        self.count
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn at_ceiling(&self) -> bool {
        self.count >= self.max
    }

    /// Returns false (and changes nothing) once the ceiling is reached.
    pub fn grow(&mut self) -> bool {
        if self.at_ceiling() {
            return false;
        }
        self.count = (self.count + self.step).min(self.max);
        true
    }

    pub fn reset(&mut self) {
        self.count = self.step;
    }
}

impl Default for VisibleCount {
    fn default() -> Self {
        Self::new(10, 50)
    }
}
