/// Fixed-capacity tumbling window over raw samples of one signal kind.
///
/// Samples accumulate until the window is full; the full batch is then
/// handed out in insertion order and the window starts empty again. An
/// aggregate therefore consumes a whole window's worth of samples before
/// the next one can fire.
#[derive(Debug)]
pub struct SampleWindow<T> {
    capacity: usize,
    samples: Vec<T>,
}

impl<T> SampleWindow<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: Vec::with_capacity(capacity),
        }
    }

    /// Appends one sample. Returns the full batch when this sample filled
    /// the window, leaving the window empty for the next cycle.
    pub fn push(&mut self, sample: T) -> Option<Vec<T>> {
        self.samples.push(sample);
        if self.samples.len() >= self.capacity {
            let batch = std::mem::replace(&mut self.samples, Vec::with_capacity(self.capacity));
            Some(batch)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_only_when_full() {
        let mut window = SampleWindow::new(3);
        assert_eq!(window.push(1), None);
        assert_eq!(window.push(2), None);
        assert_eq!(window.push(3), Some(vec![1, 2, 3]));
    }

    #[test]
    fn tumbles_into_a_fresh_window() {
        let mut window = SampleWindow::new(2);
        assert_eq!(window.push(1), None);
        assert_eq!(window.push(2), Some(vec![1, 2]));
        assert!(window.is_empty());
        assert_eq!(window.push(3), None);
        assert_eq!(window.push(4), Some(vec![3, 4]));
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let mut window = SampleWindow::new(0);
        assert_eq!(window.push(7), Some(vec![7]));
    }
}
