use super::{
    stats::{self, MIB},
    worker::WorkerId,
};
use log::{debug, info, trace, warn};
use std::{
    hint, mem,
    sync::atomic::{AtomicBool, Ordering},
};

/// Number of allocation steps towards the target.
const STEPS: u64 = 10;

/// Share of the target that counts as reached.
const THRESHOLD: f64 = 0.9;

/// Factor applied to the step size when an allocation is refused.
const BACKOFF: f64 = 0.8;

/// Size of one buffer element in bytes.
const ELEMENT: usize = mem::size_of::<f64>();

/// Grows an exclusively owned buffer towards a resident memory target and
/// keeps every element warm. The touch pass is the CPU burn: it runs
/// unconditionally, never sleeps and never yields, so a ramp saturates its
/// core from the first iteration on.
///
/// Resident memory is accounted per process, not per thread. The share of
/// this ramp is tracked exactly via the held buffer, while the measured
/// resident size of the whole process acts as a brake that keeps the sum of
/// all ramps within the configured budget.
pub(super) struct MemoryRamp {
    /// Target in bytes.
    target: u64,
    /// Process wide resident limit in bytes.
    brake: u64,
    /// Elements added per allocation step.
    step: usize,
    /// The held load. Never shrinks.
    buffer: Vec<f64>,
}

impl MemoryRamp {
    /// Create a ramp towards `target_mib`. Growth pauses while the resident
    /// size of the whole process exceeds `budget_mib`.
    pub(super) fn new(target_mib: u64, budget_mib: u64) -> MemoryRamp {
        let target = target_mib * MIB;
        let step = ((target / STEPS) as usize / ELEMENT).max(1);
        MemoryRamp {
            target,
            brake: budget_mib * MIB,
            step,
            buffer: Vec::new(),
        }
    }

    /// Drive the ramp until `stop` is set. The flag is checked once per
    /// pass, so a stop request takes effect within one touch pass.
    pub(super) fn run(mut self, worker: WorkerId, stop: &AtomicBool) {
        info!(
            "{}: ramping towards {} MiB in steps of {} elements",
            worker,
            self.target / MIB,
            self.step
        );

        let mut settled = false;
        while !stop.load(Ordering::Relaxed) {
            match stats::resident() {
                Ok(resident) if !self.saturated() && resident < self.brake => {
                    settled = false;
                    let step = self.step;
                    if self.grow() {
                        debug!(
                            "{}: holding {} MiB of {} MiB, {} MiB resident",
                            worker,
                            self.held() / MIB,
                            self.target / MIB,
                            resident / MIB
                        );
                    } else {
                        warn!(
                            "{}: allocation of {} elements refused, stepping down to {}",
                            worker, step, self.step
                        );
                    }
                }
                Ok(resident) => {
                    if !settled {
                        if self.saturated() {
                            info!(
                                "{}: target reached, holding {} MiB in {} elements",
                                worker,
                                self.held() / MIB,
                                self.buffer.len()
                            );
                        } else {
                            info!(
                                "{}: budget reached at {} MiB resident, holding {} MiB",
                                worker,
                                resident / MIB,
                                self.held() / MIB
                            );
                        }
                        settled = true;
                    }
                    trace!(
                        "{}: {} MiB resident, holding {} MiB in {} elements",
                        worker,
                        resident / MIB,
                        self.held() / MIB,
                        self.buffer.len()
                    );
                }
                Err(e) => warn!("{}: failed to probe the resident size: {:#}", worker, e),
            }
            self.touch();
        }

        debug!("{}: stopped, releasing {} MiB", worker, self.held() / MIB);
    }

    /// Bytes currently held.
    fn held(&self) -> u64 {
        (self.buffer.len() * ELEMENT) as u64
    }

    /// True once the held buffer reaches the threshold share of the target.
    fn saturated(&self) -> bool {
        self.held() >= (self.target as f64 * THRESHOLD) as u64
    }

    /// Try to grow the buffer by one step. Shrinks the step when the
    /// allocator refuses and reports whether the buffer grew.
    fn grow(&mut self) -> bool {
        match self.buffer.try_reserve(self.step) {
            Ok(()) => {
                let len = self.buffer.len();
                self.buffer.resize(len + self.step, 1.0);
                true
            }
            Err(_) => {
                self.step_down();
                false
            }
        }
    }

    /// Shrink the allocation step, keeping at least one element.
    fn step_down(&mut self) {
        self.step = ((self.step as f64 * BACKOFF) as usize).max(1);
    }

    /// Mutate every element to keep the pages resident and the core busy.
    fn touch(&mut self) {
        for element in &mut self.buffer {
            *element += 1.0;
        }
        hint::black_box(self.buffer.as_slice());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use super::*;

    #[test]
    fn growth_is_monotonic() {
        let mut ramp = MemoryRamp::new(8, 8);
        let mut last = 0;
        while !ramp.saturated() {
            assert!(ramp.grow());
            assert!(ramp.buffer.len() > last);
            last = ramp.buffer.len();
        }
        assert!(ramp.held() >= 7 * MIB);
        assert!(ramp.held() <= 8 * MIB);
    }

    #[test]
    fn step_down_on_refused_allocation() {
        let mut ramp = MemoryRamp::new(1, 1);
        // A reservation of this size always exceeds the layout limits
        ramp.step = usize::MAX / ELEMENT;
        assert!(!ramp.grow());
        assert!(ramp.step < usize::MAX / ELEMENT);
        let step = ramp.step;
        assert!(!ramp.grow());
        assert!(ramp.step < step);
        assert!(ramp.buffer.is_empty());
    }

    #[test]
    fn step_down_keeps_one_element() {
        let mut ramp = MemoryRamp::new(1, 1);
        ramp.step = 10;
        ramp.step_down();
        assert_eq!(ramp.step, 8);
        ramp.step = 1;
        ramp.step_down();
        assert_eq!(ramp.step, 1);
    }

    #[test]
    fn touch_mutates_every_element() {
        let mut ramp = MemoryRamp::new(1, 1);
        ramp.step = 4;
        assert!(ramp.grow());
        ramp.touch();
        ramp.touch();
        assert!(ramp.buffer.iter().all(|element| *element == 3.0));
    }

    #[test]
    fn saturation_threshold() {
        let mut ramp = MemoryRamp::new(8, 8);
        assert!(!ramp.saturated());
        ramp.buffer = vec![0.0; (7 * MIB) as usize / ELEMENT];
        assert!(!ramp.saturated());
        ramp.buffer = vec![0.0; (8 * MIB) as usize / ELEMENT];
        assert!(ramp.saturated());
    }

    #[test]
    fn run_honors_the_stop_flag() {
        let ramp = MemoryRamp::new(1, 1);
        let stop = AtomicBool::new(true);
        ramp.run(WorkerId(0), &stop);
    }
}
