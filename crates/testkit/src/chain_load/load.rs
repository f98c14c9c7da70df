use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use gear_core::hash_combine;
use tracing::debug;

/// Repetitions of the calibration micro benchmark.
pub const LOAD_BENCHMARK_RUNS: usize = 500;
/// Assumed speed in iterations/µs before calibration.
pub const LOAD_SPEED_BASELINE: f64 = 100.0;
/// Delay caused at scale 1.
pub const LOAD_DEFAULT_TIME: Duration = Duration::from_micros(100);
/// Allocation base size for the memory load.
pub const LOAD_DEFAULT_MEM_SIZE: usize = 1000;

const CALIBRATION_TOLERANCE: f64 = 0.05;
const CALIBRATION_MAX_ROUNDS: usize = 20;

/// Calibrated speeds as `f64` bits; 0 = not yet calibrated.
static CPU_SPEED: AtomicU64 = AtomicU64::new(0);
static MEM_SPEED: AtomicU64 = AtomicU64::new(0);

fn speed_cell(mem: bool) -> &'static AtomicU64 {
    if mem {
        &MEM_SPEED
    } else {
        &CPU_SPEED
    }
}

fn computation_speed(mem: bool) -> f64 {
    match speed_cell(mem).load(Ordering::Relaxed) {
        0 => LOAD_SPEED_BASELINE,
        bits => f64::from_bits(bits),
    }
}

fn set_computation_speed(mem: bool, speed: f64) {
    speed_cell(mem).store(speed.to_bits(), Ordering::Relaxed);
}

/// Run `op` once and return its wall-clock time in µs.
pub fn benchmark_time(op: impl FnOnce()) -> f64 {
    let start = Instant::now();
    op();
    start.elapsed().as_secs_f64() * 1e6
}

/// Average wall-clock time of `op` over `runs` repetitions, in µs.
pub fn micro_benchmark(mut op: impl FnMut(), runs: usize) -> f64 {
    let runs = runs.max(1);
    let start = Instant::now();
    for _ in 0..runs {
        op();
    }
    start.elapsed().as_secs_f64() * 1e6 / runs as f64
}

/// Calibrated synthetic processing load.
///
/// Either burns CPU in a tight hashing loop, or (`use_allocation`) adds up
/// a heap block repeatedly. `time_base` is the delay at scale 1. The
/// process-wide speed measured by [`calibrate`](Self::calibrate) translates
/// the desired delay into loop rounds; without calibration the timing is
/// only a rough guess.
#[derive(Debug, Clone)]
pub struct ComputationalLoad {
    pub time_base: Duration,
    pub size_base: usize,
    pub use_allocation: bool,
}

impl Default for ComputationalLoad {
    fn default() -> Self {
        Self {
            time_base: LOAD_DEFAULT_TIME,
            size_base: LOAD_DEFAULT_MEM_SIZE,
            use_allocation: false,
        }
    }
}

impl ComputationalLoad {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cause a delay of `scale · time_base`; returns the time taken in µs.
    pub fn invoke(&self, scale: usize) -> f64 {
        if scale == 0 || self.time_base < Duration::from_micros(1) {
            return 0.0;
        }
        if self.use_allocation {
            benchmark_time(|| self.cause_mem_process_load(scale))
        } else {
            benchmark_time(|| self.cause_computation_load(scale))
        }
    }

    /// Averaged runtime in the current configuration, in µs.
    pub fn benchmark(&self, scale: usize) -> f64 {
        micro_benchmark(
            || {
                self.invoke(scale);
            },
            LOAD_BENCHMARK_RUNS,
        )
    }

    /// Measure the speed of both load variants.
    pub fn calibrate(&self) {
        let mut probe = self.clone();
        if probe.time_base < Duration::from_micros(1) {
            probe.time_base = LOAD_DEFAULT_TIME;
        }
        for mem in [false, true] {
            probe.use_allocation = mem;
            probe.perform_incremental_calibration();
        }
    }

    pub fn maybe_calibrate(&self) {
        if !self.is_calibrated() {
            self.calibrate();
        }
    }

    pub fn is_calibrated(&self) -> bool {
        CPU_SPEED.load(Ordering::Relaxed) != 0
    }

    fn rounds_needed(&self, scale: usize) -> u64 {
        let desired_micros = scale as f64 * self.time_base.as_secs_f64() * 1e6;
        (desired_micros * computation_speed(self.use_allocation)) as u64
    }

    /// Block size and repetitions for the memory load.
    fn alloc_needed(&self, scale: usize) -> (usize, u64) {
        let cnt = self.rounds_needed(scale);
        let siz = (scale * self.size_base).max(1) as u64;
        let rep = (cnt / siz).max(1);
        let siz = (cnt / rep).max(2);
        (siz as usize, rep)
    }

    fn cause_computation_load(&self, scale: usize) {
        let mut scree = black_box(scale as u64);
        for _ in 0..self.rounds_needed(scale) {
            let value = scree;
            hash_combine(&mut scree, value);
        }
        black_box(scree);
    }

    fn cause_mem_process_load(&self, scale: usize) {
        let (siz, rounds) = self.alloc_needed(scale);
        let mut block = vec![0u64; siz];
        block[0] = black_box(1);
        for _ in 0..rounds {
            for i in 0..siz - 1 {
                block[i + 1] = block[i + 1].wrapping_add(block[i]);
            }
        }
        black_box(block[siz - 1]);
    }

    fn determine_speed(&self) -> f64 {
        let micros = self.benchmark(1);
        let steps = self.rounds_needed(1) as f64;
        if micros > 0.0 {
            steps / micros
        } else {
            computation_speed(self.use_allocation)
        }
    }

    fn perform_incremental_calibration(&self) {
        let mem = self.use_allocation;
        let mut prev = computation_speed(mem);
        for _ in 0..CALIBRATION_MAX_ROUNDS {
            let speed = self.determine_speed();
            if !speed.is_normal() {
                break;
            }
            set_computation_speed(mem, speed);
            let delta = (1.0 - speed / prev).abs();
            prev = speed;
            if delta <= CALIBRATION_TOLERANCE {
                break;
            }
        }
        debug!(
            "ComputationalLoad calibrated ({}): {:.1} iterations/µs",
            if mem { "mem" } else { "cpu" },
            prev
        );
    }
}
