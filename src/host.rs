//! Tick loop driving a kernel from configuration.

use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use keel_config::{Config, HostConfig};
use keel_core::{Kernel, KernelBuilder, SystemDescriptor};

/// Fixed steps run per variable tick at most, so a stall cannot snowball.
const MAX_FIXED_STEPS: u32 = 5;

/// Apply the `[runtime]` and `[systems]` sections to a builder.
pub fn configure(builder: KernelBuilder, config: &Config) -> KernelBuilder {
    let runtime = &config.runtime;
    let mut builder = builder
        .symbols(runtime.symbols.iter().filter(|s| !s.trim().is_empty()).cloned())
        .editor_mode(runtime.editor_mode)
        .profiling(runtime.profiling)
        .require_auto_register(runtime.require_auto_register);

    for name in config.disabled_systems() {
        builder = builder.disable(name);
    }
    for (name, priority) in config.priority_overrides() {
        builder = builder.priority_override(name, priority);
    }
    builder
}

/// Build a kernel holding `descriptors`, configured by `config`.
pub fn build_kernel(config: &Config, descriptors: Vec<SystemDescriptor>) -> Kernel {
    let builder = descriptors
        .into_iter()
        .fold(Kernel::builder(), |builder, descriptor| builder.system(descriptor));
    configure(builder, config).build()
}

/// Seconds between two ticks at `rate` per second.
fn tick_period(rate: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(1.0 / rate)
        .with_context(|| format!("tick rate {} has no usable period", rate))
}

/// Counters from one [`run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub fixed_ticks: u64,
    pub interrupted: bool,
}

/// Drive `kernel` until `max_ticks` ticks have run or Ctrl-C arrives.
///
/// `max_ticks == 0` runs until interrupted. Each tick calls `tick` then
/// `late_tick` with the measured delta; `fixed_tick` runs from an
/// accumulator at the configured fixed rate. The kernel must be running.
///
/// Fails before the first tick when either rate has no representable period.
pub async fn run(kernel: &Kernel, host: &HostConfig, max_ticks: u64) -> anyhow::Result<RunSummary> {
    let period = tick_period(host.tick_rate)?;
    let fixed_step = tick_period(host.fixed_tick_rate)?.as_secs_f64();

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut summary = RunSummary::default();
    let mut accumulator = 0.0_f64;
    let mut last = Instant::now();

    info!(
        tick_rate = host.tick_rate,
        fixed_tick_rate = host.fixed_tick_rate,
        max_ticks,
        "Tick loop started"
    );

    while max_ticks == 0 || summary.ticks < max_ticks {
        tokio::select! {
            _ = interval.tick() => {}
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("Interrupted");
                summary.interrupted = true;
                break;
            }
        }

        let now = Instant::now();
        let delta = now.duration_since(last).as_secs_f64();
        last = now;

        kernel.tick(delta as f32);
        kernel.late_tick(delta as f32);
        summary.ticks += 1;

        accumulator += delta;
        let mut steps = 0;
        while accumulator >= fixed_step {
            if steps == MAX_FIXED_STEPS {
                accumulator = 0.0;
                break;
            }
            kernel.fixed_tick(fixed_step as f32);
            accumulator -= fixed_step;
            summary.fixed_ticks += 1;
            steps += 1;
        }
    }

    info!(ticks = summary.ticks, fixed_ticks = summary.fixed_ticks, "Tick loop finished");
    Ok(summary)
}
