use anyhow::Result;
use bms_pack_simulator::{config, runner, telemetry};
use config::Config;
use runner::Simulation;
use telemetry::init_tracing;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = Config::load()?;
    let mut sim = Simulation::build(&cfg)?;
    let mut rx = sim.subscribe();

    info!(
        seed = cfg.seed,
        dt_s = cfg.runner.dt_s,
        duration_s = cfg.runner.duration_s,
        frame_rate_hz = cfg.runner.frame_rate_hz,
        "starting BMS pack simulator"
    );

    // Frame consumer standing in for the transport encoder. It drains the
    // bounded queue at its own pace; the physics loop never waits for it.
    let consumer = tokio::spawn(async move {
        let mut received = 0u64;
        loop {
            match rx.recv().await {
                Ok(frame) => {
                    received += 1;
                    debug!(
                        sim_time_s = frame.sim_time_s,
                        pack_voltage_v = frame.pack_voltage_v,
                        pack_current_a = frame.pack_current_a,
                        status_flags = frame.status_flags,
                        "frame"
                    );
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "frame consumer lagged, oldest frames dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        received
    });

    let duration_s = cfg.runner.duration_s;
    let physics = tokio::task::spawn_blocking(move || {
        let summary = sim.run(duration_s)?;
        // Dropping the simulation closes the frame queue.
        Ok::<_, anyhow::Error>(summary)
    });

    let summary = tokio::select! {
        result = physics => result??,
        _ = telemetry::shutdown_signal() => {
            warn!("shutdown requested, abandoning run");
            return Ok(());
        }
    };

    let received = consumer.await?;
    info!(
        ticks = summary.ticks,
        frames_published = summary.frames_published,
        frames_received = received,
        soc_mean = summary.pack_soc_mean,
        soc_min = summary.pack_soc_min,
        pack_voltage_v = summary.pack_voltage_v,
        soc_clamp_events = summary.soc_clamp_events,
        "simulation finished"
    );

    Ok(())
}
