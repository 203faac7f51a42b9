// runtime.rs

// Runs the core on three named threads: the control loop (state machine tick),
// the pose-fusion loop (encoders and inertial sensor into the estimator) and the
// sensor-ingest loop (obstacle sensors into the avoidance layer, plus a battery
// watch that can stop the robot between control ticks). Loops share only the
// `Core` handle and never wait on each other. Shutdown is cooperative: the
// running flag is checked between iterations, and the control loop issues a
// final stop before it exits.

// Dependencies
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::core::{Core, MowerApi, RobotStateMachine, lock};
use crate::hal::{BoxedActuation, BoxedDocking, BoxedPower, BoxedSensors, SimWorld};
use crate::{MowerConfig, MowerError, Result};

/// The four hardware boundaries the runtime is built on
pub struct Boundaries {
    pub actuation: BoxedActuation,
    pub power: BoxedPower,
    pub docking: BoxedDocking,
    pub sensors: BoxedSensors,
}

impl Boundaries {
    /// Boundaries backed by a simulated world
    pub fn simulated(world: &SimWorld) -> Self {
        Boundaries {
            actuation: Box::new(world.actuation()),
            power: Box::new(world.power()),
            docking: Box::new(world.docking()),
            sensors: Box::new(world.sensors()),
        }
    }
}

type SharedSensors = Arc<Mutex<BoxedSensors>>;

// Runtime: owns the loop threads; dropping it stops them
pub struct Runtime {
    core: Core,
    api: MowerApi,
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Builds the core from `config` and starts the three loops.
    pub fn spawn(config: &MowerConfig, boundaries: Boundaries) -> Result<Self> {
        config.validate()?;
        let Boundaries {
            actuation,
            power,
            docking,
            sensors,
        } = boundaries;

        let core = Core::new(config, actuation, power)?;
        let api = MowerApi::new(core.clone(), config.controller.max_linear, config.controller.max_angular);
        let machine = RobotStateMachine::new(core.clone(), docking, config);
        let sensors: SharedSensors = Arc::new(Mutex::new(sensors));

        let mut runtime = Runtime {
            core: core.clone(),
            api,
            running: Arc::new(AtomicBool::new(true)),
            handles: Vec::with_capacity(3),
        };

        let control = {
            let (core, running, rate) = (core.clone(), runtime.running.clone(), config.control.rate_hz);
            spawn_named("control", move || run_control_loop(machine, core, rate, running))
        };
        let fusion = {
            let (core, sensors, running, rate) = (
                core.clone(),
                sensors.clone(),
                runtime.running.clone(),
                config.control.fusion_rate_hz,
            );
            spawn_named("pose-fusion", move || run_fusion_loop(core, sensors, rate, running))
        };
        let ingest = {
            let (running, rate) = (runtime.running.clone(), config.control.sensor_rate_hz);
            spawn_named("sensor-ingest", move || run_sensor_loop(core, sensors, rate, running))
        };

        for handle in [control, fusion, ingest] {
            match handle {
                Ok(handle) => runtime.handles.push(handle),
                Err(e) => {
                    runtime.stop();
                    return Err(e);
                }
            }
        }

        info!("Runtime started");
        Ok(runtime)
    }

    pub fn api(&self) -> &MowerApi {
        &self.api
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    /// False once shutdown was requested or the power rail was cut.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops every loop and waits for the threads to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            let name = handle.thread().name().unwrap_or("loop").to_string();
            if handle.join().is_err() {
                error!("{} thread panicked", name);
            }
        }
        info!("Runtime stopped");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.stop();
        }
    }
}

fn spawn_named(name: &str, body: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(name.into())
        .spawn(body)
        .map_err(MowerError::Io)
}

// Calls `body` every 1/rate_hz seconds until `running` clears.
fn run_periodic(name: &str, rate_hz: f64, running: &AtomicBool, mut body: impl FnMut()) {
    let interval = Duration::from_secs_f64(1.0 / rate_hz);
    info!("{} loop running at {} Hz ({} ms interval)", name, rate_hz, interval.as_millis());

    while running.load(Ordering::Relaxed) {
        let started = Instant::now();
        body();
        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }
    info!("{} loop stopped", name);
}

fn run_control_loop(mut machine: RobotStateMachine, core: Core, rate_hz: f64, running: Arc<AtomicBool>) {
    run_periodic("Control", rate_hz, &running, || {
        let state = machine.tick(core.now());
        debug!("Control tick: {}", state);
        if core.power_cut() {
            error!("Power rail cut, stopping the runtime");
            running.store(false, Ordering::SeqCst);
        }
    });
    machine.shutdown();
}

fn run_fusion_loop(core: Core, sensors: SharedSensors, rate_hz: f64, running: Arc<AtomicBool>) {
    run_periodic("Pose fusion", rate_hz, &running, || {
        let now = core.now();
        let (encoders, imu) = {
            let mut sensors = lock(&sensors);
            (sensors.read_encoders(), sensors.read_imu())
        };

        let mut estimator = core.estimator();
        match encoders {
            Ok(Some(reading)) => {
                let result = estimator.correct_with_encoders(
                    reading.left_ticks,
                    reading.right_ticks,
                    reading.ticks_per_revolution,
                    now,
                );
                if let Err(fault) = result {
                    warn!("Encoder correction skipped: {}", fault);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Encoder read failed: {}", e),
        }
        match imu {
            Ok(Some(reading)) => {
                if let Err(fault) = estimator.correct_with_imu(reading.heading, reading.angular_velocity, now) {
                    warn!("Inertial correction skipped: {}", fault);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Inertial read failed: {}", e),
        }
    });
}

fn run_sensor_loop(core: Core, sensors: SharedSensors, rate_hz: f64, running: Arc<AtomicBool>) {
    run_periodic("Sensor ingest", rate_hz, &running, || {
        let now = core.now();
        let (proximity, rangefinder, vision) = {
            let mut sensors = lock(&sensors);
            (sensors.read_proximity(), sensors.read_rangefinder(), sensors.read_vision())
        };

        let rangefinder = rangefinder.unwrap_or_else(|e| {
            warn!("Rangefinder read failed: {}", e);
            None
        });
        let vision = vision.unwrap_or_else(|e| {
            warn!("Vision read failed: {}", e);
            None
        });
        {
            let mut avoidance = core.avoidance();
            match proximity {
                Ok(reading) => {
                    avoidance.update_proximity_sensors(&reading, now);
                }
                Err(e) => warn!("Proximity read failed: {}", e),
            }
            avoidance.fuse(rangefinder.as_deref(), vision.as_deref(), now);
        }

        match core.read_battery() {
            Ok(level) => {
                core.apply_battery_level(level, now);
            }
            Err(e) => warn!("Battery read failed: {}", e),
        }
    });
}
