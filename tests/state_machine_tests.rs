// tests/state_machine_tests.rs
// Closed-loop scenarios: the state machine, estimator and avoidance layer driven
// tick by tick against the simulated world on a fixed time step.

use mowbot::core::{Core, MowerApi, RobotState, RobotStateMachine};
use mowbot::hal::sim::{SimObstacle, SimSensors};
use mowbot::hal::{SensorBoundary, SimConfig, SimWorld};
use mowbot::navigation::{Area, CoveragePattern, Point, Polygon};
use mowbot::MowerConfig;

const DT: f64 = 0.1;

struct Harness {
    world: SimWorld,
    sensors: SimSensors,
    machine: RobotStateMachine,
    api: MowerApi,
    now: f64,
}

impl Harness {
    fn new(mut config: MowerConfig) -> Self {
        config.simulation.realtime = false;
        let world = SimWorld::new(config.simulation.clone());
        let core = Core::new(&config, Box::new(world.actuation()), Box::new(world.power())).unwrap();
        {
            let sim = &config.simulation;
            core.estimator().reset(sim.start_x, sim.start_y, sim.start_heading);
        }
        let api = MowerApi::new(core.clone(), config.controller.max_linear, config.controller.max_angular);
        let machine = RobotStateMachine::new(core, Box::new(world.docking()), &config);
        Harness {
            sensors: world.sensors(),
            world,
            machine,
            api,
            now: 0.0,
        }
    }

    fn core(&self) -> &Core {
        self.machine.core()
    }

    // One fusion pass, one ingest pass and one control tick
    fn step(&mut self) -> RobotState {
        self.world.step(DT);
        self.now += DT;
        let now = self.now;

        let encoders = self.sensors.read_encoders().unwrap().unwrap();
        let imu = self.sensors.read_imu().unwrap().unwrap();
        let proximity = self.sensors.read_proximity().unwrap();
        let rangefinder = self.sensors.read_rangefinder().unwrap();
        {
            let core = self.machine.core();
            let mut estimator = core.estimator();
            estimator
                .correct_with_encoders(encoders.left_ticks, encoders.right_ticks, encoders.ticks_per_revolution, now)
                .unwrap();
            estimator.correct_with_imu(imu.heading, imu.angular_velocity, now).unwrap();
        }
        {
            let core = self.machine.core();
            let mut avoidance = core.avoidance();
            avoidance.update_proximity_sensors(&proximity, now);
            avoidance.fuse(rangefinder.as_deref(), None, now);
        }
        self.machine.tick(now)
    }

    fn run_until(&mut self, target: RobotState, max_steps: usize) -> bool {
        (0..max_steps).any(|_| self.step() == target)
    }
}

fn small_lawn() -> Area {
    Area::new(
        "small_lawn",
        Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(3.0, 0.0),
            Point::new(3.0, 3.0),
            Point::new(0.0, 3.0),
        ]),
        CoveragePattern::Boustrophedon,
    )
}

fn lawn_config() -> MowerConfig {
    MowerConfig {
        areas: vec![small_lawn()],
        ..MowerConfig::default()
    }
}

#[test]
fn mowing_a_small_lawn_runs_to_completion() {
    let mut harness = Harness::new(lawn_config());
    harness.api.start_mowing_task("small_lawn").unwrap();

    harness.step();
    assert_eq!(harness.core().state().current(), RobotState::Mowing);
    assert!(harness.world.blade_rpm() > 0.0);
    assert!(harness.world.cutting_height() > 0.0);

    assert!(harness.run_until(RobotState::Idle, 6000), "coverage did not finish");
    let status = harness.api.get_status();
    assert_eq!(status.progress.waypoints_done, status.progress.waypoints_total);
    assert_eq!(harness.world.blade_rpm(), 0.0);
    assert_eq!(harness.world.drive_command(), (0.0, 0.0));
    assert!(status.stats.mowing_time_secs > 0.0);
}

#[test]
fn estimate_tracks_ground_truth_while_mowing() {
    let mut harness = Harness::new(lawn_config());
    harness.api.start_mowing_task("small_lawn").unwrap();
    for _ in 0..200 {
        harness.step();
    }
    let pose = harness.core().pose();
    let (x, y, _) = harness.world.true_pose();
    assert!(Point::new(pose.x, pose.y).distance_to(&Point::new(x, y)) < 0.2);
}

#[test]
fn low_battery_drives_home_docks_and_charges() {
    let mut config = MowerConfig::default();
    config.simulation = SimConfig {
        start_x: 3.0,
        start_heading: std::f64::consts::PI,
        battery_start: 18.0,
        charge_rate: 20.0,
        ..SimConfig::default()
    };
    let mut harness = Harness::new(config);

    assert_eq!(harness.step(), RobotState::ReturningToCharge);
    assert!(harness.run_until(RobotState::Charging, 600), "never docked");
    assert!(harness.world.is_docked());

    assert!(harness.run_until(RobotState::Idle, 100), "never finished charging");
    assert_eq!(harness.api.get_status().stats.charging_cycles, 1);
}

#[test]
fn emergency_stop_halts_once_and_resumes() {
    let mut harness = Harness::new(lawn_config());
    harness.api.start_mowing_task("small_lawn").unwrap();
    for _ in 0..20 {
        harness.step();
    }
    assert_ne!(harness.world.drive_command(), (0.0, 0.0));

    assert!(harness.api.trigger_emergency_stop());
    assert!(!harness.api.trigger_emergency_stop());
    for _ in 0..20 {
        assert_eq!(harness.step(), RobotState::EmergencyStop);
        assert_eq!(harness.world.drive_command(), (0.0, 0.0));
    }
    assert_eq!(harness.world.stop_count(), 1);
    assert_eq!(harness.world.blade_rpm(), 0.0);

    assert!(harness.api.clear_emergency_stop());
    for _ in 0..20 {
        harness.step();
    }
    assert_eq!(harness.core().state().current(), RobotState::Mowing);
    assert!(harness.world.blade_rpm() > 0.0);
    assert_ne!(harness.world.drive_command(), (0.0, 0.0));
}

#[test]
fn critical_battery_stops_without_waiting_for_a_tick() {
    let mut harness = Harness::new(lawn_config());
    harness.api.start_mowing_task("small_lawn").unwrap();
    for _ in 0..10 {
        harness.step();
    }

    // a reading from outside the control loop acts immediately
    harness.api.report_battery_level(12.0);
    assert_eq!(harness.core().state().current(), RobotState::EmergencyStop);
    assert_eq!(harness.world.stop_count(), 1);

    harness.world.set_battery(12.0);
    assert!(harness.api.clear_emergency_stop());
    assert_eq!(harness.step(), RobotState::ReturningToCharge);
}

#[test]
fn obstacle_in_the_way_is_never_hit() {
    let mut config = lawn_config();
    config.simulation.obstacles = vec![SimObstacle {
        x: 1.5,
        y: 0.2,
        radius: 0.15,
    }];
    let mut harness = Harness::new(config);
    harness.api.start_mowing_task("small_lawn").unwrap();

    for _ in 0..600 {
        harness.step();
        let (x, y, _) = harness.world.true_pose();
        assert!(Point::new(x, y).distance_to(&Point::new(1.5, 0.2)) > 0.15);
    }
}

#[test]
fn motor_fault_enters_error_and_heals() {
    let mut harness = Harness::new(lawn_config());
    harness.api.start_mowing_task("small_lawn").unwrap();
    harness.step();

    harness.world.set_actuation_fault(true);
    assert_eq!(harness.step(), RobotState::Error);
    harness.world.set_actuation_fault(false);
    assert!(harness.run_until(RobotState::Idle, 60));
}
