use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tokio::task::JoinHandle;
use tracing::{debug, info};

use furrow_config::{ImplementProfile, SimulatorConfig};
use furrow_gateway::{broadcast::broadcast, state::GatewayState};
use furrow_protocol::{GnssFix, Message};

const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// One position along the simulated route, in local east/north meters.
/// `active` is true on working passes and false on the headland.
#[derive(Debug, Clone, Copy)]
pub struct RouteSample {
    pub east_m: f64,
    pub north_m: f64,
    pub active: bool,
    pub heading_deg: f64,
    pub speed_mps: f64,
    pub time_delta_s: f64,
}

/// Serpentine route generator for a planter working a rectangular field:
/// straight working passes joined by headland turns, one lane step per
/// pass.
pub struct RouteSimulator {
    field_length_m: f64,
    headland_length_m: f64,
    speed_mps: f64,
    sample_rate_hz: f64,
    base_lat: f64,
    base_lon: f64,
    altitude_m: f64,
    accuracy_m: f64,
    passes_per_cycle: u32,
    implement_width_m: f64,
    row_count: u32,
}

impl RouteSimulator {
    pub fn new(config: &SimulatorConfig, profile: &ImplementProfile) -> Self {
        Self {
            field_length_m: config.field_length_m.max(1.0),
            headland_length_m: config.headland_length_m.max(0.0),
            speed_mps: config.speed_mps.max(0.1),
            sample_rate_hz: config.sample_rate_hz.max(0.1),
            base_lat: config.base_lat,
            base_lon: config.base_lon,
            altitude_m: config.altitude_m,
            accuracy_m: config.accuracy_m,
            passes_per_cycle: config.passes_per_cycle.max(2),
            implement_width_m: profile.working_width_m().max(1.0),
            row_count: profile.row_count,
        }
    }

    /// Generate one full cycle of route samples.
    pub fn cycle_samples(&self) -> Vec<RouteSample> {
        let step = self.speed_mps / self.sample_rate_hz;
        let mut points: Vec<(f64, f64, bool)> = Vec::new();

        let mut lane: u32 = 0;
        let mut direction = 1.0_f64;
        for _ in 0..self.passes_per_cycle {
            let x = f64::from(lane) * self.implement_width_m;
            let (start_y, end_y) = if direction > 0.0 {
                (0.0, self.field_length_m)
            } else {
                (self.field_length_m, 0.0)
            };

            // Working pass.
            push_leg(&mut points, (x, start_y), (x, end_y), step, true);

            // Headland run-out, lateral shift, and run-in for the next pass.
            let headland_y = end_y + direction * self.headland_length_m;
            if self.headland_length_m > 0.0 {
                push_leg(&mut points, (x, end_y), (x, headland_y), step, false);
            }
            let next_lane = (lane + 1) % self.passes_per_cycle;
            let next_x = f64::from(next_lane) * self.implement_width_m;
            push_leg(&mut points, (x, headland_y), (next_x, headland_y), step, false);
            let next_direction = -direction;
            let return_y = if next_direction > 0.0 {
                0.0
            } else {
                self.field_length_m
            };
            push_leg(
                &mut points,
                (next_x, headland_y),
                (next_x, return_y),
                step,
                false,
            );

            lane = next_lane;
            direction = next_direction;
        }

        self.annotate(points)
    }

    /// Derive heading, speed, and pacing for each point.
    fn annotate(&self, points: Vec<(f64, f64, bool)>) -> Vec<RouteSample> {
        let mut samples = Vec::with_capacity(points.len());
        let mut last_heading = 0.0;
        for (index, point) in points.iter().enumerate() {
            let (delta_east, delta_north) = if index == 0 && points.len() > 1 {
                (points[1].0 - point.0, points[1].1 - point.1)
            } else if index > 0 {
                (
                    point.0 - points[index - 1].0,
                    point.1 - points[index - 1].1,
                )
            } else {
                (0.0, 0.0)
            };

            let distance = delta_east.hypot(delta_north);
            let sample = if distance > 0.0 {
                let heading = (delta_east.atan2(delta_north).to_degrees() + 360.0) % 360.0;
                let base_speed = distance * self.sample_rate_hz;
                let speed = (base_speed * (1.0 + self.speed_variation(index, point.2))).max(0.05);
                last_heading = heading;
                RouteSample {
                    east_m: point.0,
                    north_m: point.1,
                    active: point.2,
                    heading_deg: heading,
                    speed_mps: speed,
                    time_delta_s: distance / speed,
                }
            } else {
                RouteSample {
                    east_m: point.0,
                    north_m: point.1,
                    active: point.2,
                    heading_deg: last_heading,
                    speed_mps: 0.0,
                    time_delta_s: 1.0 / self.sample_rate_hz,
                }
            };
            samples.push(sample);
        }
        samples
    }

    /// Deterministic speed wobble: gentle oscillation along the pass, a
    /// slowdown on the headland. Keeps the path repeatable.
    fn speed_variation(&self, index: usize, active: bool) -> f64 {
        let oscillation = (index as f64 * 0.11).sin() * 0.04;
        let headland_adjustment = if active { 0.0 } else { -0.06 };
        (oscillation + headland_adjustment).clamp(-0.15, 0.08)
    }

    fn to_geodetic(&self, east_m: f64, north_m: f64) -> (f64, f64) {
        let dlat = (north_m / EARTH_RADIUS_M).to_degrees();
        let dlon = (east_m / (EARTH_RADIUS_M * self.base_lat.to_radians().cos())).to_degrees();
        (self.base_lat + dlat, self.base_lon + dlon)
    }

    /// Build the wire message for one sample.
    pub fn message_for(&self, sample: &RouteSample, sequence: u64, timestamp: f64) -> Message {
        let (latitude, longitude) = self.to_geodetic(sample.east_m, sample.north_m);
        let sections: Vec<bool> = vec![sample.active; self.row_count as usize];
        GnssFix {
            latitude,
            longitude,
            altitude: self.altitude_m,
            accuracy: Some(self.accuracy_m),
            sequence: Some(sequence),
            timestamp: Some(timestamp),
            heading_deg: Some(sample.heading_deg),
            speed_mps: Some(sample.speed_mps),
            rtk_state: Some(if sample.active { "FIXED" } else { "HOLD" }.to_string()),
            implement: Some(serde_json::json!({
                "active": sample.active,
                "sections": sections,
            })),
        }
        .into_message()
    }

    /// Stream fixes through the gateway's broadcast primitive forever.
    /// The sequence only advances when at least one monitor received the
    /// fix, so the first subscriber starts at the beginning of a cycle.
    pub fn spawn(self, state: Arc<GatewayState>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                width_m = self.implement_width_m,
                field_m = self.field_length_m,
                rate_hz = self.sample_rate_hz,
                "route simulator started"
            );
            let mut sequence: u64 = 1;
            loop {
                let cycle = self.cycle_samples();
                debug!(samples = cycle.len(), "starting simulator cycle");
                for sample in &cycle {
                    let message = self.message_for(sample, sequence, unix_now_f64());
                    if broadcast(&state, message).await > 0 {
                        sequence += 1;
                    }
                    tokio::time::sleep(Duration::from_secs_f64(sample.time_delta_s)).await;
                }
            }
        })
    }
}

fn unix_now_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn push_leg(
    points: &mut Vec<(f64, f64, bool)>,
    start: (f64, f64),
    end: (f64, f64),
    step: f64,
    active: bool,
) {
    let distance = (end.0 - start.0).hypot(end.1 - start.1);
    let last = points.last().map(|p| (p.0, p.1));
    if distance == 0.0 {
        if last != Some(start) {
            points.push((start.0, start.1, active));
        }
        return;
    }
    let steps = (distance / step).ceil().max(1.0) as usize;
    for index in 0..=steps {
        let t = (index as f64 / steps as f64).min(1.0);
        let point = (
            start.0 + (end.0 - start.0) * t,
            start.1 + (end.1 - start.1) * t,
        );
        if points.last().map(|p| (p.0, p.1)) == Some(point) {
            continue;
        }
        points.push((point.0, point.1, active));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_profile() -> ImplementProfile {
        serde_json::from_value(serde_json::json!({
            "role": "planter",
            "name": "Test Planter",
            "row_count": 4,
            "row_spacing_m": 0.5,
            "hitch_to_tool_m": 3.0
        }))
        .expect("profile")
    }

    fn small_sim() -> RouteSimulator {
        let config = SimulatorConfig {
            enabled: true,
            field_length_m: 20.0,
            headland_length_m: 3.0,
            speed_mps: 5.0,
            sample_rate_hz: 2.0,
            passes_per_cycle: 2,
            ..SimulatorConfig::default()
        };
        RouteSimulator::new(&config, &test_profile())
    }

    #[test]
    fn cycle_covers_passes_and_headland() {
        let samples = small_sim().cycle_samples();
        assert!(!samples.is_empty());
        assert!(samples.iter().any(|s| s.active), "working pass present");
        assert!(samples.iter().any(|s| !s.active), "headland present");
        assert!(samples.iter().all(|s| s.time_delta_s > 0.0));
    }

    #[test]
    fn active_samples_stay_inside_the_field() {
        for sample in small_sim().cycle_samples() {
            if sample.active {
                assert!((0.0..=20.0).contains(&sample.north_m));
            }
        }
    }

    #[test]
    fn messages_mirror_the_implement_state() {
        let sim = small_sim();
        let samples = sim.cycle_samples();
        let active = samples.iter().find(|s| s.active).expect("active sample");
        let idle = samples.iter().find(|s| !s.active).expect("headland sample");

        let msg = sim.message_for(active, 1, 100.0);
        assert_eq!(msg.str_field("rtk_state"), Some("FIXED"));
        let implement = &msg.payload["implement"];
        assert_eq!(implement["active"], serde_json::json!(true));
        assert_eq!(implement["sections"].as_array().map(Vec::len), Some(4));

        let msg = sim.message_for(idle, 2, 100.5);
        assert_eq!(msg.str_field("rtk_state"), Some("HOLD"));
        assert_eq!(msg.payload["implement"]["active"], serde_json::json!(false));
    }

    #[test]
    fn geodetic_conversion_is_anchored_at_the_base_point() {
        let sim = small_sim();
        let origin = RouteSample {
            east_m: 0.0,
            north_m: 0.0,
            active: true,
            heading_deg: 0.0,
            speed_mps: 1.0,
            time_delta_s: 0.5,
        };
        let msg = sim.message_for(&origin, 1, 0.0);
        assert_eq!(msg.f64_field("latitude"), Some(-22.0));
        assert_eq!(msg.f64_field("longitude"), Some(-47.0));

        // Moving north increases latitude.
        let north = RouteSample {
            north_m: 100.0,
            ..origin
        };
        let msg = sim.message_for(&north, 2, 0.0);
        assert!(msg.f64_field("latitude").expect("latitude") > -22.0);
    }
}
