//! Synthetic capture builder for tests
//!
//! Builds byte-exact capture files from a parametric driving model so
//! the decoder, normaliser and analyser can be exercised without a
//! checked-in vendor fixture. The generated laps are physically
//! consistent: distance integrates the speed trace, the session clock
//! advances at the tick rate, and the lap clock can be made to reset a
//! configurable number of ticks after the lap index flips, like the
//! real simulator does.

#[derive(Debug, Clone)]
pub struct SyntheticCorner {
    pub center_m: f64,
    pub min_speed_mps: f64,
    pub half_width_m: f64,
    pub brake_level: f64,
    pub steering_rad: f64,
}

impl SyntheticCorner {
    pub fn new(center_m: f64, min_speed_mps: f64) -> Self {
        SyntheticCorner {
            center_m,
            min_speed_mps,
            half_width_m: 80.0,
            brake_level: 0.9,
            steering_rad: 0.3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyntheticLap {
    pub corners: Vec<SyntheticCorner>,
    pub pit: bool,
}

impl SyntheticLap {
    pub fn with_corners(corners: Vec<SyntheticCorner>) -> Self {
        SyntheticLap {
            corners,
            pit: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureBuilder {
    pub track_id: String,
    pub track_name: String,
    pub track_length_m: f64,
    pub car_id: String,
    pub car_name: String,
    pub driver_id: String,
    pub driver_name: String,
    pub straight_speed_mps: f64,
    pub tick_rate: u32,
    /// Ticks between the lap-index flip and the lap-clock reset.
    pub lap_clock_reset_delay_ticks: usize,
    pub laps: Vec<SyntheticLap>,
    /// Leave one required channel out of the file entirely.
    pub omit_channel: Option<String>,
    /// Write a garbage type code into one channel's descriptor.
    pub corrupt_type_code_for: Option<String>,
}

impl CaptureBuilder {
    pub fn new(track_id: &str, track_length_m: f64) -> Self {
        CaptureBuilder {
            track_id: track_id.to_string(),
            track_name: "Test Circuit".to_string(),
            track_length_m,
            car_id: "55".to_string(),
            car_name: "Test GT3".to_string(),
            driver_id: "111".to_string(),
            driver_name: "Test Driver".to_string(),
            straight_speed_mps: 50.0,
            tick_rate: 60,
            lap_clock_reset_delay_ticks: 0,
            laps: Vec::new(),
            omit_channel: None,
            corrupt_type_code_for: None,
        }
    }

    pub fn lap(mut self, lap: SyntheticLap) -> Self {
        self.laps.push(lap);
        self
    }

    /// A two-corner lap sized for the builder's track length.
    pub fn standard_lap(&self) -> SyntheticLap {
        SyntheticLap::with_corners(vec![
            SyntheticCorner::new(0.30 * self.track_length_m, 20.0),
            SyntheticCorner::new(0.65 * self.track_length_m, 26.0),
        ])
    }

    fn speed_at(&self, lap: &SyntheticLap, d: f64) -> f64 {
        let mut v = self.straight_speed_mps;
        for c in &lap.corners {
            let x = (d - c.center_m).abs();
            if x < c.half_width_m {
                let ramp =
                    c.min_speed_mps + (self.straight_speed_mps - c.min_speed_mps) * x / c.half_width_m;
                v = v.min(ramp);
            }
        }
        v
    }

    fn controls_at(&self, lap: &SyntheticLap, d: f64) -> (f64, f64, f64) {
        let ahead = self.speed_at(lap, d + 0.5);
        let behind = self.speed_at(lap, (d - 0.5).max(0.0));
        let decelerating = ahead < behind - 1e-9;

        let mut brake_level = 0.9;
        let mut steering = 0.0;
        let mut exit_progress = None;
        for c in &lap.corners {
            let x = d - c.center_m;
            if x.abs() < c.half_width_m {
                brake_level = c.brake_level;
                steering = c.steering_rad;
                if x > 0.0 {
                    exit_progress = Some(x / c.half_width_m);
                }
                break;
            }
        }

        if decelerating {
            (0.0, brake_level, steering)
        } else if let Some(p) = exit_progress {
            // Throttle feeds in progressively on the way out of a corner.
            (0.3 + 0.7 * p, 0.0, steering)
        } else {
            (1.0, 0.0, steering)
        }
    }

    /// Render the capture to bytes.
    pub fn build(&self) -> Vec<u8> {
        let dt = 1.0 / self.tick_rate as f64;
        let mut samples: Vec<Sample> = Vec::new();

        let mut t = 1000.0_f64;
        let mut tick: i32 = 0;
        let mut carry = 0.0_f64;
        let mut prev_lap_time = 0.0_f64;

        for (li, lap) in self.laps.iter().enumerate() {
            let lap_number = li as i32 + 1;
            let lap_start_t = t - carry / self.straight_speed_mps.max(1.0);
            let mut d = carry;
            let mut ticks_in_lap = 0usize;

            while d < self.track_length_m {
                let v = self.speed_at(lap, d);
                let (throttle, brake, steering) = self.controls_at(lap, d);
                let time_in_lap = t - lap_start_t;
                let lct = if ticks_in_lap < self.lap_clock_reset_delay_ticks && li > 0 {
                    prev_lap_time + time_in_lap
                } else {
                    time_in_lap
                };

                samples.push(Sample {
                    speed: v as f32,
                    throttle: throttle as f32,
                    brake: brake as f32,
                    steering: steering as f32,
                    lat: -31.0 + d * 1e-5,
                    lon: 148.0 + d * 1e-5,
                    alt: 50.0,
                    lap: lap_number,
                    lct: lct as f32,
                    lap_dist: d as f32,
                    lap_dist_pct: (d / self.track_length_m) as f32,
                    session_time: t,
                    session_tick: tick,
                    rpm: (v * 130.0) as f32,
                    gear: ((v / 12.0).ceil() as i32).clamp(1, 6),
                    surface: 3,
                    incidents: 0,
                    on_pit: lap.pit,
                });

                d += v * dt;
                t += dt;
                tick += 1;
                ticks_in_lap += 1;
            }

            prev_lap_time = t - lap_start_t;
            carry = d - self.track_length_m;
        }

        self.serialize(&samples)
    }

    fn session_doc(&self) -> String {
        format!(
            "---\n\
WeekendInfo:\n \
TrackName: test circuit\n \
TrackDisplayName: {}\n \
TrackConfigName: \n \
TrackID: {}\n \
TrackLength: {:.2} km\n\
DriverInfo:\n \
DriverCarIdx: 0\n \
Drivers:\n \
- CarIdx: 0\n   \
UserName: {}\n   \
UserID: {}\n   \
CarID: {}\n   \
CarScreenName: {}\n\
SessionInfo:\n \
Sessions:\n \
- SessionNum: 0\n   \
SessionType: Practice\n...\n",
            self.track_name,
            self.track_id,
            self.track_length_m / 1000.0,
            self.driver_name,
            self.driver_id,
            self.car_id,
            self.car_name,
        )
    }

    fn serialize(&self, samples: &[Sample]) -> Vec<u8> {
        // (name, type code, element size)
        let mut layout: Vec<(&str, i32, usize)> = vec![
            ("Speed", 4, 4),
            ("Throttle", 4, 4),
            ("Brake", 4, 4),
            ("SteeringWheelAngle", 4, 4),
            ("Lat", 5, 8),
            ("Lon", 5, 8),
            ("Alt", 4, 4),
            ("Lap", 2, 4),
            ("LapCurrentLapTime", 4, 4),
            ("LapDist", 4, 4),
            ("LapDistPct", 4, 4),
            ("SessionTime", 5, 8),
            ("SessionTick", 2, 4),
            ("RPM", 4, 4),
            ("Gear", 2, 4),
            ("PlayerTrackSurface", 2, 4),
            ("PlayerCarMyIncidentCount", 2, 4),
            ("OnPitRoad", 1, 1),
        ];
        if let Some(omit) = &self.omit_channel {
            layout.retain(|(name, _, _)| name != omit);
        }

        let mut offsets = Vec::with_capacity(layout.len());
        let mut row_len = 0usize;
        for (_, _, size) in &layout {
            offsets.push(row_len);
            row_len += size;
        }

        let doc = self.session_doc();
        let doc_bytes = doc.as_bytes();
        let session_info_offset = 144usize;
        let descriptor_offset = session_info_offset + doc_bytes.len();
        let sample_offset = descriptor_offset + layout.len() * 144;

        let mut out = Vec::with_capacity(sample_offset + samples.len() * row_len);

        // --- fixed header (112 bytes) ---
        for v in [
            2i32,                          // version
            1,                             // status
            self.tick_rate as i32,         // tick rate
            0,                             // session info update
            doc_bytes.len() as i32,        // session info len
            session_info_offset as i32,    // session info offset
            layout.len() as i32,           // channel count
            descriptor_offset as i32,      // descriptor offset
            1,                             // buffer count
            row_len as i32,                // row width
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&[0u8; 8]); // pad
        // sample buffer descriptors: [tick_count, offset, pad, pad] x 4
        out.extend_from_slice(&(samples.len() as i32).to_le_bytes());
        out.extend_from_slice(&(sample_offset as i32).to_le_bytes());
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&[0u8; 48]);

        // --- disk sub-header (32 bytes) ---
        out.extend_from_slice(&1_722_000_000i64.to_le_bytes());
        out.extend_from_slice(&0.0f64.to_le_bytes());
        out.extend_from_slice(&(samples.len() as f64 / self.tick_rate as f64).to_le_bytes());
        out.extend_from_slice(&(self.laps.len() as i32).to_le_bytes());
        out.extend_from_slice(&(samples.len() as i32).to_le_bytes());

        // --- session metadata document ---
        out.extend_from_slice(doc_bytes);

        // --- channel descriptors (144 bytes each) ---
        for (i, (name, type_code, _)) in layout.iter().enumerate() {
            let code = match &self.corrupt_type_code_for {
                Some(target) if target == name => 9,
                _ => *type_code,
            };
            out.extend_from_slice(&code.to_le_bytes());
            out.extend_from_slice(&(offsets[i] as i32).to_le_bytes());
            out.extend_from_slice(&1i32.to_le_bytes()); // count
            out.push(0); // count_as_time
            out.extend_from_slice(&[0u8; 3]); // pad
            out.extend_from_slice(&fixed_str::<32>(name));
            out.extend_from_slice(&fixed_str::<64>("synthetic channel"));
            out.extend_from_slice(&fixed_str::<32>("u"));
        }

        // --- sample matrix ---
        for s in samples {
            let row_start = out.len();
            for (i, (name, _, _)) in layout.iter().enumerate() {
                debug_assert_eq!(out.len() - row_start, offsets[i]);
                s.write_channel(name, &mut out);
            }
            debug_assert_eq!(out.len() - row_start, row_len);
        }

        out
    }
}

struct Sample {
    speed: f32,
    throttle: f32,
    brake: f32,
    steering: f32,
    lat: f64,
    lon: f64,
    alt: f32,
    lap: i32,
    lct: f32,
    lap_dist: f32,
    lap_dist_pct: f32,
    session_time: f64,
    session_tick: i32,
    rpm: f32,
    gear: i32,
    surface: i32,
    incidents: i32,
    on_pit: bool,
}

impl Sample {
    fn write_channel(&self, name: &str, out: &mut Vec<u8>) {
        match name {
            "Speed" => out.extend_from_slice(&self.speed.to_le_bytes()),
            "Throttle" => out.extend_from_slice(&self.throttle.to_le_bytes()),
            "Brake" => out.extend_from_slice(&self.brake.to_le_bytes()),
            "SteeringWheelAngle" => out.extend_from_slice(&self.steering.to_le_bytes()),
            "Lat" => out.extend_from_slice(&self.lat.to_le_bytes()),
            "Lon" => out.extend_from_slice(&self.lon.to_le_bytes()),
            "Alt" => out.extend_from_slice(&self.alt.to_le_bytes()),
            "Lap" => out.extend_from_slice(&self.lap.to_le_bytes()),
            "LapCurrentLapTime" => out.extend_from_slice(&self.lct.to_le_bytes()),
            "LapDist" => out.extend_from_slice(&self.lap_dist.to_le_bytes()),
            "LapDistPct" => out.extend_from_slice(&self.lap_dist_pct.to_le_bytes()),
            "SessionTime" => out.extend_from_slice(&self.session_time.to_le_bytes()),
            "SessionTick" => out.extend_from_slice(&self.session_tick.to_le_bytes()),
            "RPM" => out.extend_from_slice(&self.rpm.to_le_bytes()),
            "Gear" => out.extend_from_slice(&self.gear.to_le_bytes()),
            "PlayerTrackSurface" => out.extend_from_slice(&self.surface.to_le_bytes()),
            "PlayerCarMyIncidentCount" => out.extend_from_slice(&self.incidents.to_le_bytes()),
            "OnPitRoad" => out.push(self.on_pit as u8),
            other => panic!("unknown synthetic channel {other}"),
        }
    }
}

fn fixed_str<const N: usize>(s: &str) -> [u8; N] {
    let mut buf = [0u8; N];
    let bytes = s.as_bytes();
    let n = bytes.len().min(N - 1);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}
