use anyhow::Result;
use dotenvy::dotenv;
use std::env;

use crate::processor::RecorderConfig;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub replay_path: String,
    pub home_store_path: String,
    pub max_accuracy_m: f64,
    pub max_fix_age_secs: f64,
    pub home_distance_m: f64,
    pub min_speed_mph: Option<f64>,
    pub near_home_distance_filter_m: f64,
    pub idle_filter_min_speed_mph: f64,
    pub trip_name: Option<String>,
    pub log_level: String,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let replay_path = env::var("REPLAY_PATH").unwrap_or_else(|_| "fixes.jsonl".to_string());
        let home_store_path =
            env::var("HOME_STORE_PATH").unwrap_or_else(|_| "geotrips-kv.json".to_string());

        let max_accuracy_m = env::var("MAX_ACCURACY_M")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .unwrap_or(50.0);
        let max_fix_age_secs = env::var("MAX_FIX_AGE_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .unwrap_or(60.0);
        let home_distance_m = env::var("HOME_DISTANCE_M")
            .unwrap_or_else(|_| "200".to_string())
            .parse()
            .unwrap_or(200.0);
        let min_speed_mph = env::var("MIN_SPEED_MPH").ok().and_then(|v| v.parse().ok());
        let near_home_distance_filter_m = env::var("NEAR_HOME_DISTANCE_FILTER_M")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .unwrap_or(100.0);
        let idle_filter_min_speed_mph = env::var("IDLE_FILTER_MIN_SPEED_MPH")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .unwrap_or(1.0);

        let trip_name = env::var("TRIP_NAME").ok();
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            replay_path,
            home_store_path,
            max_accuracy_m,
            max_fix_age_secs,
            home_distance_m,
            min_speed_mph,
            near_home_distance_filter_m,
            idle_filter_min_speed_mph,
            trip_name,
            log_level,
        })
    }

    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            max_accuracy_m: self.max_accuracy_m,
            max_fix_age_secs: self.max_fix_age_secs,
            home_distance_m: self.home_distance_m,
            min_speed_mph: self.min_speed_mph,
            near_home_distance_filter_m: self.near_home_distance_filter_m,
        }
    }
}
