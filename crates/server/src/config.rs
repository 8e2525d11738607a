use std::env;

/// Process configuration, environment-driven. Database and cache are both
/// optional: without `DATABASE_*` the in-memory store is used, without
/// `REDIS_URL` the in-memory cache. That keeps a development checkout
/// runnable with nothing but `cargo run`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub simulation_target_buses: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let bind_addr =
            env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
        let redis_url = env::var("REDIS_URL").ok();
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            log::warn!("JWT_SECRET not set, using an insecure development secret");
            "dev-secret-change-me".to_owned()
        });
        let simulation_target_buses = env::var("SIM_TARGET_BUSES")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(20);
        Self {
            bind_addr,
            redis_url,
            jwt_secret,
            simulation_target_buses,
        }
    }
}
