pub mod error;
pub mod export;
pub mod math;
pub mod optimize;
pub mod pruner;
pub mod rng;
pub mod runner;
pub mod sampler;
pub mod space;
pub mod store;
pub mod study;
pub mod telemetry;

pub use error::Error;
pub use error::Result;
pub use optimize::optimize;
pub use optimize::Options;
pub use optimize::Outcome;
pub use runner::Reporter;
pub use space::Space;
pub use space::Value;
pub use study::Goal;

/// dimensional analysis types
pub type Score = f64;
pub type Unit = f64;
pub type Seed = u64;

// tpe parameters
const TPE_MIN_OBS: usize = 10;
const TPE_GAMMA: f64 = 0.25;
const TPE_CANDIDATES: usize = 24;
const TPE_TIE_JITTER: f64 = 1e-9;
const TPE_MIX_GOOD: f64 = 0.70;
const TPE_MIX_BAD: f64 = 0.20;

// kde parameters
const KDE_SCOTT_FACTOR: f64 = 1.06;
const KDE_BANDWIDTH_FLOOR: f64 = 1e-3;
const KDE_PRIOR_WIDTH: f64 = 0.15;
const KDE_UNIFORM_BLEND: f64 = 0.01;

// numerical guard rails
const LOG_FLOOR: f64 = 1e-12;
const DENOM_FLOOR: f64 = 1e-10;
const PROB_FLOOR: f64 = 1e-10;
const CORR_IDENTITY_TOLERANCE: f64 = 1e-6;

// executor parameters
const STORE_OUTAGE_LIMIT: usize = 3;
const REPORT_CHANNEL_DEPTH: usize = 8;

/// install the study logging stack: terminal at info, a per-run
/// debug file under logs/. `Options::logging(true)` routes every
/// optimize run through here; calling it again once a logger is
/// installed is a no-op.
pub fn init() {
    std::fs::create_dir_all("logs").expect("create logs directory");
    let config = simplelog::ConfigBuilder::new()
        .set_location_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();
    let time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time moves slow")
        .as_secs();
    let file = simplelog::WriteLogger::new(
        log::LevelFilter::Debug,
        config.clone(),
        std::fs::File::create(format!("logs/{}.log", time)).expect("create log file"),
    );
    let term = simplelog::TermLogger::new(
        log::LevelFilter::Info,
        config.clone(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    if simplelog::CombinedLogger::init(vec![term, file]).is_err() {
        log::debug!("logger already installed, keeping it");
    }
}

/// get a database connection and return the client
#[cfg(feature = "durable")]
pub async fn db() -> std::sync::Arc<tokio_postgres::Client> {
    log::info!("connecting to database");
    let tls = tokio_postgres::tls::NoTls;
    let ref url = std::env::var("DB_URL").expect("DB_URL must be set");
    let (client, connection) = tokio_postgres::connect(url, tls)
        .await
        .expect("database connection failed");
    tokio::spawn(connection);
    std::sync::Arc::new(client)
}
